pub mod reprocess;
pub mod upload;

pub use reprocess::{ReprocessDocumentError, ReprocessDocumentResponse};
pub use upload::{UploadDocumentCommand, UploadDocumentError, UploadDocumentResponse};
