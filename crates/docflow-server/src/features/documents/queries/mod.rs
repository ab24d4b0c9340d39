pub mod get;
pub mod list;

pub use get::GetDocumentError;
pub use list::{ListDocumentsError, ListDocumentsQuery};
