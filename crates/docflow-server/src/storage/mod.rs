//! Object storage for raw document payloads
//!
//! The upload API writes payloads here before any metadata exists, and the
//! processing worker reads them back by storage key. [`ObjectStore`] is the
//! seam between the two: production uses the S3 implementation, tests use
//! the in-memory one.

pub mod config;
pub mod memory;
pub mod s3;

use thiserror::Error;

pub use config::StorageConfig;
pub use memory::InMemoryObjectStore;
pub use s3::S3ObjectStore;

/// Errors from object store operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Result of a successful put
#[derive(Debug, Clone)]
pub struct PutResult {
    pub key: String,
    pub checksum: String,
    pub size: i64,
}

/// Store for raw document payloads, addressed by key.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write a payload. Returns the key, SHA-256 checksum, and size.
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> StorageResult<PutResult>;

    /// Read a payload back in full.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Remove a payload. Deleting a missing key is not an error, so the
    /// rollback path can call this without checking existence first.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;
}

/// Build the canonical storage key for an uploaded document.
pub fn upload_key(doc_id: uuid::Uuid, filename: &str) -> String {
    format!("uploads/{}/{}", doc_id, filename)
}
