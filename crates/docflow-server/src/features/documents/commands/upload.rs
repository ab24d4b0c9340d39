//! Document upload command
//!
//! An upload touches three systems in a fixed order: object store,
//! status store, then queue. Earlier writes are safe without later ones
//! (an object without a record is garbage, a record without a message is
//! recoverable), so on failure the completed writes are compensated in
//! reverse order. Rollback failures are logged but never mask the
//! original error; the caller learns whether rollback completed.

use crate::features::FeatureState;
use crate::queue::IngestMessage;
use crate::status::{NewDocument, StatusError};
use crate::storage::upload_key;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extensions accepted by the upload endpoint. PDF is the production
/// format; plain text exists for local development.
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "txt"];

/// Largest accepted payload in bytes (50 MiB).
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Attribution recorded when the caller supplies no identity. The API
/// has no authentication yet, so callers self-report.
pub const DEFAULT_UPLOADER: &str = "anonymous";

#[derive(Debug, Clone)]
pub struct UploadDocumentCommand {
    pub filename: String,
    pub uploaded_by: Option<String>,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDocumentResponse {
    pub doc_id: Uuid,
    pub status: String,
    pub storage_key: String,
    pub checksum: String,
    pub size: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadDocumentError {
    #[error("Filename is required and cannot be empty")]
    FilenameRequired,
    #[error("Filename must not exceed 255 characters")]
    FilenameLength,
    #[error("Unsupported file type: {0}")]
    UnsupportedExtension(String),
    #[error("Content is required and cannot be empty")]
    ContentRequired,
    #[error("Content exceeds the maximum upload size")]
    ContentTooLarge,
    #[error("Failed to store document: {0}")]
    Storage(String),
    #[error("Upload failed: {message}")]
    Aborted {
        message: String,
        /// Whether all completed writes were compensated. When false,
        /// orphaned state may remain and needs operator attention.
        rollback_complete: bool,
        /// Whether the failure was a doc_id collision.
        conflict: bool,
    },
}

impl UploadDocumentCommand {
    pub fn validate(&self) -> Result<(), UploadDocumentError> {
        if self.filename.trim().is_empty() {
            return Err(UploadDocumentError::FilenameRequired);
        }
        if self.filename.len() > 255 {
            return Err(UploadDocumentError::FilenameLength);
        }

        let extension = self
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(UploadDocumentError::UnsupportedExtension(
                self.filename.clone(),
            ));
        }

        if self.content.is_empty() {
            return Err(UploadDocumentError::ContentRequired);
        }
        if self.content.len() > MAX_UPLOAD_BYTES {
            return Err(UploadDocumentError::ContentTooLarge);
        }

        Ok(())
    }
}

#[tracing::instrument(skip(state, command), fields(filename = %command.filename))]
pub async fn handle(
    state: &FeatureState,
    command: UploadDocumentCommand,
) -> Result<UploadDocumentResponse, UploadDocumentError> {
    command.validate()?;

    let doc_id = Uuid::new_v4();
    let storage_key = upload_key(doc_id, &command.filename);

    // Step 1: object store. Nothing to compensate if this fails.
    let put = state
        .objects
        .put(&storage_key, command.content, command.content_type)
        .await
        .map_err(|e| UploadDocumentError::Storage(e.to_string()))?;

    // Step 2: conditional metadata create.
    let uploaded_by = command
        .uploaded_by
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_UPLOADER.to_string());
    let created = state
        .status
        .create(NewDocument {
            doc_id,
            filename: command.filename.clone(),
            uploaded_by,
            storage_key: storage_key.clone(),
            checksum: put.checksum.clone(),
            size_bytes: put.size,
        })
        .await;

    if let Err(e) = created {
        let conflict = matches!(e, StatusError::AlreadyExists(_));
        let rollback_complete = rollback(state, doc_id, &storage_key, false).await;
        return Err(UploadDocumentError::Aborted {
            message: e.to_string(),
            rollback_complete,
            conflict,
        });
    }

    // Step 3: enqueue. Only reached with both writes in place.
    if let Err(e) = state
        .queue
        .send(&IngestMessage {
            doc_id,
            storage_key: storage_key.clone(),
        })
        .await
    {
        let rollback_complete = rollback(state, doc_id, &storage_key, true).await;
        return Err(UploadDocumentError::Aborted {
            message: e.to_string(),
            rollback_complete,
            conflict: false,
        });
    }

    tracing::info!(
        doc_id = %doc_id,
        storage_key = %storage_key,
        size = put.size,
        "Document uploaded and enqueued"
    );

    Ok(UploadDocumentResponse {
        doc_id,
        status: "uploaded".to_string(),
        storage_key,
        checksum: put.checksum,
        size: put.size,
    })
}

/// Compensate completed writes in reverse order. Returns whether every
/// compensation succeeded.
async fn rollback(
    state: &FeatureState,
    doc_id: Uuid,
    storage_key: &str,
    record_created: bool,
) -> bool {
    let mut complete = true;

    if record_created {
        if let Err(e) = state.status.delete(doc_id).await {
            tracing::error!(doc_id = %doc_id, "Rollback failed to delete record: {}", e);
            complete = false;
        }
    }

    if let Err(e) = state.objects.delete(storage_key).await {
        tracing::error!(doc_id = %doc_id, "Rollback failed to delete object: {}", e);
        complete = false;
    }

    if complete {
        tracing::warn!(doc_id = %doc_id, "Upload rolled back");
    }

    complete
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(filename: &str, content: Vec<u8>) -> UploadDocumentCommand {
        UploadDocumentCommand {
            filename: filename.to_string(),
            uploaded_by: None,
            content,
            content_type: None,
        }
    }

    #[test]
    fn test_validation_success() {
        assert!(command("report.pdf", vec![1, 2, 3]).validate().is_ok());
        assert!(command("notes.TXT", vec![1]).validate().is_ok());
    }

    #[test]
    fn test_validation_empty_filename() {
        assert!(matches!(
            command("  ", vec![1]).validate(),
            Err(UploadDocumentError::FilenameRequired)
        ));
    }

    #[test]
    fn test_validation_filename_too_long() {
        let long = format!("{}.pdf", "a".repeat(256));
        assert!(matches!(
            command(&long, vec![1]).validate(),
            Err(UploadDocumentError::FilenameLength)
        ));
    }

    #[test]
    fn test_validation_unsupported_extension() {
        assert!(matches!(
            command("archive.zip", vec![1]).validate(),
            Err(UploadDocumentError::UnsupportedExtension(_))
        ));
        assert!(matches!(
            command("no-extension", vec![1]).validate(),
            Err(UploadDocumentError::UnsupportedExtension(_))
        ));
    }

    #[test]
    fn test_validation_empty_content() {
        assert!(matches!(
            command("report.pdf", vec![]).validate(),
            Err(UploadDocumentError::ContentRequired)
        ));
    }

    #[test]
    fn test_validation_oversized_content() {
        let cmd = UploadDocumentCommand {
            filename: "report.pdf".to_string(),
            uploaded_by: None,
            content: vec![0; MAX_UPLOAD_BYTES + 1],
            content_type: None,
        };
        assert!(matches!(
            cmd.validate(),
            Err(UploadDocumentError::ContentTooLarge)
        ));
    }
}
