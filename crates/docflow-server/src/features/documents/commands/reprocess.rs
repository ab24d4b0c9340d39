//! Administrative document reprocessing
//!
//! Recovery path for documents that are stuck or whose index content is
//! suspect: stale vectors are removed, the record is forced back to
//! `uploaded` (bypassing transition validation, clearing the lock), and a
//! fresh ingest message is enqueued.

use crate::features::FeatureState;
use crate::queue::IngestMessage;
use crate::status::{DocumentStatus, StatusError, TransitionUpdate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprocessDocumentResponse {
    pub doc_id: Uuid,
    pub status: String,
    /// Stale index entries removed before re-enqueueing.
    pub vectors_deleted: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ReprocessDocumentError {
    #[error("Document not found: {0}")]
    NotFound(Uuid),
    #[error("Failed to delete stale vectors: {0}")]
    Index(String),
    #[error("Failed to reset document status: {0}")]
    Status(String),
    #[error("Failed to re-enqueue document: {0}")]
    Queue(String),
}

#[tracing::instrument(skip(state))]
pub async fn handle(
    state: &FeatureState,
    doc_id: Uuid,
) -> Result<ReprocessDocumentResponse, ReprocessDocumentError> {
    let record = state.status.get(doc_id).await.map_err(|e| match e {
        StatusError::NotFound(id) => ReprocessDocumentError::NotFound(id),
        other => ReprocessDocumentError::Status(other.to_string()),
    })?;

    let vectors_deleted = state
        .indexer
        .delete(doc_id)
        .await
        .map_err(|e| ReprocessDocumentError::Index(e.to_string()))?;

    // Force back to uploaded regardless of current status; this also
    // clears any lock left by a dead worker.
    let update = TransitionUpdate {
        message: Some("Reprocess requested".to_string()),
        skip_validation: true,
        ..Default::default()
    };
    state
        .status
        .transition(doc_id, DocumentStatus::Uploaded, update)
        .await
        .map_err(|e| ReprocessDocumentError::Status(e.to_string()))?;

    state
        .queue
        .send(&IngestMessage {
            doc_id,
            storage_key: record.storage_key.clone(),
        })
        .await
        .map_err(|e| ReprocessDocumentError::Queue(e.to_string()))?;

    tracing::info!(
        doc_id = %doc_id,
        vectors_deleted,
        previous_status = %record.status,
        "Document queued for reprocessing"
    );

    Ok(ReprocessDocumentResponse {
        doc_id,
        status: DocumentStatus::Uploaded.as_str().to_string(),
        vectors_deleted,
    })
}
