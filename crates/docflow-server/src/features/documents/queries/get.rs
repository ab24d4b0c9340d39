//! Single-document query

use crate::features::documents::types::DocumentView;
use crate::features::FeatureState;
use crate::status::StatusError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GetDocumentError {
    #[error("Document not found: {0}")]
    NotFound(Uuid),
    #[error("Status store error: {0}")]
    Store(String),
}

#[tracing::instrument(skip(state))]
pub async fn handle(state: &FeatureState, doc_id: Uuid) -> Result<DocumentView, GetDocumentError> {
    let record = state.status.get(doc_id).await.map_err(|e| match e {
        StatusError::NotFound(id) => GetDocumentError::NotFound(id),
        other => GetDocumentError::Store(other.to_string()),
    })?;

    Ok(record.into())
}
