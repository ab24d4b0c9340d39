//! Document listing with status filter and pagination

use crate::features::documents::types::DocumentView;
use crate::features::shared::pagination::{Paginated, PaginationParams};
use crate::features::FeatureState;
use crate::status::{DocumentFilter, DocumentStatus};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListDocumentsQuery {
    /// Optional status filter (`uploaded`, `processing`, `done`, `failed`).
    pub status: Option<String>,
    #[serde(flatten)]
    pub pagination: PaginationParams,
}

#[derive(Debug, thiserror::Error)]
pub enum ListDocumentsError {
    #[error("Invalid status filter: {0}")]
    InvalidStatus(String),
    #[error("{0}")]
    InvalidPagination(&'static str),
    #[error("Status store error: {0}")]
    Store(String),
}

#[tracing::instrument(skip(state))]
pub async fn handle(
    state: &FeatureState,
    query: ListDocumentsQuery,
) -> Result<Paginated<DocumentView>, ListDocumentsError> {
    query
        .pagination
        .validate()
        .map_err(ListDocumentsError::InvalidPagination)?;

    let status = match &query.status {
        Some(raw) => Some(
            DocumentStatus::from_str(raw)
                .ok_or_else(|| ListDocumentsError::InvalidStatus(raw.clone()))?,
        ),
        None => None,
    };

    let filter = DocumentFilter {
        status,
        limit: query.pagination.per_page(),
        offset: query.pagination.offset(),
    };

    let (records, total) = state
        .status
        .list(&filter)
        .await
        .map_err(|e| ListDocumentsError::Store(e.to_string()))?;

    let items = records.into_iter().map(DocumentView::from).collect();
    Ok(Paginated::from_items(items, &query.pagination, total))
}
