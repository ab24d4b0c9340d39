//! Shared document API types

use crate::status::DocumentRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Document representation returned by the read API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentView {
    pub doc_id: Uuid,
    pub filename: String,
    pub uploaded_by: String,
    pub storage_key: String,
    pub checksum: String,
    pub size_bytes: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DocumentRecord> for DocumentView {
    fn from(record: DocumentRecord) -> Self {
        Self {
            doc_id: record.doc_id,
            filename: record.filename,
            uploaded_by: record.uploaded_by,
            storage_key: record.storage_key,
            checksum: record.checksum,
            size_bytes: record.size_bytes,
            status: record.status.as_str().to_string(),
            status_message: record.status_message,
            page_count: record.page_count,
            chunk_count: record.chunk_count,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
