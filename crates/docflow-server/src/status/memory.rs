//! In-memory status store
//!
//! Backs tests and local development without a database. Mirrors the
//! conditional-write semantics of the Postgres store behind a single mutex.

use super::{
    DocumentFilter, DocumentRecord, DocumentStatus, LockOutcome, NewDocument, StatusError,
    StatusResult, StatusStore, TransitionUpdate,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryStatusStore {
    records: Mutex<HashMap<Uuid, DocumentRecord>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn create(&self, doc: NewDocument) -> StatusResult<DocumentRecord> {
        let mut records = self.records.lock().map_err(|e| StatusError::Store(e.to_string()))?;

        if records.contains_key(&doc.doc_id) {
            return Err(StatusError::AlreadyExists(doc.doc_id));
        }

        let now = Utc::now();
        let record = DocumentRecord {
            doc_id: doc.doc_id,
            filename: doc.filename,
            uploaded_by: doc.uploaded_by,
            storage_key: doc.storage_key,
            checksum: doc.checksum,
            size_bytes: doc.size_bytes,
            status: DocumentStatus::Uploaded,
            status_message: None,
            page_count: None,
            chunk_count: None,
            lock_owner: None,
            lock_acquired_at: None,
            created_at: now,
            updated_at: now,
        };
        records.insert(doc.doc_id, record.clone());

        Ok(record)
    }

    async fn get(&self, doc_id: Uuid) -> StatusResult<DocumentRecord> {
        let records = self.records.lock().map_err(|e| StatusError::Store(e.to_string()))?;
        records
            .get(&doc_id)
            .cloned()
            .ok_or(StatusError::NotFound(doc_id))
    }

    async fn list(&self, filter: &DocumentFilter) -> StatusResult<(Vec<DocumentRecord>, i64)> {
        let records = self.records.lock().map_err(|e| StatusError::Store(e.to_string()))?;

        let mut matching: Vec<DocumentRecord> = records
            .values()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();

        Ok((page, total))
    }

    async fn transition(
        &self,
        doc_id: Uuid,
        to: DocumentStatus,
        update: TransitionUpdate,
    ) -> StatusResult<DocumentRecord> {
        let mut records = self.records.lock().map_err(|e| StatusError::Store(e.to_string()))?;

        let record = records.get_mut(&doc_id).ok_or(StatusError::NotFound(doc_id))?;

        if record.status == to {
            return Ok(record.clone());
        }

        if !update.skip_validation && !record.status.can_transition_to(to) {
            return Err(StatusError::InvalidTransition {
                doc_id,
                from: record.status,
                to,
            });
        }

        record.status = to;
        record.status_message = update.message;
        if update.page_count.is_some() {
            record.page_count = update.page_count;
        }
        if update.chunk_count.is_some() {
            record.chunk_count = update.chunk_count;
        }
        if to.is_terminal() || to == DocumentStatus::Uploaded {
            record.lock_owner = None;
            record.lock_acquired_at = None;
        }
        record.updated_at = Utc::now();

        Ok(record.clone())
    }

    async fn acquire_lock(&self, doc_id: Uuid, owner: &str) -> StatusResult<LockOutcome> {
        let mut records = self.records.lock().map_err(|e| StatusError::Store(e.to_string()))?;

        let record = records.get_mut(&doc_id).ok_or(StatusError::NotFound(doc_id))?;

        let acquirable = record.lock_owner.is_none()
            || record.lock_owner.as_deref() == Some(owner)
            || record.status.is_terminal();

        if !acquirable {
            return Ok(LockOutcome::Held);
        }

        record.lock_owner = Some(owner.to_string());
        record.lock_acquired_at = Some(Utc::now());

        Ok(LockOutcome::Acquired)
    }

    async fn delete(&self, doc_id: Uuid) -> StatusResult<()> {
        let mut records = self.records.lock().map_err(|e| StatusError::Store(e.to_string()))?;
        records
            .remove(&doc_id)
            .map(|_| ())
            .ok_or(StatusError::NotFound(doc_id))
    }
}
