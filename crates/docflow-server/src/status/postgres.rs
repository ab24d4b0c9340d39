//! Postgres-backed status store
//!
//! Every mutation is a single conditional `UPDATE` or `INSERT`, so the
//! database enforces the state machine and lock semantics even with many
//! concurrent API and worker processes.

use super::{
    DocumentFilter, DocumentRecord, DocumentStatus, LockOutcome, NewDocument, StatusError,
    StatusResult, StatusStore, TransitionUpdate,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PostgresStatusStore {
    pool: PgPool,
}

impl PostgresStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RECORD_COLUMNS: &str =
    "doc_id, filename, uploaded_by, storage_key, checksum, size_bytes, status, \
     status_message, page_count, chunk_count, lock_owner, lock_acquired_at, created_at, updated_at";

fn col<'r, T>(row: &'r PgRow, name: &str) -> StatusResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StatusError::Store(e.to_string()))
}

fn row_to_record(row: &PgRow) -> StatusResult<DocumentRecord> {
    let status_str: String = col(row, "status")?;
    let status = DocumentStatus::from_str(&status_str)
        .ok_or_else(|| StatusError::Store(format!("Unknown status in database: {}", status_str)))?;

    Ok(DocumentRecord {
        doc_id: col(row, "doc_id")?,
        filename: col(row, "filename")?,
        uploaded_by: col(row, "uploaded_by")?,
        storage_key: col(row, "storage_key")?,
        checksum: col(row, "checksum")?,
        size_bytes: col(row, "size_bytes")?,
        status,
        status_message: col(row, "status_message")?,
        page_count: col(row, "page_count")?,
        chunk_count: col(row, "chunk_count")?,
        lock_owner: col(row, "lock_owner")?,
        lock_acquired_at: col(row, "lock_acquired_at")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

/// Statuses from which `to` may legally be reached.
fn allowed_sources(to: DocumentStatus) -> Vec<&'static str> {
    [
        DocumentStatus::Uploaded,
        DocumentStatus::Processing,
        DocumentStatus::Done,
        DocumentStatus::Failed,
    ]
    .iter()
    .filter(|from| from.valid_transitions().contains(&to))
    .map(|from| from.as_str())
    .collect()
}

#[async_trait::async_trait]
impl StatusStore for PostgresStatusStore {
    async fn create(&self, doc: NewDocument) -> StatusResult<DocumentRecord> {
        let sql = format!(
            "INSERT INTO documents \
                 (doc_id, filename, uploaded_by, storage_key, checksum, size_bytes, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'uploaded') \
             ON CONFLICT (doc_id) DO NOTHING \
             RETURNING {RECORD_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(doc.doc_id)
            .bind(&doc.filename)
            .bind(&doc.uploaded_by)
            .bind(&doc.storage_key)
            .bind(&doc.checksum)
            .bind(doc.size_bytes)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StatusError::Store(e.to_string()))?;

        match row {
            Some(row) => row_to_record(&row),
            None => Err(StatusError::AlreadyExists(doc.doc_id)),
        }
    }

    async fn get(&self, doc_id: Uuid) -> StatusResult<DocumentRecord> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM documents WHERE doc_id = $1");

        let row = sqlx::query(&sql)
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StatusError::Store(e.to_string()))?;

        match row {
            Some(row) => row_to_record(&row),
            None => Err(StatusError::NotFound(doc_id)),
        }
    }

    async fn list(&self, filter: &DocumentFilter) -> StatusResult<(Vec<DocumentRecord>, i64)> {
        let status_filter = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status_filter)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StatusError::Store(e.to_string()))?;

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM documents \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC \
             LIMIT $2 OFFSET $3"
        );

        let rows = sqlx::query(&sql)
            .bind(status_filter)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StatusError::Store(e.to_string()))?;

        let records = rows
            .iter()
            .map(row_to_record)
            .collect::<StatusResult<Vec<_>>>()?;

        Ok((records, total))
    }

    async fn transition(
        &self,
        doc_id: Uuid,
        to: DocumentStatus,
        update: TransitionUpdate,
    ) -> StatusResult<DocumentRecord> {
        let sources: Vec<String> = if update.skip_validation {
            vec![
                "uploaded".to_string(),
                "processing".to_string(),
                "done".to_string(),
                "failed".to_string(),
            ]
        } else {
            allowed_sources(to).into_iter().map(String::from).collect()
        };

        // The status <> $2 guard makes same-status writes no-ops; the
        // zero-row case below distinguishes them from invalid transitions.
        let sql = format!(
            "UPDATE documents SET \
                 status = $2, \
                 status_message = $3, \
                 page_count = COALESCE($4, page_count), \
                 chunk_count = COALESCE($5, chunk_count), \
                 lock_owner = CASE WHEN $2 IN ('done', 'failed', 'uploaded') \
                     THEN NULL ELSE lock_owner END, \
                 lock_acquired_at = CASE WHEN $2 IN ('done', 'failed', 'uploaded') \
                     THEN NULL ELSE lock_acquired_at END, \
                 updated_at = NOW() \
             WHERE doc_id = $1 AND status <> $2 AND status = ANY($6) \
             RETURNING {RECORD_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(doc_id)
            .bind(to.as_str())
            .bind(&update.message)
            .bind(update.page_count)
            .bind(update.chunk_count)
            .bind(&sources)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StatusError::Store(e.to_string()))?;

        if let Some(row) = row {
            return row_to_record(&row);
        }

        // No row updated: the record is missing, already in `to`, or the
        // transition is not allowed from its current status.
        let current = self.get(doc_id).await?;
        if current.status == to {
            return Ok(current);
        }

        Err(StatusError::InvalidTransition {
            doc_id,
            from: current.status,
            to,
        })
    }

    async fn acquire_lock(&self, doc_id: Uuid, owner: &str) -> StatusResult<LockOutcome> {
        let result = sqlx::query(
            "UPDATE documents SET lock_owner = $2, lock_acquired_at = NOW() \
             WHERE doc_id = $1 \
               AND (lock_owner IS NULL OR lock_owner = $2 OR status IN ('done', 'failed'))",
        )
        .bind(doc_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(|e| StatusError::Store(e.to_string()))?;

        if result.rows_affected() == 1 {
            return Ok(LockOutcome::Acquired);
        }

        // Distinguish a held lock from a missing record.
        self.get(doc_id).await?;
        Ok(LockOutcome::Held)
    }

    async fn delete(&self, doc_id: Uuid) -> StatusResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE doc_id = $1")
            .bind(doc_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StatusError::Store(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StatusError::NotFound(doc_id));
        }

        Ok(())
    }
}
