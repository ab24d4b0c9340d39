//! Vector index
//!
//! The Postgres implementation stores chunk text and embeddings in the
//! `document_chunks` table; similarity search over those vectors is a
//! separate concern and lives outside this crate. The in-memory
//! implementation serves tests and local runs. Both preserve the
//! contract that matters to the worker: upsert is all-or-nothing per
//! document, and delete reports how many entries it removed.

use super::{Chunk, Indexer};
use crate::retry::{ErrorKind, StageError};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Postgres-backed chunk index
pub struct PostgresIndexer {
    pool: PgPool,
}

impl PostgresIndexer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> StageError {
    StageError::new(ErrorKind::Unavailable, format!("Index database error: {}", e))
}

#[async_trait::async_trait]
impl Indexer for PostgresIndexer {
    async fn upsert(
        &self,
        doc_id: Uuid,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        page_count: usize,
    ) -> Result<usize, StageError> {
        if chunks.len() != vectors.len() {
            return Err(StageError::new(
                ErrorKind::InvalidInput,
                format!(
                    "Chunk/vector count mismatch: {} chunks, {} vectors",
                    chunks.len(),
                    vectors.len()
                ),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Replace wholesale so a reprocessed document never mixes old and
        // new chunks.
        sqlx::query("DELETE FROM document_chunks WHERE doc_id = $1")
            .bind(doc_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO document_chunks
                    (doc_id, chunk_index, content, start_offset, end_offset, embedding, page_count)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(doc_id)
            .bind(chunk.index)
            .bind(&chunk.text)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(vector)
            .bind(page_count as i32)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;

        Ok(chunks.len())
    }

    async fn delete(&self, doc_id: Uuid) -> Result<usize, StageError> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE doc_id = $1")
            .bind(doc_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() as usize)
    }
}

/// One indexed chunk with its vector
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_index: i32,
    pub text: String,
    pub vector: Vec<f32>,
    pub page_count: usize,
}

#[derive(Default)]
pub struct InMemoryIndexer {
    entries: Mutex<HashMap<Uuid, Vec<IndexEntry>>>,
}

impl InMemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries indexed for a document. Test helper.
    pub fn entries_for(&self, doc_id: Uuid) -> Vec<IndexEntry> {
        self.entries
            .lock()
            .map(|e| e.get(&doc_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Indexer for InMemoryIndexer {
    async fn upsert(
        &self,
        doc_id: Uuid,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        page_count: usize,
    ) -> Result<usize, StageError> {
        if chunks.len() != vectors.len() {
            return Err(StageError::new(
                ErrorKind::InvalidInput,
                format!(
                    "Chunk/vector count mismatch: {} chunks, {} vectors",
                    chunks.len(),
                    vectors.len()
                ),
            ));
        }

        let new_entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vector)| IndexEntry {
                chunk_index: chunk.index,
                text: chunk.text.clone(),
                vector: vector.clone(),
                page_count,
            })
            .collect();

        let count = new_entries.len();
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StageError::new(ErrorKind::Unknown, e.to_string()))?;
        entries.insert(doc_id, new_entries);

        Ok(count)
    }

    async fn delete(&self, doc_id: Uuid) -> Result<usize, StageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StageError::new(ErrorKind::Unknown, e.to_string()))?;
        Ok(entries.remove(&doc_id).map(|e| e.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: i32, text: &str) -> Chunk {
        Chunk {
            index,
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_previous_entries() {
        let indexer = InMemoryIndexer::new();
        let doc_id = Uuid::new_v4();

        let chunks = vec![chunk(0, "a"), chunk(1, "b")];
        let vectors = vec![vec![1.0], vec![2.0]];
        assert_eq!(indexer.upsert(doc_id, &chunks, &vectors, 1).await.unwrap(), 2);

        let chunks = vec![chunk(0, "c")];
        let vectors = vec![vec![3.0]];
        assert_eq!(indexer.upsert(doc_id, &chunks, &vectors, 1).await.unwrap(), 1);

        let entries = indexer.entries_for(doc_id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "c");
    }

    #[tokio::test]
    async fn test_delete_reports_removed_count() {
        let indexer = InMemoryIndexer::new();
        let doc_id = Uuid::new_v4();

        let chunks = vec![chunk(0, "a"), chunk(1, "b"), chunk(2, "c")];
        let vectors = vec![vec![0.0]; 3];
        indexer.upsert(doc_id, &chunks, &vectors, 2).await.unwrap();

        assert_eq!(indexer.delete(doc_id).await.unwrap(), 3);
        assert_eq!(indexer.delete(doc_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_rejects_mismatched_lengths() {
        let indexer = InMemoryIndexer::new();
        let err = indexer
            .upsert(Uuid::new_v4(), &[chunk(0, "a")], &[], 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }
}
