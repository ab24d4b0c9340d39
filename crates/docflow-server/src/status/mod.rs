//! Document status tracking
//!
//! Each uploaded document carries a lifecycle status that moves through a
//! fixed state machine:
//!
//! ```text
//! uploaded ──> processing ──> done (terminal)
//!     │            │
//!     v            v
//!   failed <────────
//!     │
//!     ├──> processing (retry)
//!     └──> uploaded (reset)
//! ```
//!
//! Transitions are enforced by the [`StatusStore`] implementations with a
//! single conditional write, so concurrent writers cannot race a record
//! into an inconsistent state. Applying the current status again is an
//! idempotent no-op that leaves the record untouched.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use memory::InMemoryStatusStore;
pub use postgres::PostgresStatusStore;

/// Lifecycle status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Done,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Done => "done",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(DocumentStatus::Uploaded),
            "processing" => Some(DocumentStatus::Processing),
            "done" => Some(DocumentStatus::Done),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    /// Whether this status ends a processing attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Done | DocumentStatus::Failed)
    }

    /// Statuses reachable from this one. `done` has no successors; a
    /// finished document only leaves that state through the
    /// validation-skipping reprocess reset.
    pub fn valid_transitions(&self) -> &'static [DocumentStatus] {
        match self {
            DocumentStatus::Uploaded => &[DocumentStatus::Processing, DocumentStatus::Failed],
            DocumentStatus::Processing => &[DocumentStatus::Done, DocumentStatus::Failed],
            DocumentStatus::Done => &[],
            DocumentStatus::Failed => &[DocumentStatus::Processing, DocumentStatus::Uploaded],
        }
    }

    /// Whether `to` is a legal next status. Same-status is allowed and
    /// treated as a no-op by the stores.
    pub fn can_transition_to(&self, to: DocumentStatus) -> bool {
        *self == to || self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tracked document record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_id: Uuid,
    pub filename: String,
    /// Identity the upload was attributed to.
    pub uploaded_by: String,
    pub storage_key: String,
    pub checksum: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_acquired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new document record
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub doc_id: Uuid,
    pub filename: String,
    pub uploaded_by: String,
    pub storage_key: String,
    pub checksum: String,
    pub size_bytes: i64,
}

/// Optional fields applied alongside a status transition
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    /// Human-readable detail, typically an error message for `failed`.
    pub message: Option<String>,
    pub page_count: Option<i32>,
    pub chunk_count: Option<i32>,
    /// Skip the transition table check. Used by recovery paths that force
    /// a record back to a known-good state.
    pub skip_validation: bool,
}

/// Errors from status store operations
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Document not found: {0}")]
    NotFound(Uuid),

    #[error("Document already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Invalid status transition for {doc_id}: {from} -> {to}")]
    InvalidTransition {
        doc_id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("Status store error: {0}")]
    Store(String),
}

pub type StatusResult<T> = Result<T, StatusError>;

/// Filter and paging for document listings
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub status: Option<DocumentStatus>,
    pub limit: i64,
    pub offset: i64,
}

/// Outcome of a lock acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The caller now holds the lock.
    Acquired,
    /// Another live worker holds the lock.
    Held,
}

/// Persistent store for document lifecycle state.
///
/// All mutating operations are conditional writes: they either apply
/// atomically or fail without side effects.
#[async_trait::async_trait]
pub trait StatusStore: Send + Sync {
    /// Create a record for a new document in `uploaded` status.
    ///
    /// Fails with [`StatusError::AlreadyExists`] if a record with the same
    /// `doc_id` is already present. The existing record is never modified.
    async fn create(&self, doc: NewDocument) -> StatusResult<DocumentRecord>;

    /// Fetch a single record.
    async fn get(&self, doc_id: Uuid) -> StatusResult<DocumentRecord>;

    /// List records with optional status filtering, newest first.
    /// Returns the page and the total count matching the filter.
    async fn list(&self, filter: &DocumentFilter) -> StatusResult<(Vec<DocumentRecord>, i64)>;

    /// Move a document to a new status.
    ///
    /// Rejects transitions the state machine does not allow unless
    /// `update.skip_validation` is set. Applying the current status is a
    /// no-op that does not bump `updated_at`. Transitions into a terminal
    /// status clear the processing lock.
    async fn transition(
        &self,
        doc_id: Uuid,
        to: DocumentStatus,
        update: TransitionUpdate,
    ) -> StatusResult<DocumentRecord>;

    /// Try to acquire the per-document processing lock for `owner`.
    ///
    /// Succeeds when the lock is free, already held by `owner`, or the
    /// document sits in a terminal status (a finished attempt cannot be
    /// holding a live lock, so a stale one may be taken over).
    async fn acquire_lock(&self, doc_id: Uuid, owner: &str) -> StatusResult<LockOutcome>;

    /// Delete a record. Used to compensate a failed upload transaction.
    async fn delete(&self, doc_id: Uuid) -> StatusResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Done,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_transition_table() {
        use DocumentStatus::*;

        assert!(Uploaded.can_transition_to(Processing));
        assert!(Uploaded.can_transition_to(Failed));
        assert!(!Uploaded.can_transition_to(Done));

        assert!(Processing.can_transition_to(Done));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Uploaded));

        // done is terminal
        assert!(!Done.can_transition_to(Processing));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Done.can_transition_to(Uploaded));

        assert!(Failed.can_transition_to(Processing));
        assert!(Failed.can_transition_to(Uploaded));
        assert!(!Failed.can_transition_to(Done));
    }

    #[test]
    fn test_same_status_is_allowed() {
        for status in [
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Done,
            DocumentStatus::Failed,
        ] {
            assert!(status.can_transition_to(status));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!DocumentStatus::Uploaded.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
        assert!(DocumentStatus::Done.is_terminal());
        assert!(DocumentStatus::Failed.is_terminal());
    }
}
