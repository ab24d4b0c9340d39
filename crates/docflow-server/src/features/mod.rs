//! Feature modules implementing the docflow API
//!
//! Each feature is a vertical slice with its own commands, queries, and
//! routes:
//!
//! - **documents**: upload, read, and reprocess operations for tracked
//!   documents
//!
//! Commands own their validation and error types; routes translate them
//! to HTTP.

pub mod documents;
pub mod shared;

use crate::pipeline::Indexer;
use crate::queue::DocumentQueue;
use crate::status::StatusStore;
use crate::storage::ObjectStore;
use axum::Router;
use std::sync::Arc;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub status: Arc<dyn StatusStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn DocumentQueue>,
    pub indexer: Arc<dyn Indexer>,
}

/// Creates the main API router with all feature routes mounted
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().nest("/documents", documents::documents_routes().with_state(state))
}
