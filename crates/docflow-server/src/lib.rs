//! Docflow server library
//!
//! Queue-driven document ingestion: uploads land in object storage, a
//! metadata record tracks each document through a small status state
//! machine, and a worker drains the ingest queue to classify, extract,
//! chunk, embed, and index every document.

pub mod api;
pub mod config;
pub mod db;
pub mod features;
pub mod middleware;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod status;
pub mod storage;

pub use config::Config;
pub use db::{create_pool, DbError};
