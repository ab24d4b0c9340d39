//! Document feature slice
//!
//! Upload (transactional create across object store, status store, and
//! queue), read queries, and administrative reprocessing.

pub mod commands;
pub mod queries;
pub mod routes;
pub mod types;

pub use routes::documents_routes;
