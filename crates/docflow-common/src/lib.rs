//! Docflow Common Library
//!
//! Shared types, utilities, and error handling for the docflow workspace.
//!
//! # Overview
//!
//! This crate provides common functionality used across all docflow members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: Payload integrity helpers
//! - **Logging**: Centralized tracing configuration
//!
//! # Example
//!
//! ```no_run
//! use docflow_common::{Result, checksum};
//!
//! fn fingerprint(payload: &[u8]) -> Result<String> {
//!     Ok(checksum::sha256_hex(payload))
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{DocflowError, Result};
