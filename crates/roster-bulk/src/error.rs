//! Error types for bulk orchestration
//!
//! Per-item and per-chunk failures are data on [`crate::BatchJob`]; these
//! errors cover misuse only.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BulkError {
    #[error("Invalid bulk configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid bulk operation: {0}")]
    InvalidOperation(String),
}
