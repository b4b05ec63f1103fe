//! Error types for audit operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors that can occur while writing or reading the audit trail
#[derive(Error, Debug)]
pub enum AuditError {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to open the journal file
    #[error("Failed to open audit journal: {path}")]
    OpenFailed { path: PathBuf },

    /// Journal line could not be parsed
    #[error("Invalid journal entry at line {line}: {reason}")]
    InvalidEntry { line: usize, reason: String },

    /// Update for an operation that was never created
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Invalid operation type or status name
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Sink refused the write
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

impl AuditError {
    pub fn open_failed<P: Into<PathBuf>>(path: P) -> Self {
        AuditError::OpenFailed { path: path.into() }
    }

    pub fn invalid_entry(line: usize, reason: impl Into<String>) -> Self {
        AuditError::InvalidEntry {
            line,
            reason: reason.into(),
        }
    }

    pub fn unknown_operation(id: impl Into<String>) -> Self {
        AuditError::UnknownOperation(id.into())
    }

    pub fn invalid_value(value: impl Into<String>) -> Self {
        AuditError::InvalidValue(value.into())
    }
}
