/*!
 * Error types for Roster
 */

use roster_bulk::{BatchStatus, BulkError};
use roster_connect::{CommandError, ConnectError};
use roster_core_audit::AuditError;
use roster_core_interface::{EngineError, TokenError};
use roster_core_resilience::ResilienceError;
use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RosterError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Error, Debug)]
pub enum RosterError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection-layer or command failure
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Engine could not be constructed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Token could not be obtained
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Invalid bulk operation or configuration
    #[error(transparent)]
    Bulk(#[from] BulkError),

    /// Audit journal error
    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),

    /// Remote object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote returned something we could not interpret
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl RosterError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RosterError::Connect(e) if !e.is_connection_layer() => EXIT_PARTIAL,
            RosterError::NotFound(_) | RosterError::UnexpectedResponse(_) => EXIT_PARTIAL,
            _ => EXIT_FATAL,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            RosterError::Config(_) | RosterError::Bulk(_) => ErrorCategory::Configuration,
            RosterError::Io(_) => ErrorCategory::IoError,
            RosterError::Connect(e) if e.is_connection_layer() => ErrorCategory::Connection,
            RosterError::Connect(_) => ErrorCategory::Command,
            RosterError::Engine(_) => ErrorCategory::Connection,
            RosterError::Token(_) => ErrorCategory::Security,
            RosterError::Audit(_) => ErrorCategory::Audit,
            RosterError::NotFound(_) | RosterError::UnexpectedResponse(_) => ErrorCategory::Remote,
        }
    }
}

impl From<CommandError> for RosterError {
    fn from(err: CommandError) -> Self {
        RosterError::Connect(ConnectError::Command(err))
    }
}

impl From<ResilienceError> for RosterError {
    fn from(err: ResilienceError) -> Self {
        RosterError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for RosterError {
    fn from(err: toml::de::Error) -> Self {
        RosterError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for RosterError {
    fn from(err: toml::ser::Error) -> Self {
        RosterError::Config(format!("TOML serialize error: {}", err))
    }
}

/// Exit code for a finished batch
pub fn exit_code_for(status: BatchStatus) -> i32 {
    match status {
        BatchStatus::Completed => EXIT_SUCCESS,
        BatchStatus::PartialSuccess => EXIT_PARTIAL,
        BatchStatus::Failed | BatchStatus::Pending | BatchStatus::InProgress => EXIT_FATAL,
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    IoError,
    /// Session, circuit breaker and engine failures
    Connection,
    /// A command the remote rejected or kept failing
    Command,
    Security,
    Audit,
    Remote,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::Command => write!(f, "command"),
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::Audit => write!(f, "audit"),
            ErrorCategory::Remote => write!(f, "remote"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core_interface::EngineErrorKind;
    use std::time::Duration;

    fn command_error() -> CommandError {
        CommandError {
            script: "Get-Team -GroupId 't-1'".into(),
            kind: EngineErrorKind::NotFound,
            message: "no such team".into(),
            attempts: 1,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RosterError::Config("bad".into()).exit_code(), EXIT_FATAL);
        assert_eq!(
            RosterError::Connect(ConnectError::CircuitOpen {
                retry_after: Duration::from_secs(30)
            })
            .exit_code(),
            EXIT_FATAL
        );
        assert_eq!(RosterError::from(command_error()).exit_code(), EXIT_PARTIAL);
        assert_eq!(RosterError::NotFound("t-1".into()).exit_code(), EXIT_PARTIAL);
    }

    #[test]
    fn test_batch_exit_codes() {
        assert_eq!(exit_code_for(BatchStatus::Completed), EXIT_SUCCESS);
        assert_eq!(exit_code_for(BatchStatus::PartialSuccess), EXIT_PARTIAL);
        assert_eq!(exit_code_for(BatchStatus::Failed), EXIT_FATAL);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            RosterError::Connect(ConnectError::NotConnected("x".into())).category(),
            ErrorCategory::Connection
        );
        assert_eq!(
            RosterError::from(command_error()).category(),
            ErrorCategory::Command
        );
        assert_eq!(ErrorCategory::Security.to_string(), "security");
    }

    #[test]
    fn test_command_error_display_is_transparent() {
        let err = RosterError::from(command_error());
        assert!(err.to_string().contains("no such team"));
    }
}
