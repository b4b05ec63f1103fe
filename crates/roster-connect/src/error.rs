//! Error types for the roster-connect crate

use roster_core_interface::{CommandScript, EngineError, EngineErrorKind, TokenError};
use roster_core_resilience::{classify_message, ErrorClass};
use std::time::Duration;
use thiserror::Error;

/// A command that failed for a business reason, or kept failing transiently
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Command '{script}' failed ({kind}) after {attempts} attempt(s): {message}")]
pub struct CommandError {
    /// Display form of the script
    pub script: String,
    pub kind: EngineErrorKind,
    pub message: String,
    pub attempts: u32,
}

impl CommandError {
    pub fn from_engine(script: &CommandScript, err: &EngineError, attempts: u32) -> Self {
        Self {
            script: script.render(),
            kind: err.kind,
            message: err.message.clone(),
            attempts,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Circuit breaker is open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("Transient failure persisted after {attempts} attempt(s): {source}")]
    Transient { attempts: u32, source: EngineError },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Session initialization failed: {0}")]
    SessionInit(EngineError),

    #[error("Token acquisition failed: {0}")]
    Token(#[from] TokenError),
}

impl ConnectError {
    /// Failures of the connection itself rather than of the command
    pub fn is_connection_layer(&self) -> bool {
        match self {
            ConnectError::NotConnected(_)
            | ConnectError::Authentication(_)
            | ConnectError::CircuitOpen { .. }
            | ConnectError::SessionInit(_)
            | ConnectError::Token(_) => true,
            ConnectError::Transient { .. } | ConnectError::Command(_) => false,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ConnectError::CircuitOpen { .. })
    }

    /// Short category for logs and audit entries
    pub fn category(&self) -> &'static str {
        match self {
            ConnectError::NotConnected(_) => "not_connected",
            ConnectError::Authentication(_) => "authentication",
            ConnectError::CircuitOpen { .. } => "circuit_open",
            ConnectError::Transient { .. } => "transient",
            ConnectError::Command(_) => "command",
            ConnectError::SessionInit(_) => "session_init",
            ConnectError::Token(_) => "token",
        }
    }
}

/// Map a boundary error to its retry class
///
/// Structured kinds win; unclassified errors fall back to message matching.
pub fn classify(err: &EngineError) -> ErrorClass {
    match err.kind {
        EngineErrorKind::Unauthorized
        | EngineErrorKind::TokenExpired
        | EngineErrorKind::SessionInvalid => ErrorClass::ConnectionRelated,
        EngineErrorKind::RateLimited | EngineErrorKind::Timeout | EngineErrorKind::Unavailable => {
            ErrorClass::Transient
        }
        EngineErrorKind::InvalidInput
        | EngineErrorKind::NotFound
        | EngineErrorKind::PermissionDenied => ErrorClass::Fatal,
        EngineErrorKind::Unclassified => classify_message(&err.message),
    }
}

/// Error raised while opening a session
pub(crate) fn session_error(err: EngineError) -> ConnectError {
    match classify(&err) {
        ErrorClass::ConnectionRelated => ConnectError::Authentication(err.message),
        _ => ConnectError::SessionInit(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_structured_kinds() {
        assert_eq!(
            classify(&EngineError::unauthorized("x")),
            ErrorClass::ConnectionRelated
        );
        assert_eq!(classify(&EngineError::timeout("x")), ErrorClass::Transient);
        assert_eq!(classify(&EngineError::not_found("x")), ErrorClass::Fatal);
    }

    #[test]
    fn test_classify_falls_back_to_message() {
        assert_eq!(
            classify(&EngineError::from_message("Access token has expired")),
            ErrorClass::ConnectionRelated
        );
        assert_eq!(
            classify(&EngineError::from_message("Request throttled")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&EngineError::from_message("User not in directory")),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_connection_layer_predicate() {
        assert!(ConnectError::NotConnected("no credential".into()).is_connection_layer());
        assert!(ConnectError::CircuitOpen {
            retry_after: Duration::from_secs(1)
        }
        .is_circuit_open());

        let cmd = CommandError::from_engine(
            &CommandScript::new("Get-Team").param("GroupId", "t-1"),
            &EngineError::not_found("no such team"),
            1,
        );
        assert_eq!(cmd.script, "Get-Team -GroupId 't-1'");
        assert!(!ConnectError::Command(cmd).is_connection_layer());
        assert!(!ConnectError::Transient {
            attempts: 3,
            source: EngineError::timeout("slow")
        }
        .is_connection_layer());
    }

    #[test]
    fn test_session_error_mapping() {
        assert!(matches!(
            session_error(EngineError::unauthorized("bad token")),
            ConnectError::Authentication(_)
        ));
        assert!(matches!(
            session_error(EngineError::from_message("module load failed")),
            ConnectError::SessionInit(_)
        ));
    }
}
