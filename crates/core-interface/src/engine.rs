//! Execution engine boundary
//!
//! The engine runs [`CommandScript`]s against the remote directory service on
//! behalf of the connection manager. A session is the stateful, authenticated
//! handle; the engine is the factory that opens sessions.

use crate::command::{CommandOutput, CommandScript};
use crate::token::AccessToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured failure kinds reported by the engine boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    /// Bearer token rejected
    Unauthorized,
    /// Token expired mid-session
    TokenExpired,
    /// Session handle is broken or was never opened
    SessionInvalid,
    /// Remote throttling
    RateLimited,
    /// Deadline exceeded
    Timeout,
    /// Remote temporarily unavailable
    Unavailable,
    /// Rejected input
    InvalidInput,
    /// Target does not exist
    NotFound,
    /// Caller lacks permission
    PermissionDenied,
    /// The engine could not classify the failure; fall back to the message
    Unclassified,
}

impl EngineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineErrorKind::Unauthorized => "unauthorized",
            EngineErrorKind::TokenExpired => "token_expired",
            EngineErrorKind::SessionInvalid => "session_invalid",
            EngineErrorKind::RateLimited => "rate_limited",
            EngineErrorKind::Timeout => "timeout",
            EngineErrorKind::Unavailable => "unavailable",
            EngineErrorKind::InvalidInput => "invalid_input",
            EngineErrorKind::NotFound => "not_found",
            EngineErrorKind::PermissionDenied => "permission_denied",
            EngineErrorKind::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by the execution engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// An error the boundary could not classify
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Unclassified, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Timeout, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Unauthorized, message)
    }

    pub fn session_invalid(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::SessionInvalid, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::NotFound, message)
    }
}

/// Parameters for opening a session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Bearer token for the remote service
    pub token: AccessToken,
    /// Requested permission scopes
    pub scopes: Vec<String>,
    /// Degraded mode: the engine should skip optional initialization
    /// (module preloading, capability discovery) and open a bare session
    pub degraded: bool,
}

/// An authenticated, stateful session against the remote service
///
/// Sessions are not required to be safe for concurrent use; the connection
/// manager serializes every call.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Run a command and return its structured output
    async fn invoke(&mut self, script: &CommandScript) -> Result<CommandOutput, EngineError>;

    /// Cheap local health check; must not perform I/O
    fn is_healthy(&self) -> bool;

    /// Tear down the remote session
    async fn close(&mut self) -> Result<(), EngineError>;
}

/// Factory for engine sessions
#[async_trait]
pub trait ExecutionEngine: Send + Sync + 'static {
    /// Open a new session
    async fn open_session(
        &self,
        request: &SessionRequest,
    ) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Engine name for logs
    fn name(&self) -> &str {
        "engine"
    }
}
