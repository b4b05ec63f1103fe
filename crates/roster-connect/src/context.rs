//! Connection context and health snapshot

use chrono::{DateTime, Utc};
use roster_core_interface::Credential;
use roster_core_resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// State of the single live connection
///
/// Mutated only while the session lock is held; everyone else sees
/// published snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub state: ConnectionState,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub principal_id: Option<String>,
    /// Credential of the last successful connect, for silent reconnection
    #[serde(skip)]
    pub credential: Option<Credential>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl ConnectionContext {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Token is known and not yet expired
    pub fn token_valid(&self) -> bool {
        match (self.state, self.token_expires_at) {
            (ConnectionState::Connected, Some(exp)) => Utc::now() < exp,
            (ConnectionState::Connected, None) => true,
            _ => false,
        }
    }
}

/// Health of the connection, as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub connected: bool,
    pub circuit_state: CircuitState,
    pub failure_count: usize,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub token_valid: bool,
    pub principal_id: Option<String>,
}

impl ConnectionHealth {
    /// Connected, token valid and the breaker letting calls through
    pub fn is_healthy(&self) -> bool {
        self.connected && self.token_valid && self.circuit_state == CircuitState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_token_valid_requires_connection() {
        let mut ctx = ConnectionContext {
            token_expires_at: Some(Utc::now() + Duration::hours(1)),
            ..Default::default()
        };
        assert!(!ctx.token_valid());

        ctx.state = ConnectionState::Connected;
        assert!(ctx.token_valid());

        ctx.token_expires_at = Some(Utc::now() - Duration::seconds(1));
        assert!(!ctx.token_valid());
    }

    #[test]
    fn test_credential_not_serialized() {
        let ctx = ConnectionContext {
            credential: Some(Credential::new("admin").with_upstream_token("secret")),
            ..Default::default()
        };
        let json = serde_json::to_string(&ctx).unwrap();
        assert!(!json.contains("secret"));
    }
}
