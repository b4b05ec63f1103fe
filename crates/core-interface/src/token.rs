//! Identity and token provider contract

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A bearer token for the remote service
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Raw token value, for the Authorization header
    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Valid when non-empty and not within `skew` of expiry
    pub fn is_valid_with_skew(&self, skew: Duration) -> bool {
        if self.value.is_empty() {
            return false;
        }
        match self.expires_at {
            Some(exp) => Utc::now() + skew < exp,
            None => true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_with_skew(Duration::zero())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Reference to the credential used for the last successful connect
///
/// Kept so the connection manager can silently reconnect.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Principal (user or app) the token is issued for
    pub principal_id: String,
    /// Token from the upstream identity provider, exchanged for an access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_token: Option<String>,
}

impl Credential {
    pub fn new(principal_id: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            upstream_token: None,
        }
    }

    pub fn with_upstream_token(mut self, token: impl Into<String>) -> Self {
        self.upstream_token = Some(token.into());
        self
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("principal_id", &self.principal_id)
            .field(
                "upstream_token",
                &self.upstream_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("No token available for principal {0}")]
    Unavailable(String),

    #[error("Token for principal {0} has expired")]
    Expired(String),

    #[error("Token provider failed: {0}")]
    Provider(String),
}

/// External collaborator that hands out valid access tokens
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    async fn get_valid_access_token(
        &self,
        principal_id: &str,
        upstream_token: Option<&str>,
    ) -> Result<AccessToken, TokenError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_validity() {
        let fresh = AccessToken::new("abc", Some(Utc::now() + Duration::hours(1)));
        assert!(fresh.is_valid());
        assert!(!fresh.is_valid_with_skew(Duration::hours(2)));

        let stale = AccessToken::new("abc", Some(Utc::now() - Duration::seconds(1)));
        assert!(!stale.is_valid());

        let forever = AccessToken::new("abc", None);
        assert!(forever.is_valid());

        assert!(!AccessToken::new("", None).is_valid());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = AccessToken::new("super-secret", None);
        assert!(!format!("{:?}", token).contains("super-secret"));

        let cred = Credential::new("admin@school.edu").with_upstream_token("upstream-secret");
        let dbg = format!("{:?}", cred);
        assert!(dbg.contains("admin@school.edu"));
        assert!(!dbg.contains("upstream-secret"));
    }
}
