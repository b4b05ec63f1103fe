/*!
 * Token provider backed by configuration or the environment
 *
 * Tokens are minted elsewhere (an identity provider, a CI secret). The
 * provider only hands them out and refuses ones that are missing or expired.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roster_core_interface::{AccessToken, TokenError, TokenProvider};
use tracing::debug;

#[derive(Clone)]
enum TokenSource {
    Fixed(AccessToken),
    /// Read on every request so a rotated secret is picked up
    Env(String),
}

/// Hands out a pre-issued access token
#[derive(Clone)]
pub struct StaticTokenProvider {
    source: TokenSource,
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            TokenSource::Fixed(_) => "fixed".to_string(),
            TokenSource::Env(var) => format!("env:{}", var),
        };
        f.debug_struct("StaticTokenProvider")
            .field("source", &source)
            .finish()
    }
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            source: TokenSource::Fixed(AccessToken::new(token, expires_at)),
        }
    }

    /// Read the token from environment variable `var` on each request
    pub fn from_env(var: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Env(var.into()),
        }
    }

    fn current(&self, principal_id: &str) -> Result<AccessToken, TokenError> {
        match &self.source {
            TokenSource::Fixed(token) => Ok(token.clone()),
            TokenSource::Env(var) => std::env::var(var)
                .map(|value| AccessToken::new(value.trim(), None))
                .map_err(|_| TokenError::Unavailable(principal_id.to_string())),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_valid_access_token(
        &self,
        principal_id: &str,
        upstream_token: Option<&str>,
    ) -> Result<AccessToken, TokenError> {
        // A credential carrying its own token wins over the configured one
        if let Some(upstream) = upstream_token.filter(|t| !t.trim().is_empty()) {
            debug!(principal = principal_id, "Using token carried by credential");
            return Ok(AccessToken::new(upstream.trim(), None));
        }

        let token = self.current(principal_id)?;
        if token.secret().is_empty() {
            return Err(TokenError::Unavailable(principal_id.to_string()));
        }
        if !token.is_valid() {
            return Err(TokenError::Expired(principal_id.to_string()));
        }
        Ok(token)
    }
}
