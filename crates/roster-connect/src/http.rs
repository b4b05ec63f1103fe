//! HTTP execution engine
//!
//! Forwards command scripts as JSON to a remote command gateway:
//!
//! - `POST {endpoint}/sessions` with `{"scopes": [...], "degraded": bool}`
//!   returns `{"session_id": "..."}`
//! - `POST {endpoint}/sessions/{id}/commands` with
//!   `{"command": "...", "parameters": {...}}` returns the command output
//! - `DELETE {endpoint}/sessions/{id}` closes the session
//!
//! Every request carries the bearer token. HTTP status codes map onto
//! [`EngineErrorKind`].

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use roster_core_interface::{
    AccessToken, CommandOutput, CommandScript, EngineError, EngineErrorKind, EngineSession,
    ExecutionEngine, SessionRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct HttpEngineConfig {
    /// Base URL of the command gateway, without trailing slash
    pub endpoint: String,
    /// Transport-level timeout for each request
    pub request_timeout: Duration,
}

impl HttpEngineConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Serialize)]
struct OpenSessionBody<'a> {
    scopes: &'a [String],
    degraded: bool,
}

#[derive(Deserialize)]
struct OpenSessionResponse {
    session_id: String,
}

#[derive(Serialize)]
struct CommandBody<'a> {
    command: &'a str,
    parameters: &'a BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Engine that talks to the command gateway over HTTPS
#[derive(Debug, Clone)]
pub struct HttpExecutionEngine {
    client: Client,
    config: HttpEngineConfig,
}

impl HttpExecutionEngine {
    pub fn new(config: HttpEngineConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("roster/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::new(EngineErrorKind::Unavailable, e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ExecutionEngine for HttpExecutionEngine {
    async fn open_session(
        &self,
        request: &SessionRequest,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let url = format!("{}/sessions", self.config.endpoint);
        debug!(url = %url, degraded = request.degraded, "Opening HTTP session");

        let response = self
            .client
            .post(&url)
            .bearer_auth(request.token.secret())
            .json(&OpenSessionBody {
                scopes: &request.scopes,
                degraded: request.degraded,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        let body: OpenSessionResponse = response.json().await.map_err(transport_error)?;

        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            base: format!("{}/sessions/{}", self.config.endpoint, body.session_id),
            token: request.token.clone(),
            healthy: true,
        }))
    }

    fn name(&self) -> &str {
        "http"
    }
}

struct HttpSession {
    client: Client,
    base: String,
    token: AccessToken,
    healthy: bool,
}

impl HttpSession {
    async fn send_command(&self, script: &CommandScript) -> Result<CommandOutput, EngineError> {
        let response = self
            .client
            .post(format!("{}/commands", self.base))
            .bearer_auth(self.token.secret())
            .json(&CommandBody {
                command: script.name(),
                parameters: script.params(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(CommandOutput::empty());
        }
        let value: Value = response.json().await.map_err(transport_error)?;
        Ok(CommandOutput::from_json(value))
    }
}

#[async_trait]
impl EngineSession for HttpSession {
    async fn invoke(&mut self, script: &CommandScript) -> Result<CommandOutput, EngineError> {
        trace!(command = %script, "Invoking remote command");

        let result = self.send_command(script).await;

        if let Err(e) = &result {
            if matches!(
                e.kind,
                EngineErrorKind::Unauthorized
                    | EngineErrorKind::TokenExpired
                    | EngineErrorKind::SessionInvalid
            ) {
                self.healthy = false;
            }
        }
        result
    }

    fn is_healthy(&self) -> bool {
        self.healthy && self.token.is_valid()
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.healthy = false;
        let response = self
            .client
            .delete(&self.base)
            .bearer_auth(self.token.secret())
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(map_status(status, &text))
}

/// Map a failed HTTP response to an engine error
pub fn map_status(status: StatusCode, body: &str) -> EngineError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body.trim().to_string()
            }
        });

    let kind = match status {
        StatusCode::UNAUTHORIZED => EngineErrorKind::Unauthorized,
        StatusCode::FORBIDDEN => EngineErrorKind::PermissionDenied,
        StatusCode::NOT_FOUND => EngineErrorKind::NotFound,
        StatusCode::GONE => EngineErrorKind::SessionInvalid,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => EngineErrorKind::Timeout,
        StatusCode::TOO_MANY_REQUESTS => EngineErrorKind::RateLimited,
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => EngineErrorKind::Unavailable,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::CONFLICT => {
            EngineErrorKind::InvalidInput
        }
        _ => EngineErrorKind::Unclassified,
    };
    EngineError::new(kind, message)
}

fn transport_error(err: reqwest::Error) -> EngineError {
    let kind = if err.is_timeout() {
        EngineErrorKind::Timeout
    } else if err.is_connect() {
        EngineErrorKind::Unavailable
    } else {
        EngineErrorKind::Unclassified
    };
    EngineError::new(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_status_kinds() {
        let cases = [
            (StatusCode::UNAUTHORIZED, EngineErrorKind::Unauthorized),
            (StatusCode::FORBIDDEN, EngineErrorKind::PermissionDenied),
            (StatusCode::NOT_FOUND, EngineErrorKind::NotFound),
            (StatusCode::GONE, EngineErrorKind::SessionInvalid),
            (StatusCode::GATEWAY_TIMEOUT, EngineErrorKind::Timeout),
            (StatusCode::TOO_MANY_REQUESTS, EngineErrorKind::RateLimited),
            (StatusCode::SERVICE_UNAVAILABLE, EngineErrorKind::Unavailable),
            (StatusCode::UNPROCESSABLE_ENTITY, EngineErrorKind::InvalidInput),
            (StatusCode::INTERNAL_SERVER_ERROR, EngineErrorKind::Unclassified),
        ];
        for (status, kind) in cases {
            assert_eq!(map_status(status, "").kind, kind, "{status}");
        }
    }

    #[test]
    fn test_map_status_message_extraction() {
        let err = map_status(
            StatusCode::NOT_FOUND,
            r#"{"error":"not_found","message":"User bob not found"}"#,
        );
        assert_eq!(err.message, "User bob not found");

        let err = map_status(StatusCode::BAD_REQUEST, "plain text body");
        assert_eq!(err.message, "plain text body");

        let err = map_status(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(err.message.contains("429"));
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = HttpEngineConfig::new("https://gateway.example.edu/api/");
        assert_eq!(config.endpoint, "https://gateway.example.edu/api");
        assert!(HttpExecutionEngine::new(config).is_ok());
    }
}
