/*!
 * Wiring: build the connection stack from a [`RosterConfig`]
 *
 * One cache, one breaker, one connection manager and one orchestrator per
 * process, shared by `Arc`.
 */

use crate::config::RosterConfig;
use crate::error::{Result, RosterError};
use crate::groups::GroupService;
use crate::token::StaticTokenProvider;
use roster_bulk::BulkOrchestrator;
use roster_connect::{ConnectionContext, ConnectionManager, HttpExecutionEngine};
use roster_core_audit::{AuditSink, AuditTrail, JournalAuditSink};
use roster_core_cache::Cache;
use roster_core_interface::{Credential, ExecutionEngine, Notifier, NullNotifier, TokenProvider};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A fully wired client
pub struct App {
    config: RosterConfig,
    service: GroupService,
    breaker_task: JoinHandle<()>,
}

/// Collaborators that can be swapped out, mainly in tests
pub struct AppParts {
    pub engine: Arc<dyn ExecutionEngine>,
    pub tokens: Arc<dyn TokenProvider>,
    pub audit: Option<Arc<dyn AuditSink>>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppParts {
    /// HTTP engine, token from the environment, journal from config
    pub fn from_config(config: &RosterConfig) -> Result<Self> {
        let engine = HttpExecutionEngine::new(config.engine_config())?;
        let tokens = StaticTokenProvider::from_env(config.connection.token_env.as_str());
        let audit = if config.audit.enabled {
            let sink: Arc<dyn AuditSink> =
                Arc::new(JournalAuditSink::open(&config.audit.journal_path)?);
            Some(sink)
        } else {
            None
        };
        Ok(Self {
            engine: Arc::new(engine),
            tokens: Arc::new(tokens),
            audit,
            notifier: Arc::new(NullNotifier),
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

impl App {
    /// Build from configuration alone
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_config(config: RosterConfig) -> Result<Self> {
        let parts = AppParts::from_config(&config)?;
        Self::build(config, parts)
    }

    /// Build with explicit collaborators
    pub fn build(config: RosterConfig, parts: AppParts) -> Result<Self> {
        config.validate()?;

        let audit = match parts.audit {
            Some(sink) => AuditTrail::new(sink),
            None => AuditTrail::disabled(),
        };

        let connection = ConnectionManager::builder(parts.engine, parts.tokens)
            .cache(Arc::new(Cache::new(config.cache_config())))
            .breaker_config(config.breaker_config())
            .retry_policy(config.retry_policy())
            .config(config.connection_config())
            .notifier(parts.notifier)
            .audit(audit)
            .build();
        let breaker_task = connection.start_event_notifier();

        let orchestrator = BulkOrchestrator::new(connection.clone(), config.bulk_config())?;
        let service = GroupService::new(connection, orchestrator);

        Ok(Self {
            config,
            service,
            breaker_task,
        })
    }

    pub fn config(&self) -> &RosterConfig {
        &self.config
    }

    pub fn service(&self) -> &GroupService {
        &self.service
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        self.service.connection()
    }

    /// Connect as the configured principal
    pub async fn connect(&self) -> Result<ConnectionContext> {
        let principal = self
            .config
            .connection
            .principal
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| RosterError::Config("connection.principal is not set".into()))?;

        let context = self
            .connection()
            .connect(Credential::new(principal), &self.config.connection.scopes)
            .await?;
        info!(principal, endpoint = %self.config.connection.endpoint, "Connected");
        Ok(context)
    }

    /// Close the session and stop the breaker notifier
    pub async fn shutdown(self) {
        self.connection().disconnect().await;
        self.breaker_task.abort();
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("endpoint", &self.config.connection.endpoint)
            .field("service", &self.service)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_connect::testing::{ScriptedEngine, TestTokenProvider};

    fn parts(engine: Arc<ScriptedEngine>) -> AppParts {
        AppParts {
            engine,
            tokens: Arc::new(TestTokenProvider::new()),
            audit: None,
            notifier: Arc::new(NullNotifier),
        }
    }

    #[tokio::test]
    async fn test_connect_requires_principal() {
        let engine = Arc::new(ScriptedEngine::new());
        let app = App::build(RosterConfig::default(), parts(engine)).unwrap();
        let err = app.connect().await.unwrap_err();
        assert!(matches!(err, RosterError::Config(_)));
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_with_principal() {
        let engine = Arc::new(ScriptedEngine::new());
        let mut config = RosterConfig::default();
        config.connection.principal = Some("admin@school.edu".into());

        let app = App::build(config, parts(engine.clone())).unwrap();
        let context = app.connect().await.unwrap();
        assert!(context.is_connected());
        assert_eq!(engine.open_count(), 1);
        assert!(app.service().health().connected);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = RosterConfig::default();
        config.bulk.max_concurrent_chunks = 0;
        let result = App::build(config, parts(Arc::new(ScriptedEngine::new())));
        assert!(matches!(result, Err(RosterError::Bulk(_))));
    }
}
