//! ConnectionManager: the single live session to the remote directory service

use crate::context::{ConnectionContext, ConnectionHealth, ConnectionState};
use crate::error::{classify, session_error, CommandError, ConnectError};
use chrono::Utc;
use roster_core_audit::{AuditTrail, OperationStatus, OperationType};
use roster_core_cache::{keys, Cache};
use roster_core_interface::{
    AccessToken, CommandOutput, CommandScript, ConnectStage, Credential, EngineError,
    EngineSession, ExecutionEngine, Notification, Notifier, NullNotifier, SessionRequest,
    TokenError, TokenProvider,
};
use roster_core_resilience::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, ErrorClass, RetryDecision, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Connection behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Scopes requested when `connect` is given none
    pub scopes: Vec<String>,
    /// Deadline for every command invocation
    pub command_timeout: Duration,
    /// Deadline for opening a session
    pub connect_timeout: Duration,
    /// Lightweight command run right after opening a session
    pub identity_check_command: String,
    /// Tokens closer than this to expiry are treated as expired
    pub token_refresh_skew: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scopes: Vec::new(),
            command_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(60),
            identity_check_command: "Get-ConnectedIdentity".to_string(),
            token_refresh_skew: Duration::from_secs(300),
        }
    }
}

#[derive(Default)]
struct SessionSlot {
    session: Option<Box<dyn EngineSession>>,
    token: Option<AccessToken>,
}

/// Owns the one live session and runs every command through the circuit
/// breaker and retry policy
///
/// Construct once with [`ConnectionManager::builder`] and share the `Arc`.
/// Commands are serialized: the session lock is held while a command is in
/// flight and released during backoff sleeps.
///
/// # Example
///
/// ```rust,no_run
/// use roster_connect::ConnectionManager;
/// use roster_connect::testing::{ScriptedEngine, TestTokenProvider};
/// use roster_core_interface::{CommandScript, Credential};
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let manager = ConnectionManager::builder(
///     Arc::new(ScriptedEngine::new()),
///     Arc::new(TestTokenProvider::new()),
/// )
/// .build();
///
/// manager.connect(Credential::new("admin@school.edu"), &[]).await?;
/// let output = manager.execute(&CommandScript::new("Get-Team")).await?;
/// println!("{} teams", output.len());
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    engine: Arc<dyn ExecutionEngine>,
    tokens: Arc<dyn TokenProvider>,
    cache: Arc<Cache>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    config: ConnectionConfig,
    slot: Mutex<SessionSlot>,
    context: watch::Sender<ConnectionContext>,
    notifier: Arc<dyn Notifier>,
    audit: AuditTrail,
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    engine: Arc<dyn ExecutionEngine>,
    tokens: Arc<dyn TokenProvider>,
    cache: Option<Arc<Cache>>,
    breaker: Option<CircuitBreaker>,
    retry: RetryPolicy,
    config: ConnectionConfig,
    notifier: Arc<dyn Notifier>,
    audit: AuditTrail,
}

impl ConnectionManagerBuilder {
    pub fn cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(CircuitBreaker::new("directory", config));
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn audit(mut self, audit: AuditTrail) -> Self {
        self.audit = audit;
        self
    }

    pub fn build(self) -> Arc<ConnectionManager> {
        let (context, _) = watch::channel(ConnectionContext::default());
        Arc::new(ConnectionManager {
            engine: self.engine,
            tokens: self.tokens,
            cache: self.cache.unwrap_or_default(),
            breaker: self.breaker.unwrap_or_else(|| {
                CircuitBreaker::new("directory", CircuitBreakerConfig::default())
            }),
            retry: self.retry,
            config: self.config,
            slot: Mutex::new(SessionSlot::default()),
            context,
            notifier: self.notifier,
            audit: self.audit,
        })
    }
}

impl ConnectionManager {
    pub fn builder(
        engine: Arc<dyn ExecutionEngine>,
        tokens: Arc<dyn TokenProvider>,
    ) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            engine,
            tokens,
            cache: None,
            breaker: None,
            retry: RetryPolicy::default(),
            config: ConnectionConfig::default(),
            notifier: Arc::new(NullNotifier),
            audit: AuditTrail::disabled(),
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Snapshot of the connection context
    pub fn context(&self) -> ConnectionContext {
        self.context.borrow().clone()
    }

    /// Watch context changes
    pub fn subscribe_context(&self) -> watch::Receiver<ConnectionContext> {
        self.context.subscribe()
    }

    /// Connect with `credential`, replacing any existing session
    ///
    /// Empty `scopes` means the configured default scopes.
    pub async fn connect(
        &self,
        credential: Credential,
        scopes: &[String],
    ) -> Result<ConnectionContext, ConnectError> {
        let mut slot = self.slot.lock().await;
        self.connect_locked(&mut slot, credential, scopes).await
    }

    /// Make sure a healthy session exists
    ///
    /// Returns `true` without I/O when the session is healthy. Otherwise
    /// reconnects with the remembered credential; with no prior successful
    /// connect there is nothing to reconnect with and this returns `false`.
    pub async fn ensure_connected(&self) -> bool {
        let mut slot = self.slot.lock().await;
        match self.ensure_session_locked(&mut slot).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "ensure_connected failed");
                false
            }
        }
    }

    /// Run a command with reconnect and retry handling
    pub async fn execute(&self, script: &CommandScript) -> Result<CommandOutput, ConnectError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let outcome = {
                let mut slot = self.slot.lock().await;
                self.ensure_session_locked(&mut slot).await?;
                let session = slot
                    .session
                    .as_mut()
                    .ok_or_else(|| ConnectError::NotConnected("no session".into()))?;
                let timeout = self.config.command_timeout;
                self.breaker
                    .call_filtered(
                        || invoke_with_timeout(session, script, timeout),
                        |e| classify(e) != ErrorClass::Fatal,
                    )
                    .await
            };

            let err = match outcome {
                Ok(output) => {
                    debug!(
                        command = script.name(),
                        attempt,
                        records = output.len(),
                        "Command succeeded"
                    );
                    return Ok(output);
                }
                Err(BreakerError::Inner(e)) => e,
                Err(rejected) => {
                    return Err(ConnectError::CircuitOpen {
                        retry_after: rejected.retry_after().unwrap_or_default(),
                    });
                }
            };

            let class = classify(&err);
            match self.retry.decide(class, attempt) {
                RetryDecision::Reconnect => {
                    warn!(
                        command = script.name(),
                        attempt,
                        error = %err,
                        "Session rejected command, reconnecting"
                    );
                    self.drop_session().await;
                }
                RetryDecision::Backoff(delay) => {
                    warn!(
                        command = script.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient command failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(match class {
                        ErrorClass::ConnectionRelated => {
                            self.drop_session().await;
                            ConnectError::Authentication(err.message)
                        }
                        ErrorClass::Transient => ConnectError::Transient {
                            attempts: attempt,
                            source: err,
                        },
                        ErrorClass::Fatal => {
                            ConnectError::Command(CommandError::from_engine(script, &err, attempt))
                        }
                    });
                }
            }
        }
    }

    /// Run a command, absorbing connection-layer failures
    ///
    /// Connection-layer failures are logged, audited and reported as
    /// `Ok(None)`. Command failures are returned as [`CommandError`].
    pub async fn execute_command(
        &self,
        script: &CommandScript,
    ) -> Result<Option<CommandOutput>, CommandError> {
        match self.execute(script).await {
            Ok(output) => Ok(Some(output)),
            Err(ConnectError::Command(e)) => Err(e),
            Err(ConnectError::Transient { attempts, source }) => {
                Err(CommandError::from_engine(script, &source, attempts))
            }
            Err(e) => {
                error!(
                    command = script.name(),
                    category = e.category(),
                    error = %e,
                    "Command not executed"
                );
                self.audit
                    .record(
                        OperationType::CommandExecution,
                        "command",
                        script.name(),
                        OperationStatus::Failed,
                        &format!("Command '{}' not executed", script.name()),
                        Some(&e.to_string()),
                    )
                    .await;
                Ok(None)
            }
        }
    }

    /// Tear down the session and forget the credential
    pub async fn disconnect(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut session) = slot.session.take() {
            if let Err(e) = session.close().await {
                warn!(error = %e, "Failed to close session cleanly");
            }
        }
        slot.token = None;
        self.context.send_replace(ConnectionContext::default());
        self.cache.invalidate_all();
        self.notify_stage(ConnectStage::Disconnected, "Disconnected");
        info!("Disconnected from directory service");
    }

    /// Health without I/O
    pub fn connection_health(&self) -> ConnectionHealth {
        let ctx = self.context.borrow();
        let breaker = self.breaker.snapshot();
        ConnectionHealth {
            connected: ctx.is_connected(),
            circuit_state: breaker.state,
            failure_count: breaker.failure_count,
            last_attempt: ctx.last_attempt,
            last_success: ctx.last_success,
            token_valid: ctx.token_valid(),
            principal_id: ctx.principal_id.clone(),
        }
    }

    async fn ensure_session_locked(&self, slot: &mut SessionSlot) -> Result<(), ConnectError> {
        if self.slot_is_healthy(slot) {
            return Ok(());
        }

        let credential = self.context.borrow().credential.clone();
        let Some(credential) = credential else {
            return Err(ConnectError::NotConnected(
                "no previous connection to restore".into(),
            ));
        };

        info!(principal = %credential.principal_id, "Session unavailable, reconnecting");
        self.connect_locked(slot, credential, &[]).await.map(|_| ())
    }

    fn slot_is_healthy(&self, slot: &SessionSlot) -> bool {
        let session_ok = slot.session.as_ref().is_some_and(|s| s.is_healthy());
        let token_ok = slot
            .token
            .as_ref()
            .is_some_and(|t| t.is_valid_with_skew(self.refresh_skew()));
        session_ok && token_ok
    }

    fn refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.token_refresh_skew)
            .unwrap_or_else(|_| chrono::Duration::zero())
    }

    async fn drop_session(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut session) = slot.session.take() {
            let _ = session.close().await;
        }
        slot.token = None;
        self.context.send_modify(|ctx| ctx.state = ConnectionState::Disconnected);
    }

    async fn connect_locked(
        &self,
        slot: &mut SessionSlot,
        credential: Credential,
        scopes: &[String],
    ) -> Result<ConnectionContext, ConnectError> {
        let scopes: Vec<String> = if scopes.is_empty() {
            self.config.scopes.clone()
        } else {
            scopes.to_vec()
        };

        if let Some(mut old) = slot.session.take() {
            let _ = old.close().await;
        }
        slot.token = None;

        self.context.send_modify(|ctx| {
            ctx.state = ConnectionState::Connecting;
            ctx.last_attempt = Some(Utc::now());
        });

        info!(
            principal = %credential.principal_id,
            engine = self.engine.name(),
            "Connecting to directory service"
        );

        let result = self
            .breaker
            .call(|| self.open_verified_session(&credential, &scopes))
            .await;

        match result {
            Ok((session, token)) => {
                let expires_at = token.expires_at();
                slot.session = Some(session);
                slot.token = Some(token);

                self.context.send_modify(|ctx| {
                    ctx.state = ConnectionState::Connected;
                    ctx.last_success = Some(Utc::now());
                    ctx.principal_id = Some(credential.principal_id.clone());
                    ctx.credential = Some(credential.clone());
                    ctx.token_expires_at = expires_at;
                });
                let snapshot = self.context();
                self.cache.set(keys::SESSION_CONTEXT, snapshot.clone());

                self.notify_stage(
                    ConnectStage::Connected,
                    &format!("Connected as {}", credential.principal_id),
                );
                info!(principal = %credential.principal_id, "Connected to directory service");
                Ok(snapshot)
            }
            Err(err) => {
                let err = match err {
                    BreakerError::Inner(e) => e,
                    rejected => ConnectError::CircuitOpen {
                        retry_after: rejected.retry_after().unwrap_or_default(),
                    },
                };

                self.context
                    .send_modify(|ctx| ctx.state = ConnectionState::Disconnected);
                self.notify_stage(ConnectStage::Failed, &err.to_string());
                error!(principal = %credential.principal_id, error = %err, "Connection failed");
                self.audit
                    .record(
                        OperationType::Connection,
                        "principal",
                        &credential.principal_id,
                        OperationStatus::Failed,
                        "Connection attempt failed",
                        Some(&err.to_string()),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn open_verified_session(
        &self,
        credential: &Credential,
        scopes: &[String],
    ) -> Result<(Box<dyn EngineSession>, AccessToken), ConnectError> {
        self.notify_stage(ConnectStage::AcquiringToken, "Acquiring access token");
        let token = self
            .tokens
            .get_valid_access_token(
                &credential.principal_id,
                credential.upstream_token.as_deref(),
            )
            .await?;

        // A token inside the refresh window would fail the health check on the next call
        if !token.is_valid_with_skew(self.refresh_skew()) {
            warn!(
                principal = %credential.principal_id,
                expires_at = ?token.expires_at(),
                "Issued token is too close to expiry"
            );
            return Err(TokenError::Expired(credential.principal_id.clone()).into());
        }

        self.notify_stage(ConnectStage::OpeningSession, "Opening session");
        let mut request = SessionRequest {
            token: token.clone(),
            scopes: scopes.to_vec(),
            degraded: false,
        };

        let mut session = match self.open_session(&request).await {
            Ok(session) => session,
            Err(first) => {
                if classify(&first) == ErrorClass::ConnectionRelated {
                    return Err(session_error(first));
                }
                warn!(error = %first, "Session initialization failed, retrying in degraded mode");
                self.notify_stage(
                    ConnectStage::RetryingDegraded,
                    "Retrying with minimal session initialization",
                );
                request.degraded = true;
                self.open_session(&request).await.map_err(session_error)?
            }
        };

        self.notify_stage(ConnectStage::Verifying, "Verifying session");
        let check = CommandScript::new(self.config.identity_check_command.clone());
        if let Err(e) =
            invoke_with_timeout(&mut session, &check, self.config.command_timeout).await
        {
            let _ = session.close().await;
            return Err(session_error(e));
        }

        Ok((session, token))
    }

    async fn open_session(
        &self,
        request: &SessionRequest,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        match tokio::time::timeout(self.config.connect_timeout, self.engine.open_session(request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::timeout(format!(
                "Opening session timed out after {:?}",
                self.config.connect_timeout
            ))),
        }
    }

    fn notify_stage(&self, stage: ConnectStage, message: &str) {
        self.notifier.notify(Notification::Connection {
            stage,
            message: message.to_string(),
        });
    }
}

async fn invoke_with_timeout(
    session: &mut Box<dyn EngineSession>,
    script: &CommandScript,
    timeout: Duration,
) -> Result<CommandOutput, EngineError> {
    match tokio::time::timeout(timeout, session.invoke(script)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::timeout(format!(
            "Command '{}' timed out after {:?}",
            script.name(),
            timeout
        ))),
    }
}
