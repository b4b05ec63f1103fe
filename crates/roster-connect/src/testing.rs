//! Scripted execution engine and token provider for tests
//!
//! The scripted engine records every session request and invocation and
//! answers commands from queued results or per-command handlers. Commands
//! with neither succeed with empty output.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use roster_core_interface::{
    AccessToken, CommandOutput, CommandScript, EngineError, EngineErrorKind, EngineSession,
    ExecutionEngine, SessionRequest, TokenError, TokenProvider,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Handler = Box<dyn FnMut(&CommandScript) -> Result<CommandOutput, EngineError> + Send>;

#[derive(Default)]
struct EngineState {
    open_failures: VecDeque<EngineError>,
    queued: HashMap<String, VecDeque<Result<CommandOutput, EngineError>>>,
    handlers: HashMap<String, Handler>,
    invocations: Vec<CommandScript>,
    open_requests: Vec<SessionRequest>,
    closes: usize,
    latency: Option<Duration>,
    sessions: Vec<Arc<AtomicBool>>,
}

/// In-process engine driven by test expectations
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<Mutex<EngineState>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` session opens fail with `err`
    pub fn fail_opens(&self, n: usize, err: EngineError) {
        let mut st = self.state.lock();
        for _ in 0..n {
            st.open_failures.push_back(err.clone());
        }
    }

    /// Queue one result for the next invocation of `command`
    pub fn push_result(&self, command: &str, result: Result<CommandOutput, EngineError>) {
        self.state
            .lock()
            .queued
            .entry(command.to_string())
            .or_default()
            .push_back(result);
    }

    /// Answer every invocation of `command` with `handler`, after queued
    /// results are used up
    pub fn on_command<F>(&self, command: &str, handler: F)
    where
        F: FnMut(&CommandScript) -> Result<CommandOutput, EngineError> + Send + 'static,
    {
        self.state
            .lock()
            .handlers
            .insert(command.to_string(), Box::new(handler));
    }

    /// Delay every invocation
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Mark every open session unhealthy, as if the remote dropped them
    pub fn invalidate_sessions(&self) {
        for session in &self.state.lock().sessions {
            session.store(false, Ordering::SeqCst);
        }
    }

    pub fn invocations(&self) -> Vec<CommandScript> {
        self.state.lock().invocations.clone()
    }

    pub fn invocation_count(&self, command: &str) -> usize {
        self.state
            .lock()
            .invocations
            .iter()
            .filter(|s| s.name() == command)
            .count()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_requests.len()
    }

    pub fn degraded_open_count(&self) -> usize {
        self.state
            .lock()
            .open_requests
            .iter()
            .filter(|r| r.degraded)
            .count()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn open_session(
        &self,
        request: &SessionRequest,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let mut st = self.state.lock();
        st.open_requests.push(request.clone());
        if let Some(err) = st.open_failures.pop_front() {
            return Err(err);
        }
        let healthy = Arc::new(AtomicBool::new(true));
        st.sessions.push(healthy.clone());
        Ok(Box::new(ScriptedSession {
            state: self.state.clone(),
            healthy,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedSession {
    state: Arc<Mutex<EngineState>>,
    healthy: Arc<AtomicBool>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn invoke(&mut self, script: &CommandScript) -> Result<CommandOutput, EngineError> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = {
            let mut st = self.state.lock();
            st.invocations.push(script.clone());

            if !self.healthy.load(Ordering::SeqCst) {
                Err(EngineError::session_invalid("session was invalidated"))
            } else if let Some(result) = st
                .queued
                .get_mut(script.name())
                .and_then(VecDeque::pop_front)
            {
                result
            } else if let Some(handler) = st.handlers.get_mut(script.name()) {
                handler(script)
            } else {
                Ok(CommandOutput::empty())
            }
        };

        if let Err(e) = &result {
            if matches!(
                e.kind,
                EngineErrorKind::Unauthorized
                    | EngineErrorKind::TokenExpired
                    | EngineErrorKind::SessionInvalid
            ) {
                self.healthy.store(false, Ordering::SeqCst);
            }
        }
        result
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.healthy.store(false, Ordering::SeqCst);
        self.state.lock().closes += 1;
        Ok(())
    }
}

/// Token provider that issues fresh tokens, optionally failing first
#[derive(Debug)]
pub struct TestTokenProvider {
    issued: AtomicUsize,
    failures: Mutex<VecDeque<TokenError>>,
    lifetime: chrono::Duration,
}

impl Default for TestTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TestTokenProvider {
    pub fn new() -> Self {
        Self {
            issued: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            lifetime: chrono::Duration::hours(1),
        }
    }

    pub fn with_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Fail the next `n` requests with `err`
    pub fn fail_next(&self, n: usize, err: TokenError) {
        let mut failures = self.failures.lock();
        for _ in 0..n {
            failures.push_back(err.clone());
        }
    }

    /// Requests received, including failed ones
    pub fn calls(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for TestTokenProvider {
    async fn get_valid_access_token(
        &self,
        principal_id: &str,
        _upstream_token: Option<&str>,
    ) -> Result<AccessToken, TokenError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(AccessToken::new(
            format!("token-{}-{}", principal_id, n),
            Some(Utc::now() + self.lifetime),
        ))
    }
}
