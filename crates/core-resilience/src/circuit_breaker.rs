//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker fails fast while the protected resource is unhealthy.
//! It has three states:
//! - Closed: requests pass through, failures are counted in a rolling window
//! - Open: requests fail immediately with [`ResilienceError::CircuitOpen`]
//! - HalfOpen: exactly one trial request is let through
//!
//! State changes and recorded failures are published on a broadcast channel
//! (see [`CircuitBreaker::subscribe`]) so observers can react without the
//! breaker doing any I/O itself.

use crate::error::{BreakerError, ResilienceError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Requests pass through normally
    Closed,
    /// Requests fail immediately
    Open,
    /// One trial request is allowed to test recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures inside the sampling window that open the circuit
    pub failure_threshold: usize,
    /// How long the circuit stays open before allowing a trial
    pub open_duration: Duration,
    /// Failures older than this are forgotten
    pub sampling_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            sampling_window: Duration::from_secs(120),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "failure_threshold must be greater than 0".into(),
            ));
        }
        if self.open_duration.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "open_duration must be greater than 0".into(),
            ));
        }
        if self.sampling_window.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "sampling_window must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Events published by the breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerEvent {
    StateChanged {
        old: CircuitState,
        new: CircuitState,
        at: DateTime<Utc>,
    },
    FailureRecorded {
        current_count: usize,
        threshold: usize,
    },
}

/// Point-in-time view of the breaker, safe to hand to health queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: usize,
    pub last_state_change: DateTime<Utc>,
    pub threshold: usize,
    pub open_duration: Duration,
    pub sampling_window: Duration,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    last_state_change: DateTime<Utc>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            last_state_change: Utc::now(),
            trial_in_flight: false,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.duration_since(*oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&mut self, new: CircuitState, events: &mut Vec<BreakerEvent>) {
        if self.state == new {
            return;
        }
        let at = Utc::now();
        events.push(BreakerEvent::StateChanged {
            old: self.state,
            new,
            at,
        });
        self.state = new;
        self.last_state_change = at;
    }
}

struct Inner {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    events: broadcast::Sender<BreakerEvent>,
}

/// Circuit breaker guarding a single remote resource
///
/// Cloning is cheap; clones share state.
///
/// # Example
/// ```no_run
/// use roster_core_resilience::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
///
/// # async fn example() -> Result<(), BreakerError<std::io::Error>> {
/// let breaker = CircuitBreaker::new("directory", CircuitBreakerConfig::default());
///
/// let value = breaker.call(|| async {
///     Ok::<_, std::io::Error>(42)
/// }).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                state: Mutex::new(BreakerState::new()),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.config
    }

    /// Receive state changes and recorded failures
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.inner.events.subscribe()
    }

    /// Current state
    ///
    /// An expired Open state still reads as Open until the next call
    /// promotes it to HalfOpen.
    pub fn state(&self) -> CircuitState {
        self.inner.state.lock().state
    }

    /// Failures currently inside the sampling window
    pub fn failure_count(&self) -> usize {
        let mut st = self.inner.state.lock();
        st.prune(Instant::now(), self.inner.config.sampling_window);
        st.failures.len()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut st = self.inner.state.lock();
        st.prune(Instant::now(), self.inner.config.sampling_window);
        BreakerSnapshot {
            state: st.state,
            failure_count: st.failures.len(),
            last_state_change: st.last_state_change,
            threshold: self.inner.config.failure_threshold,
            open_duration: self.inner.config.open_duration,
            sampling_window: self.inner.config.sampling_window,
        }
    }

    /// Close the circuit and forget all failures
    pub fn reset(&self) {
        let mut events = Vec::new();
        {
            let mut st = self.inner.state.lock();
            st.failures.clear();
            st.opened_at = None;
            st.trial_in_flight = false;
            st.transition(CircuitState::Closed, &mut events);
        }
        info!(breaker = %self.inner.name, "Circuit breaker reset");
        self.publish(events);
    }

    /// Open the circuit immediately, restarting the open timer
    pub fn force_open(&self) {
        let mut events = Vec::new();
        {
            let mut st = self.inner.state.lock();
            st.opened_at = Some(Instant::now());
            st.trial_in_flight = false;
            st.transition(CircuitState::Open, &mut events);
        }
        warn!(breaker = %self.inner.name, "Circuit breaker forced open");
        self.publish(events);
    }

    /// Run `op` through the breaker; every error counts as a failure
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_filtered(op, |_| true).await
    }

    /// Run `op` through the breaker; only errors for which `trips` returns
    /// true count as failures
    ///
    /// Errors excluded by `trips` count as neither success nor failure.
    pub async fn call_filtered<F, Fut, T, E, P>(
        &self,
        op: F,
        trips: P,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let mut permit = self.acquire().map_err(BreakerError::open)?;

        match op().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(err) => {
                if trips(&err) {
                    permit.fail();
                } else {
                    permit.release();
                }
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn acquire(&self) -> Result<Permit<'_>, Duration> {
        let mut events = Vec::new();
        let result = {
            let mut st = self.inner.state.lock();
            let now = Instant::now();
            match st.state {
                CircuitState::Closed => Ok(false),
                CircuitState::Open => {
                    let opened_at = st.opened_at.unwrap_or(now);
                    let reopen_at = opened_at + self.inner.config.open_duration;
                    if now >= reopen_at {
                        st.transition(CircuitState::HalfOpen, &mut events);
                        st.trial_in_flight = true;
                        Ok(true)
                    } else {
                        Err(reopen_at.saturating_duration_since(now))
                    }
                }
                CircuitState::HalfOpen => {
                    if st.trial_in_flight {
                        Err(Duration::ZERO)
                    } else {
                        st.trial_in_flight = true;
                        Ok(true)
                    }
                }
            }
        };

        if !events.is_empty() {
            info!(breaker = %self.inner.name, "Circuit breaker half-open, allowing trial call");
        }
        self.publish(events);

        result.map(|trial| Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut events = Vec::new();
        {
            let mut st = self.inner.state.lock();
            match st.state {
                CircuitState::Closed => st.failures.clear(),
                CircuitState::HalfOpen if trial => {
                    st.failures.clear();
                    st.opened_at = None;
                    st.trial_in_flight = false;
                    st.transition(CircuitState::Closed, &mut events);
                }
                // Late result from a call admitted before the circuit opened
                _ => {}
            }
        }
        if !events.is_empty() {
            info!(breaker = %self.inner.name, "Circuit breaker closed after successful trial");
        }
        self.publish(events);
    }

    fn on_failure(&self, trial: bool) {
        let threshold = self.inner.config.failure_threshold;
        let mut events = Vec::new();
        let mut opened = false;
        {
            let mut st = self.inner.state.lock();
            let now = Instant::now();
            match st.state {
                CircuitState::Closed => {
                    st.prune(now, self.inner.config.sampling_window);
                    st.failures.push_back(now);
                    let current_count = st.failures.len();
                    events.push(BreakerEvent::FailureRecorded {
                        current_count,
                        threshold,
                    });
                    if current_count >= threshold {
                        st.opened_at = Some(now);
                        st.transition(CircuitState::Open, &mut events);
                        opened = true;
                    }
                }
                CircuitState::HalfOpen if trial => {
                    st.failures.push_back(now);
                    events.push(BreakerEvent::FailureRecorded {
                        current_count: st.failures.len(),
                        threshold,
                    });
                    st.opened_at = Some(now);
                    st.trial_in_flight = false;
                    st.transition(CircuitState::Open, &mut events);
                    opened = true;
                }
                _ => {}
            }
        }
        if opened {
            warn!(
                breaker = %self.inner.name,
                threshold,
                open_for = ?self.inner.config.open_duration,
                "Circuit breaker opened"
            );
        } else {
            debug!(breaker = %self.inner.name, "Failure recorded");
        }
        self.publish(events);
    }

    fn release_trial(&self) {
        let mut st = self.inner.state.lock();
        if st.state == CircuitState::HalfOpen {
            st.trial_in_flight = false;
        }
    }

    fn publish(&self, events: Vec<BreakerEvent>) {
        for event in events {
            // No subscribers is fine
            let _ = self.inner.events.send(event);
        }
    }
}

/// Admission to run one operation
///
/// Dropping an unsettled trial permit frees the half-open slot so an
/// abandoned call cannot wedge the breaker.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn succeed(&mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    fn fail(&mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    fn release(&mut self) {
        self.settled = true;
        if self.trial {
            self.breaker.release_trial();
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            open_duration: Duration::from_secs(10),
            sampling_window: Duration::from_secs(60),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(|| async { Ok::<_, &'static str>(()) }).await
    }

    fn drain(rx: &mut broadcast::Receiver<BreakerEvent>) -> Vec<BreakerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_opens_exactly_once() {
        let breaker = CircuitBreaker::new("test", test_config());
        let mut rx = breaker.subscribe();

        for _ in 0..3 {
            assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner("boom"))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicUsize::new(0);
        for _ in 0..5 {
            let result = breaker
                .call(|| async {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &'static str>(())
                })
                .await;
            assert!(result.unwrap_err().is_open());
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        let transitions: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, BreakerEvent::StateChanged { .. }))
            .collect();
        assert_eq!(transitions.len(), 1);
        match &transitions[0] {
            BreakerEvent::StateChanged { old, new, .. } => {
                assert_eq!(*old, CircuitState::Closed);
                assert_eq!(*new, CircuitState::Open);
            }
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_counts_down() {
        let breaker = CircuitBreaker::new("test", test_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_secs(4)).await;
        let err = succeed(&breaker).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", test_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner(_))));
        assert_eq!(breaker.state(), CircuitState::Open);

        // Timer restarted
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(succeed(&breaker).await.unwrap_err().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes_and_resets() {
        let breaker = CircuitBreaker::new("test", test_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.failure_count(), 3);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = CircuitBreaker::new("test", test_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(11)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, &'static str>(())
                })
                .await
        });

        while breaker.state() != CircuitState::HalfOpen {
            tokio::task::yield_now().await;
        }
        assert!(succeed(&breaker).await.unwrap_err().is_open());

        release_tx.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_releases_slot() {
        let breaker = CircuitBreaker::new("test", test_config());
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(11)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.call(|| std::future::pending::<Result<(), &'static str>>()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_are_forgotten() {
        let breaker = CircuitBreaker::new("test", test_config());
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_success_clears_count() {
        let breaker = CircuitBreaker::new("test", test_config());
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_recorded_events() {
        let breaker = CircuitBreaker::new("test", test_config());
        let mut rx = breaker.subscribe();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                BreakerEvent::FailureRecorded {
                    current_count: 1,
                    threshold: 3
                },
                BreakerEvent::FailureRecorded {
                    current_count: 2,
                    threshold: 3
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_filtered_errors_do_not_trip() {
        let breaker = CircuitBreaker::new("test", test_config());
        for _ in 0..10 {
            let result = breaker
                .call_filtered(|| async { Err::<(), _>("business") }, |e| *e != "business")
                .await;
            assert!(matches!(result, Err(BreakerError::Inner("business"))));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        let bad = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(ResilienceError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_force_open_and_reset() {
        let breaker = CircuitBreaker::new("test", test_config());
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(succeed(&breaker).await.unwrap_err().is_open());

        breaker.reset();
        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.threshold, 3);
        assert!(succeed(&breaker).await.is_ok());
    }
}
