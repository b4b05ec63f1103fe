//! Roster Core Resilience: pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! - **Circuit Breaker**: fails fast while the remote service is unhealthy,
//!   publishing state changes on a broadcast channel
//! - **Retry Policy**: classifies failures and computes exponential backoff
//!   with jitter
//!
//! Neither primitive does I/O. The connection layer drives the retry loop
//! and subscribes to breaker events.
//!
//! ```text
//!   caller ──► CircuitBreaker::call ──► operation
//!                    │                      │ error
//!                    │                      ▼
//!                    │            classify_message / ErrorClass
//!                    │                      │
//!                    ▼                      ▼
//!            BreakerEvent stream     RetryPolicy::decide
//!                                    Reconnect | Backoff | GiveUp
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use roster_core_resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     "directory",
//!     CircuitBreakerConfig {
//!         failure_threshold: 5,
//!         open_duration: Duration::from_secs(60),
//!         ..Default::default()
//!     },
//! );
//!
//! let mut events = breaker.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//! # }
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod retry;

pub use circuit_breaker::{
    BreakerEvent, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use error::{BreakerError, ResilienceError};
pub use retry::{classify_message, ErrorClass, RetryDecision, RetryPolicy};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use roster_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::error::{BreakerError, ResilienceError};
    pub use super::retry::{classify_message, ErrorClass, RetryDecision, RetryPolicy};
}
