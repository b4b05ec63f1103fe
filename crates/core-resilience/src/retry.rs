//! Retry policy and error classification
//!
//! The policy is pure: it classifies failures and computes delays. The loop
//! that sleeps and reconnects belongs to whoever owns the connection.
//!
//! # Example
//!
//! ```
//! use roster_core_resilience::{classify_message, ErrorClass, RetryDecision, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     jitter: Duration::ZERO,
//!     ..Default::default()
//! };
//!
//! let class = classify_message("429 Too Many Requests");
//! assert_eq!(class, ErrorClass::Transient);
//! assert_eq!(policy.decide(class, 1), RetryDecision::Backoff(Duration::from_secs(1)));
//! assert_eq!(policy.decide(class, 3), RetryDecision::GiveUp);
//! ```

use crate::error::ResilienceError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Substrings that indicate an authentication or session problem
const CONNECTION_PATTERNS: &[&str] = &[
    "unauthorized",
    "token",
    "expired",
    "authentication",
    "session",
    "not connected",
];

/// Substrings that indicate a temporary remote condition
const TRANSIENT_PATTERNS: &[&str] = &[
    "throttl",
    "rate limit",
    "too many requests",
    "429",
    "timeout",
    "timed out",
    "temporarily unavailable",
    "service unavailable",
    "503",
    "504",
];

/// How a failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Authentication or session failure: reconnect, then retry
    ConnectionRelated,
    /// Throttling, timeout, temporary unavailability: back off, then retry
    Transient,
    /// Anything else: do not retry
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::Fatal)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::ConnectionRelated => "connection_related",
            ErrorClass::Transient => "transient",
            ErrorClass::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Classify an error by its message
///
/// Connection patterns win over transient ones, so "session timed out"
/// forces a reconnect rather than a plain backoff.
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if CONNECTION_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClass::ConnectionRelated
    } else if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Drop the session, reconnect, then retry immediately
    Reconnect,
    /// Sleep for the given delay, then retry on the same session
    Backoff(Duration),
    /// Surface the error
    GiveUp,
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Uniform random jitter added to each delay, in `[0, jitter)`
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(ResilienceError::InvalidConfig(format!(
                "initial_delay ({:?}) exceeds max_delay ({:?})",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    pub fn should_retry(&self, class: ErrorClass, attempt: u32) -> bool {
        class.is_retryable() && attempt < self.max_attempts
    }

    /// Delay after the given failed attempt (1-based)
    ///
    /// `initial_delay * 2^(attempt-1)` plus jitter, capped at `max_delay`.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base = self
            .initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);

        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            let secs = rand::rng().random_range(0.0..self.jitter.as_secs_f64());
            Duration::from_secs_f64(secs)
        };

        base.saturating_add(jitter).min(self.max_delay)
    }

    /// Decide what to do after `attempt` (1-based) failed with `class`
    pub fn decide(&self, class: ErrorClass, attempt: u32) -> RetryDecision {
        if !self.should_retry(class, attempt) {
            return RetryDecision::GiveUp;
        }
        match class {
            ErrorClass::ConnectionRelated => RetryDecision::Reconnect,
            ErrorClass::Transient => RetryDecision::Backoff(self.compute_delay(attempt)),
            ErrorClass::Fatal => RetryDecision::GiveUp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_delay_doubles() {
        let policy = no_jitter();
        assert_eq!(policy.compute_delay(1), Duration::from_secs(1));
        assert_eq!(policy.compute_delay(2), Duration::from_secs(2));
        assert_eq!(policy.compute_delay(3), Duration::from_secs(4));
        assert_eq!(policy.compute_delay(4), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped() {
        let policy = no_jitter();
        assert_eq!(policy.compute_delay(6), Duration::from_secs(30));
        assert_eq!(policy.compute_delay(40), Duration::from_secs(30));
        assert_eq!(policy.compute_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.compute_delay(2);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay < Duration::from_secs(3));
        }
    }

    #[test]
    fn test_classify_connection_related() {
        for msg in [
            "401 Unauthorized",
            "Access token has expired",
            "Authentication needed. Please call Connect first",
            "The session is not valid",
            "Not connected",
        ] {
            assert_eq!(classify_message(msg), ErrorClass::ConnectionRelated, "{msg}");
        }
    }

    #[test]
    fn test_classify_transient() {
        for msg in [
            "Request was throttled",
            "Rate limit exceeded",
            "HTTP 429",
            "Too Many Requests",
            "The operation has timed out",
            "gateway timeout",
            "Service Unavailable",
            "server returned 503",
            "504 from upstream",
            "resource temporarily unavailable",
        ] {
            assert_eq!(classify_message(msg), ErrorClass::Transient, "{msg}");
        }
    }

    #[test]
    fn test_classify_fatal() {
        assert_eq!(
            classify_message("User alice@school.edu not found"),
            ErrorClass::Fatal
        );
        assert_eq!(classify_message(""), ErrorClass::Fatal);
    }

    #[test]
    fn test_connection_wins_over_transient() {
        assert_eq!(
            classify_message("Session timed out"),
            ErrorClass::ConnectionRelated
        );
    }

    #[test]
    fn test_decide() {
        let policy = no_jitter();
        assert_eq!(
            policy.decide(ErrorClass::ConnectionRelated, 1),
            RetryDecision::Reconnect
        );
        assert_eq!(
            policy.decide(ErrorClass::Transient, 2),
            RetryDecision::Backoff(Duration::from_secs(2))
        );
        assert_eq!(policy.decide(ErrorClass::Transient, 3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(ErrorClass::Fatal, 1), RetryDecision::GiveUp);
        assert_eq!(
            RetryPolicy::no_retry().decide(ErrorClass::Transient, 1),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        let bad = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let inverted = RetryPolicy {
            initial_delay: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }
}
