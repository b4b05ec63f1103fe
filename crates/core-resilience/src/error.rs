//! Error types for the resilience module

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the resilience primitives themselves
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting requests
    #[error("Circuit breaker is open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// Configuration rejected by `validate()`
    #[error("Invalid resilience configuration: {0}")]
    InvalidConfig(String),
}

/// Result of running an operation through a circuit breaker
///
/// Either the breaker refused to run the operation, or the operation ran
/// and failed with its own error.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The operation was not invoked
    #[error(transparent)]
    Rejected(ResilienceError),

    /// The operation ran and failed
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub(crate) fn open(retry_after: Duration) -> Self {
        BreakerError::Rejected(ResilienceError::CircuitOpen { retry_after })
    }

    /// Whether the breaker short-circuited the call
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            BreakerError::Rejected(ResilienceError::CircuitOpen { .. })
        )
    }

    /// Time until the breaker admits a trial call, when it rejected this one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BreakerError::Rejected(ResilienceError::CircuitOpen { retry_after }) => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// The operation's own error, if it ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Rejected(_) => None,
        }
    }

    /// Map the wrapped operation error
    pub fn map_inner<F, E2>(self, f: F) -> BreakerError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            BreakerError::Rejected(err) => BreakerError::Rejected(err),
            BreakerError::Inner(e) => BreakerError::Inner(f(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_error_predicates() {
        let open: BreakerError<String> = BreakerError::open(Duration::from_secs(3));
        assert!(open.is_open());
        assert_eq!(open.retry_after(), Some(Duration::from_secs(3)));
        assert!(open.into_inner().is_none());

        let inner: BreakerError<String> = BreakerError::Inner("boom".to_string());
        assert!(!inner.is_open());
        assert_eq!(inner.retry_after(), None);
        assert_eq!(inner.into_inner(), Some("boom".to_string()));
    }

    #[test]
    fn test_map_inner_preserves_rejection() {
        let open: BreakerError<u32> = BreakerError::open(Duration::from_millis(5));
        let mapped = open.map_inner(|n| n.to_string());
        assert_eq!(mapped.retry_after(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_display() {
        let err = ResilienceError::CircuitOpen {
            retry_after: Duration::from_secs(2),
        };
        assert!(err.to_string().contains("open"));

        let err = ResilienceError::InvalidConfig("failure_threshold must be > 0".into());
        assert!(err.to_string().contains("failure_threshold"));
    }
}
