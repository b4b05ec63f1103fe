//! Configuration for bulk orchestration
//!
//! Controls how targets are chunked and how many chunks run at once.

use crate::error::BulkError;
use std::time::Duration;

/// Chunking and concurrency settings
///
/// # Examples
///
/// ```
/// use roster_bulk::BulkConfig;
/// use std::time::Duration;
///
/// let config = BulkConfig::default();
/// assert_eq!(config.chunk_size, 50);
/// assert_eq!(config.max_concurrent_chunks, 3);
///
/// let fast = BulkConfig::new(20, 2).with_inter_chunk_delay(Duration::ZERO);
/// assert!(fast.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkConfig {
    /// Targets per batched remote command
    pub chunk_size: usize,
    /// Chunks in flight at once
    pub max_concurrent_chunks: usize,
    /// Pause between chunk dispatches
    pub inter_chunk_delay: Duration,
}

impl BulkConfig {
    /// Create a configuration; zero values are clamped to 1
    pub fn new(chunk_size: usize, max_concurrent_chunks: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_concurrent_chunks: max_concurrent_chunks.max(1),
            ..Default::default()
        }
    }

    pub fn with_inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<(), BulkError> {
        if self.chunk_size == 0 {
            return Err(BulkError::InvalidConfig("chunk_size must be at least 1".into()));
        }
        if self.max_concurrent_chunks == 0 {
            return Err(BulkError::InvalidConfig(
                "max_concurrent_chunks must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Number of chunks needed for `items` targets
    pub fn chunk_count(&self, items: usize) -> usize {
        items.div_ceil(self.chunk_size.max(1))
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            max_concurrent_chunks: 3,
            inter_chunk_delay: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_to_minimum() {
        let config = BulkConfig::new(0, 0);
        assert_eq!(config.chunk_size, 1);
        assert_eq!(config.max_concurrent_chunks, 1);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = BulkConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chunk_count() {
        let config = BulkConfig::default();
        assert_eq!(config.chunk_count(0), 0);
        assert_eq!(config.chunk_count(50), 1);
        assert_eq!(config.chunk_count(120), 3);
    }
}
