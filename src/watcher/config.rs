//! Watcher tuning knobs.

use std::time::Duration;

/// Tuning for the long-poll views.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Long-poll horizon for each blocking query.
    pub wait_time: Duration,

    /// First retry delay after a failed fetch.
    pub retry_initial: Duration,

    /// Upper bound for the exponential retry backoff.
    pub retry_max: Duration,

    /// Capacity of the shared data channel. Kept small so a slow
    /// consumer slows the views instead of buffering stale values.
    pub data_buffer: usize,

    /// Capacity of the error channel; errors are dropped on overflow.
    pub error_buffer: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(60),
            retry_initial: Duration::from_millis(500),
            retry_max: Duration::from_secs(32),
            data_buffer: 16,
            error_buffer: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatcherConfig::default();
        assert_eq!(config.wait_time, Duration::from_secs(60));
        assert!(config.retry_initial < config.retry_max);
    }
}
