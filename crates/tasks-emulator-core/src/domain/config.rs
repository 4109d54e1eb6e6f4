//! Queue configuration: retry policy, rate limits, delivery defaults.
//!
//! Every field carries a serde default, so a partial JSON body from the front end
//! deserializes into a complete config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration_secs;
use crate::error::EngineError;

/// Hard ceiling on `max_concurrent_dispatches`.
pub const MAX_CONCURRENT_DISPATCHES_CEILING: usize = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    /// `None` (or zero) means the attempt count alone governs.
    #[serde(rename = "maxRetrySeconds", with = "duration_secs::option")]
    pub max_retry_duration: Option<Duration>,

    #[serde(rename = "maxBackoffSeconds", with = "duration_secs")]
    pub max_backoff: Duration,

    pub max_doublings: u32,

    #[serde(rename = "minBackoffSeconds", with = "duration_secs")]
    pub min_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_retry_duration: None,
            max_backoff: Duration::from_secs(60 * 60),
            max_doublings: 16,
            min_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimits {
    /// Size of the dispatch slot array.
    pub max_concurrent_dispatches: usize,

    /// Token bucket fill rate.
    pub max_dispatches_per_second: f64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: 1000,
            max_dispatches_per_second: 500.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    #[serde(rename = "retryConfig")]
    pub retry_policy: RetryPolicy,

    pub rate_limits: RateLimits,

    /// Fallback delivery deadline for tasks that carry no `dispatch_deadline`.
    #[serde(rename = "timeoutSeconds", with = "duration_secs::option")]
    pub timeout: Option<Duration>,

    /// Used when a task's `http_request.url` is empty.
    pub default_uri: String,
}

impl QueueConfig {
    pub fn with_default_uri(mut self, uri: impl Into<String>) -> Self {
        self.default_uri = uri.into();
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let limits = &self.rate_limits;
        if limits.max_concurrent_dispatches == 0 {
            return Err(EngineError::InvalidConfig(
                "maxConcurrentDispatches must be at least 1".to_string(),
            ));
        }
        if limits.max_concurrent_dispatches > MAX_CONCURRENT_DISPATCHES_CEILING {
            return Err(EngineError::InvalidConfig(format!(
                "cannot set maxConcurrentDispatches to a value over {MAX_CONCURRENT_DISPATCHES_CEILING}"
            )));
        }
        if !limits.max_dispatches_per_second.is_finite() || limits.max_dispatches_per_second <= 0.0
        {
            return Err(EngineError::InvalidConfig(
                "maxDispatchesPerSecond must be a positive number".to_string(),
            ));
        }

        let retry = &self.retry_policy;
        if retry.min_backoff > retry.max_backoff {
            return Err(EngineError::InvalidConfig(
                "minBackoffSeconds must not exceed maxBackoffSeconds".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_yields_defaults() {
        let config: QueueConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.retry_policy.max_attempts, 3);
        assert_eq!(config.retry_policy.max_retry_duration, None);
        assert_eq!(config.rate_limits.max_concurrent_dispatches, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_body_keeps_other_defaults() {
        let config: QueueConfig = serde_json::from_str(
            r#"{
                "retryConfig": { "maxAttempts": 10, "maxRetrySeconds": 30, "minBackoffSeconds": 2 },
                "rateLimits": { "maxConcurrentDispatches": 1 },
                "defaultUri": "http://localhost:5001/fn"
            }"#,
        )
        .unwrap();

        assert_eq!(config.retry_policy.max_attempts, 10);
        assert_eq!(
            config.retry_policy.max_retry_duration,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.retry_policy.min_backoff, Duration::from_secs(2));
        assert_eq!(config.retry_policy.max_doublings, 16);
        assert_eq!(config.rate_limits.max_concurrent_dispatches, 1);
        assert_eq!(config.rate_limits.max_dispatches_per_second, 500.0);
        assert_eq!(config.default_uri, "http://localhost:5001/fn");
    }

    #[test]
    fn rejects_concurrency_over_ceiling() {
        let mut config = QueueConfig::default();
        config.rate_limits.max_concurrent_dispatches = 5001;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert_eq!(err.http_status(), 400);

        config.rate_limits.max_concurrent_dispatches = 5000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_rate() {
        let mut config = QueueConfig::default();
        config.rate_limits.max_dispatches_per_second = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let mut config = QueueConfig::default();
        config.retry_policy.min_backoff = Duration::from_secs(10);
        config.retry_policy.max_backoff = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }
}
