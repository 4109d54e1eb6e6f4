//! Controller tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::duration_secs;
use crate::queue::DEFAULT_CAPACITY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerSettings {
    /// Pause between ticks while any queue has work.
    #[serde(with = "duration_secs")]
    pub busy_poll_interval: Duration,

    /// Longest pause between ticks while every queue is idle. An enqueue cuts it short.
    #[serde(with = "duration_secs")]
    pub idle_poll_interval: Duration,

    #[serde(with = "duration_secs")]
    pub token_refill_interval: Duration,

    /// Pending-task capacity of each queue.
    pub queue_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            busy_poll_interval: Duration::from_millis(1),
            idle_poll_interval: Duration::from_millis(1000),
            token_refill_interval: Duration::from_millis(1000),
            queue_capacity: DEFAULT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_in_defaults() {
        let settings: ControllerSettings =
            serde_json::from_str(r#"{"tokenRefillInterval": 0.05}"#).unwrap();
        assert_eq!(settings.token_refill_interval, Duration::from_millis(50));
        assert_eq!(settings.idle_poll_interval, Duration::from_secs(1));
        assert_eq!(settings.queue_capacity, 10_000);
    }
}
