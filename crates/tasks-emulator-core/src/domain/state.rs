//! Per-task attempt state tracked by the dispatch queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Task, duration_secs};

/// Task status.
///
/// State transitions:
/// - NotStarted -> Running -> Finished
/// - NotStarted -> Running -> Retry -> NotStarted (while the retry budget remains)
/// - NotStarted -> Running -> Retry -> Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created or retried; runs once its backoff has elapsed.
    NotStarted,

    /// A delivery is in flight.
    Running,

    /// The last delivery failed; the retry policy decides what happens next.
    Retry,

    /// Retry budget exhausted.
    Failed,

    /// Delivered with a 2xx response.
    Finished,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Finished)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAttemptState {
    /// 1-based once the task has been admitted to a slot.
    pub attempt: u32,

    /// Minimum wait after `last_run_at` before the next attempt.
    #[serde(with = "duration_secs")]
    pub backoff: Duration,

    /// Start of the current attempt sequence (time budget origin).
    pub started_at: DateTime<Utc>,

    pub status: TaskStatus,

    pub last_run_at: Option<DateTime<Utc>>,

    pub previous_response: Option<u16>,

    /// Attempts that reached the target handler (5xx responses excluded).
    pub execution_count: u32,
}

impl TaskAttemptState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            attempt: 0,
            backoff: Duration::ZERO,
            started_at: now,
            status: TaskStatus::NotStarted,
            last_run_at: None,
            previous_response: None,
            execution_count: 0,
        }
    }

    /// Reset bookkeeping when the task is admitted to a dispatch slot.
    pub fn admit(&mut self, now: DateTime<Utc>, min_backoff: Duration) {
        self.attempt = 1;
        self.backoff = min_backoff;
        self.status = TaskStatus::NotStarted;
        self.started_at = now;
        self.last_run_at = None;
    }

    /// Whether the backoff since the last run has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run_at {
            None => true,
            Some(last) => (now - last).to_std().unwrap_or_default() >= self.backoff,
        }
    }

    /// Zero-based retry count reported to the target.
    pub fn retry_count(&self) -> u32 {
        self.attempt.saturating_sub(1)
    }
}

/// A task paired with its mutable attempt state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulatedTask {
    pub task: Task,
    pub state: TaskAttemptState,
}

impl EmulatedTask {
    pub fn new(task: Task, now: DateTime<Utc>) -> Self {
        Self {
            task,
            state: TaskAttemptState::new(now),
        }
    }

    pub fn name(&self) -> &str {
        &self.task.name
    }
}
