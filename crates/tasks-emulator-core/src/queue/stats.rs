//! Windowed counters behind `QueueStatistics`.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest window any statistic looks at.
pub const RETENTION: Duration = Duration::from_secs(5 * 60);
const LAST_MINUTE: Duration = Duration::from_secs(60);

/// Read-only snapshot of one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatistics {
    /// Pending tasks (not yet in a dispatch slot).
    pub number_of_tasks: usize,
    /// Occupied dispatch slots.
    pub running_tasks: usize,
    /// Tasks added per minute, averaged over five minutes.
    pub tasks_added: f64,
    /// Tasks failed per minute, averaged over five minutes.
    pub failed_tasks: f64,
    pub completed_last_min: usize,
    pub max_rate: f64,
    pub max_concurrent: usize,
}

/// Timestamp lists for added, completed and failed tasks.
///
/// Entries older than [`RETENTION`] are dropped on every write and read.
#[derive(Debug, Clone, Default)]
pub struct StatsWindow {
    added: VecDeque<DateTime<Utc>>,
    completed: VecDeque<DateTime<Utc>>,
    failed: VecDeque<DateTime<Utc>>,
}

impl StatsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_added(&mut self, at: DateTime<Utc>) {
        push(&mut self.added, at);
    }

    pub fn record_completed(&mut self, at: DateTime<Utc>) {
        push(&mut self.completed, at);
    }

    pub fn record_failed(&mut self, at: DateTime<Utc>) {
        push(&mut self.failed, at);
    }

    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = cutoff(now, RETENTION);
        for list in [&mut self.added, &mut self.completed, &mut self.failed] {
            list.retain(|t| *t >= cutoff);
        }
    }

    /// Per-minute rate of added tasks over the retention window.
    pub fn added_per_minute(&self) -> f64 {
        per_minute(self.added.len())
    }

    /// Per-minute rate of failed tasks over the retention window.
    pub fn failed_per_minute(&self) -> f64 {
        per_minute(self.failed.len())
    }

    pub fn completed_last_minute(&self, now: DateTime<Utc>) -> usize {
        let cutoff = cutoff(now, LAST_MINUTE);
        self.completed.iter().filter(|t| **t >= cutoff).count()
    }
}

fn push(list: &mut VecDeque<DateTime<Utc>>, at: DateTime<Utc>) {
    let cutoff = cutoff(at, RETENTION);
    while list.front().is_some_and(|t| *t < cutoff) {
        list.pop_front();
    }
    list.push_back(at);
}

fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn per_minute(count: usize) -> f64 {
    count as f64 / (RETENTION.as_secs_f64() / 60.0)
}
