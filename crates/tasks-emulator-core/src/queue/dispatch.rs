//! DispatchQueue: admission, rate limiting, delivery and retry for one queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::identified::{DEFAULT_CAPACITY, IdentifiedQueue};
use super::retry::{backoff_for_attempt, should_stop_retrying};
use super::stats::{QueueStatistics, StatsWindow};
use crate::domain::{EmulatedTask, QueueConfig, Task, TaskStatus, task_short_name};
use crate::error::{EngineError, TransportError};
use crate::ports::{Clock, DeliveryRequest, Transport};

/// Deadline for tasks that specify none (and whose queue has no `timeout`).
pub const DEFAULT_DISPATCH_DEADLINE: Duration = Duration::from_secs(60);

/// Lower bound of the token bucket capacity, so that a queue with a rate below
/// one dispatch per second can still accumulate a whole token.
pub const MIN_MAX_TOKENS: f64 = 1.1;

/// Header names synthesized on every delivery.
pub mod headers {
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const QUEUE_NAME: &str = "X-CloudTasks-QueueName";
    pub const TASK_NAME: &str = "X-CloudTasks-TaskName";
    pub const TASK_RETRY_COUNT: &str = "X-CloudTasks-TaskRetryCount";
    pub const TASK_EXECUTION_COUNT: &str = "X-CloudTasks-TaskExecutionCount";
    pub const TASK_ETA: &str = "X-CloudTasks-TaskETA";
    pub const TASK_PREVIOUS_RESPONSE: &str = "X-CloudTasks-TaskPreviousResponse";
}

/// Result of one delivery, sent back from the spawned call.
#[derive(Debug)]
struct DeliveryReport {
    slot: usize,
    task_name: String,
    outcome: Result<u16, TransportError>,
    finished_at: DateTime<Utc>,
}

/// One queue's pending tasks, dispatch slots and token bucket.
///
/// Design:
/// - All state is mutated by the scheduling loop only (`&mut self`).
/// - Deliveries run as spawned tokio tasks; they never touch the slots. Their
///   results come back over `reports` and are applied by `process_dispatch`.
/// - A slot is freed only from a terminal status, which is only reached after the
///   slot's report was applied, so two deliveries never share a slot.
pub struct DispatchQueue {
    name: String,
    config: QueueConfig,

    pending: IdentifiedQueue<String, EmulatedTask>,

    /// Exactly `max_concurrent_dispatches` entries.
    slots: Vec<Option<EmulatedTask>>,

    /// Free slot indexes; popped from the end, lowest index first.
    open_slots: Vec<usize>,

    tokens: f64,
    max_tokens: f64,
    last_token_update: DateTime<Utc>,

    /// Every name ever enqueued here, so a finished task cannot be replayed.
    seen_names: HashSet<String>,

    stats: StatsWindow,

    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    report_tx: mpsc::UnboundedSender<DeliveryReport>,
    reports: mpsc::UnboundedReceiver<DeliveryReport>,
}

impl DispatchQueue {
    pub fn new(
        name: impl Into<String>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_capacity(name, config, DEFAULT_CAPACITY, clock, transport)
    }

    pub fn with_capacity(
        name: impl Into<String>,
        config: QueueConfig,
        capacity: usize,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let slot_count = config.rate_limits.max_concurrent_dispatches;
        let max_tokens = config
            .rate_limits
            .max_dispatches_per_second
            .max(MIN_MAX_TOKENS);
        let (report_tx, reports) = mpsc::unbounded_channel();
        let now = clock.now();

        Self {
            name: name.into(),
            config,
            pending: IdentifiedQueue::with_capacity(capacity),
            slots: (0..slot_count).map(|_| None).collect(),
            open_slots: (0..slot_count).rev().collect(),
            tokens: 0.0,
            max_tokens,
            last_token_update: now,
            seen_names: HashSet::new(),
            stats: StatsWindow::new(),
            clock,
            transport,
            report_tx,
            reports,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Pending tasks in admission order.
    pub fn pending(&self) -> impl Iterator<Item = &EmulatedTask> {
        self.pending.iter()
    }

    pub fn slots(&self) -> &[Option<EmulatedTask>] {
        &self.slots
    }

    pub fn running_len(&self) -> usize {
        self.slots.len() - self.open_slots.len()
    }

    /// Pending work or an occupied slot.
    pub fn is_active(&self) -> bool {
        !self.pending.is_empty() || self.running_len() > 0
    }

    /// Add a task to the tail of the pending queue.
    ///
    /// A name is rejected if it was ever enqueued on this queue, even if that task
    /// has since finished.
    pub fn enqueue(&mut self, mut task: Task) -> Result<(), EngineError> {
        if self.seen_names.contains(&task.name) {
            return Err(EngineError::DuplicateTaskName(task.name));
        }
        if task.http_request.url.is_empty() {
            task.http_request.url = self.config.default_uri.clone();
        }

        let now = self.clock.now();
        let name = task.name.clone();
        self.pending
            .enqueue(name.clone(), EmulatedTask::new(task, now))?;
        self.stats.record_added(now);
        debug!(queue = %self.name, task = %name, pending = self.pending.len(), "task enqueued");
        self.seen_names.insert(name);
        Ok(())
    }

    /// Remove a pending task. Tasks already in a dispatch slot are not found.
    pub fn delete(&mut self, task_name: &str) -> Result<Task, EngineError> {
        let removed = self.pending.remove(&task_name.to_string())?;
        debug!(queue = %self.name, task = %task_name, "task deleted");
        Ok(removed.task)
    }

    /// Move pending tasks into free slots while a slot and a whole token are available.
    ///
    /// Returns the number of tasks admitted.
    pub fn dispatch_tasks(&mut self) -> usize {
        let now = self.clock.now();
        let min_backoff = self.config.retry_policy.min_backoff;
        let mut admitted = 0;

        while self.tokens >= 1.0 {
            let Some(&slot) = self.open_slots.last() else {
                break;
            };
            let Ok((_, mut task)) = self.pending.dequeue() else {
                break;
            };
            self.open_slots.pop();

            task.state.admit(now, min_backoff);
            self.slots[slot] = Some(task);
            self.tokens -= 1.0;
            admitted += 1;
        }

        if admitted > 0 {
            trace!(queue = %self.name, admitted, state = %self.debug_info(), "dispatched");
        }
        admitted
    }

    /// Advance every occupied slot by one step of the state machine.
    pub fn process_dispatch(&mut self) {
        self.apply_reports();

        let now = self.clock.now();
        for slot in 0..self.slots.len() {
            let Some(status) = self.slots[slot].as_ref().map(|t| t.state.status) else {
                continue;
            };
            let result = match status {
                s if s.is_terminal() => {
                    self.release(slot, status, now);
                    Ok(())
                }
                TaskStatus::NotStarted => self.run_task(slot),
                TaskStatus::Retry => self.handle_retry(slot),
                _ => Ok(()),
            };
            if let Err(err) = result {
                warn!(queue = %self.name, slot, error = %err, "slot vanished while processing");
            }
        }
    }

    /// Start a delivery for the task in `slot`, unless its backoff has not elapsed.
    ///
    /// Does not wait for the delivery; its outcome is applied by a later
    /// `process_dispatch`.
    pub fn run_task(&mut self, slot: usize) -> Result<(), EngineError> {
        let now = self.clock.now();
        let entry = self
            .slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(EngineError::SlotEmpty(slot))?;

        if !entry.state.is_due(now) {
            return Ok(());
        }

        entry.state.status = TaskStatus::Running;
        let request = delivery_request(&self.name, entry, now);
        // Zero means unset, at either level.
        let deadline = entry
            .task
            .dispatch_deadline
            .filter(|d| !d.is_zero())
            .or(self.config.timeout.filter(|d| !d.is_zero()))
            .unwrap_or(DEFAULT_DISPATCH_DEADLINE);
        let task_name = entry.task.name.clone();
        debug!(
            queue = %self.name,
            task = %task_name,
            attempt = entry.state.attempt,
            url = %request.url,
            "delivering task"
        );

        let transport = Arc::clone(&self.transport);
        let clock = Arc::clone(&self.clock);
        let report_tx = self.report_tx.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(deadline, transport.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(deadline)),
            };
            // The receiver is gone only when the queue was dropped; the task is abandoned then.
            let _ = report_tx.send(DeliveryReport {
                slot,
                task_name,
                outcome,
                finished_at: clock.now(),
            });
        });
        Ok(())
    }

    /// Apply the retry policy to a failed task in `slot`.
    pub fn handle_retry(&mut self, slot: usize) -> Result<(), EngineError> {
        let now = self.clock.now();
        let entry = self
            .slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(EngineError::SlotEmpty(slot))?;
        let policy = &self.config.retry_policy;

        if should_stop_retrying(&entry.state, policy, now) {
            entry.state.status = TaskStatus::Failed;
            warn!(
                queue = %self.name,
                task = %entry.task.name,
                attempts = entry.state.attempt,
                "task exhausted its retry budget"
            );
            return Ok(());
        }

        entry.state.backoff = backoff_for_attempt(entry.state.attempt, policy);
        entry.state.attempt += 1;
        entry.state.status = TaskStatus::NotStarted;
        Ok(())
    }

    /// Add `elapsed * max_dispatches_per_second` tokens, capped at `max_tokens`.
    pub fn refill_tokens(&mut self) {
        let now = self.clock.now();
        let elapsed = (now - self.last_token_update)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        self.add_tokens(elapsed * self.config.rate_limits.max_dispatches_per_second);
        self.last_token_update = now;
    }

    pub fn add_tokens(&mut self, tokens: f64) {
        self.set_tokens(self.tokens + tokens);
    }

    pub fn set_tokens(&mut self, tokens: f64) {
        self.tokens = tokens.clamp(0.0, self.max_tokens);
    }

    pub fn statistics(&mut self) -> QueueStatistics {
        let now = self.clock.now();
        self.stats.prune(now);
        QueueStatistics {
            number_of_tasks: self.pending.len(),
            running_tasks: self.running_len(),
            tasks_added: self.stats.added_per_minute(),
            failed_tasks: self.stats.failed_per_minute(),
            completed_last_min: self.stats.completed_last_minute(now),
            max_rate: self.config.rate_limits.max_dispatches_per_second,
            max_concurrent: self.config.rate_limits.max_concurrent_dispatches,
        }
    }

    pub fn debug_info(&self) -> String {
        let slots = self
            .slots
            .iter()
            .map(|s| s.as_ref().map_or("empty", |t| t.name()))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Task Queue ({}): active={} tokens={:.2} pending={}/{} dispatch=[{}] open={:?}",
            self.name,
            self.is_active(),
            self.tokens,
            self.pending.len(),
            self.pending.capacity(),
            slots,
            self.open_slots,
        )
    }

    fn apply_reports(&mut self) {
        while let Ok(report) = self.reports.try_recv() {
            self.apply_report(report);
        }
    }

    fn apply_report(&mut self, report: DeliveryReport) {
        let Some(entry) = self.slots.get_mut(report.slot).and_then(Option::as_mut) else {
            return;
        };
        if entry.task.name != report.task_name || entry.state.status != TaskStatus::Running {
            return;
        }

        let state = &mut entry.state;
        match report.outcome {
            Ok(code) if (200..300).contains(&code) => {
                state.status = TaskStatus::Finished;
                debug!(queue = %self.name, task = %report.task_name, status = code, "task delivered");
            }
            Ok(code) => {
                state.status = TaskStatus::Retry;
                state.last_run_at = Some(report.finished_at);
                state.previous_response = Some(code);
                // 5xx never reached the handler.
                if !(500..600).contains(&code) {
                    state.execution_count += 1;
                }
                debug!(queue = %self.name, task = %report.task_name, status = code, "delivery rejected");
            }
            Err(err) => {
                state.status = TaskStatus::Retry;
                state.last_run_at = Some(report.finished_at);
                state.previous_response = None;
                state.execution_count += 1;
                debug!(queue = %self.name, task = %report.task_name, error = %err, "delivery failed");
            }
        }
    }

    fn release(&mut self, slot: usize, status: TaskStatus, now: DateTime<Utc>) {
        if self.slots[slot].take().is_none() {
            return;
        }
        self.open_slots.push(slot);
        self.stats.record_completed(now);
        if status == TaskStatus::Failed {
            self.stats.record_failed(now);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_slots(&mut self, slots: Vec<Option<EmulatedTask>>) {
        self.open_slots = (0..slots.len()).rev().filter(|i| slots[*i].is_none()).collect();
        self.slots = slots;
    }

    #[cfg(test)]
    pub(crate) fn slot_mut(&mut self, slot: usize) -> Option<&mut EmulatedTask> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Wait for the next delivery report and apply it.
    #[cfg(test)]
    pub(crate) async fn settle_one(&mut self) {
        if let Some(report) = self.reports.recv().await {
            self.apply_report(report);
        }
    }
}

/// Content type, synthesized headers, then the task's own headers (which win).
fn delivery_request(queue_name: &str, entry: &EmulatedTask, now: DateTime<Utc>) -> DeliveryRequest {
    let state = &entry.state;
    let http = &entry.task.http_request;
    let eta = entry.task.schedule_time.unwrap_or(now).timestamp_millis();

    let mut pairs: Vec<(String, String)> = vec![
        (headers::CONTENT_TYPE.into(), "application/json".into()),
        (headers::QUEUE_NAME.into(), queue_name.into()),
        (
            headers::TASK_NAME.into(),
            task_short_name(&entry.task.name).into(),
        ),
        (
            headers::TASK_RETRY_COUNT.into(),
            state.retry_count().to_string(),
        ),
        (
            headers::TASK_EXECUTION_COUNT.into(),
            state.execution_count.to_string(),
        ),
        (headers::TASK_ETA.into(), eta.to_string()),
    ];
    if let Some(code) = state.previous_response {
        pairs.push((headers::TASK_PREVIOUS_RESPONSE.into(), code.to_string()));
    }

    let mut custom: Vec<_> = http.headers.iter().collect();
    custom.sort();
    for (name, value) in custom {
        set_header(&mut pairs, name, value);
    }

    DeliveryRequest {
        url: http.url.clone(),
        headers: pairs,
        body: http.body.clone(),
    }
}

fn set_header(pairs: &mut Vec<(String, String)>, name: &str, value: &str) {
    match pairs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(existing) => *existing = (name.to_string(), value.to_string()),
        None => pairs.push((name.to_string(), value.to_string())),
    }
}
