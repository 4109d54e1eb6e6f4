//! Queue keys and task names as the front end builds them.

use std::fmt;

use rand::Rng;

use crate::error::EngineError;

const MAX_QUEUE_ID_LEN: usize = 100;

/// Largest integer a JSON number holds exactly (2^53 - 1).
const MAX_GENERATED_TASK_ID: u64 = (1 << 53) - 1;

pub fn validate_queue_id(queue_id: &str) -> Result<(), EngineError> {
    let valid = !queue_id.is_empty()
        && queue_id.len() <= MAX_QUEUE_ID_LEN
        && queue_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidQueueId(queue_id.to_string()))
    }
}

/// Controller-side key of a queue: `queue:{project}-{location}-{queue}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey(String);

impl QueueKey {
    pub fn new(project: &str, location: &str, queue: &str) -> Result<Self, EngineError> {
        validate_queue_id(queue)?;
        Ok(Self(format!("queue:{project}-{location}-{queue}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<QueueKey> for String {
    fn from(key: QueueKey) -> Self {
        key.0
    }
}

/// Fully qualified task name.
pub fn task_path(project: &str, location: &str, queue: &str, task_id: &str) -> String {
    format!("projects/{project}/locations/{location}/queues/{queue}/tasks/{task_id}")
}

/// Id for tasks enqueued without a name.
pub fn generate_task_id() -> String {
    rand::thread_rng()
        .gen_range(0..MAX_GENERATED_TASK_ID)
        .to_string()
}

/// Final `/`-separated segment of a task name.
pub fn task_short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
