//! Domain model: tasks, attempt state, queue configuration, naming.

pub mod config;
pub mod duration_secs;
pub mod naming;
pub mod state;
pub mod task;

pub use config::{MAX_CONCURRENT_DISPATCHES_CEILING, QueueConfig, RateLimits, RetryPolicy};
pub use naming::{QueueKey, generate_task_id, task_path, task_short_name, validate_queue_id};
pub use state::{EmulatedTask, TaskAttemptState, TaskStatus};
pub use task::{HttpRequest, OidcToken, Task};
