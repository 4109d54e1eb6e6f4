//! Queue internals.
//!
//! - `identified`: FIFO with O(1) removal by id
//! - `dispatch`: one emulated queue (slots, token bucket, delivery, retry)
//! - `retry`: backoff and stop rule
//! - `stats`: windowed counters

pub mod dispatch;
pub mod identified;
pub mod retry;
pub mod stats;

pub use self::dispatch::{DEFAULT_DISPATCH_DEADLINE, DispatchQueue, headers};
pub use self::identified::{DEFAULT_CAPACITY, IdentifiedQueue};
pub use self::retry::{backoff_for_attempt, should_stop_retrying};
pub use self::stats::{QueueStatistics, StatsWindow};
