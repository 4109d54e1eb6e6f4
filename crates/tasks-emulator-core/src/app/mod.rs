//! Application layer: the controller that drives every queue.
//!
//! - **controller**: queue registry, scheduling loop, refill timers
//! - **settings**: poll and refill intervals, queue capacity

pub mod controller;
pub mod settings;

pub use self::controller::QueueController;
pub use self::settings::ControllerSettings;
