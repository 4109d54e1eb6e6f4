//! tasks-emulator-core
//!
//! Local emulation of a managed push-task queue: named queues with retry and
//! rate limits, HTTP delivery of each task, exponential backoff on failure.
//!
//! # モジュール構成
//! - **domain**: タスク・試行状態・キュー設定・命名規則
//! - **queue**: IdentifiedQueue, DispatchQueue, retry, stats
//! - **ports**: Clock, Transport
//! - **impls**: HttpTransport (reqwest)
//! - **app**: QueueController, ControllerSettings
//! - **error**: QueueError, EngineError, TransportError

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;

#[cfg(test)]
mod testing;

pub use app::{ControllerSettings, QueueController};
pub use domain::{QueueConfig, Task};
pub use error::{EngineError, QueueError, TransportError};
pub use queue::QueueStatistics;
