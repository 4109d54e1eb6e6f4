use std::time::Duration;

use thiserror::Error;

/// Structural errors raised by [`IdentifiedQueue`](crate::queue::IdentifiedQueue).
///
/// These are local and synchronous. A failing call never mutates the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue ids must be unique: {0}")]
    DuplicateId(String),

    #[error("queue is empty")]
    EmptyQueue,

    #[error("no element with id={0}")]
    NotFound(String),

    #[error("queue has reached capacity ({0})")]
    CapacityExceeded(usize),
}

/// Errors returned by the engine to its caller (the HTTP front end).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("queue already exists: {0}")]
    AlreadyExists(String),

    #[error("queue does not exist: {0}")]
    QueueNotFound(String),

    #[error("a task with the same name already exists: {0}")]
    DuplicateTaskName(String),

    #[error("invalid queue config: {0}")]
    InvalidConfig(String),

    #[error("invalid queue id: {0}")]
    InvalidQueueId(String),

    #[error("dispatch slot {0} is empty")]
    SlotEmpty(usize),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl EngineError {
    /// Status code the front end answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::InvalidConfig(_) | EngineError::InvalidQueueId(_) => 400,
            EngineError::QueueNotFound(_) | EngineError::Queue(QueueError::NotFound(_)) => 404,
            EngineError::AlreadyExists(_)
            | EngineError::DuplicateTaskName(_)
            | EngineError::Queue(QueueError::DuplicateId(_)) => 409,
            EngineError::Queue(QueueError::CapacityExceeded(_)) => 429,
            EngineError::SlotEmpty(_) | EngineError::Queue(QueueError::EmptyQueue) => 500,
        }
    }
}

/// Failure of a single outbound delivery.
///
/// Never surfaced to callers: the dispatch queue folds it into the retry state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("delivery exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_front_end_contract() {
        assert_eq!(EngineError::InvalidConfig("x".into()).http_status(), 400);
        assert_eq!(EngineError::AlreadyExists("q".into()).http_status(), 409);
        assert_eq!(EngineError::QueueNotFound("q".into()).http_status(), 404);
        assert_eq!(EngineError::DuplicateTaskName("t".into()).http_status(), 409);
        assert_eq!(
            EngineError::from(QueueError::NotFound("t".into())).http_status(),
            404
        );
    }

    #[test]
    fn queue_error_is_transparent() {
        let err = EngineError::from(QueueError::EmptyQueue);
        assert_eq!(err.to_string(), "queue is empty");
    }
}
