//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{HttpRequest, QueueConfig, RateLimits, RetryPolicy, Task};
use crate::error::TransportError;
use crate::ports::{DeliveryRequest, Transport};

/// What a scripted delivery should do.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    /// Answers with the status once the delay has passed.
    After(Duration, u16),
    Fail(TransportError),
    /// Never answers; only a deadline ends the call.
    Hang,
}

/// Transport that answers from a script and records every request.
///
/// Once the script runs out, every call gets `fallback`.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<DeliveryRequest>>,
}

impl ScriptedTransport {
    pub fn always(status: u16) -> Arc<Self> {
        Self::scripted(Vec::new(), Reply::Status(status))
    }

    pub fn scripted(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: DeliveryRequest) -> Result<u16, TransportError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Status(code) => Ok(code),
            Reply::After(delay, code) => {
                tokio::time::sleep(delay).await;
                Ok(code)
            }
            Reply::Fail(err) => Err(err),
            Reply::Hang => std::future::pending::<Result<u16, TransportError>>().await,
        }
    }
}

pub const NOW_MS: i64 = 60_000;

pub fn epoch_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

pub fn test_config() -> QueueConfig {
    QueueConfig {
        retry_policy: RetryPolicy {
            max_attempts: 10,
            max_retry_duration: Some(Duration::from_secs(30)),
            max_backoff: Duration::from_secs(40),
            max_doublings: 2,
            min_backoff: Duration::from_secs(2),
        },
        rate_limits: RateLimits {
            max_concurrent_dispatches: 1,
            max_dispatches_per_second: 2.0,
        },
        timeout: None,
        default_uri: "http://website.com/".to_string(),
    }
}

pub fn task(name: &str) -> Task {
    Task::new(name, HttpRequest::post("", br#"{"test":"test"}"#.to_vec()))
}
