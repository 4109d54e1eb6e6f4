use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::duration_secs;

/// A unit of work with an HTTP delivery target.
///
/// `name` is unique within its owning queue for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<DateTime<Utc>>,

    /// Per-attempt delivery deadline.
    #[serde(
        default,
        with = "duration_secs::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub dispatch_deadline: Option<Duration>,

    pub http_request: HttpRequest,
}

impl Task {
    pub fn new(name: impl Into<String>, http_request: HttpRequest) -> Self {
        Self {
            name: name.into(),
            schedule_time: None,
            dispatch_deadline: None,
            http_request,
        }
    }

    pub fn with_dispatch_deadline(mut self, deadline: Duration) -> Self {
        self.dispatch_deadline = Some(deadline);
        self
    }

    pub fn with_schedule_time(mut self, at: DateTime<Utc>) -> Self {
        self.schedule_time = Some(at);
        self
    }
}

/// Delivery descriptor. An empty `url` means "use the queue's default URI".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub body: Vec<u8>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_token: Option<OidcToken>,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Identity-token descriptor carried with the task. The emulator does not mint tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcToken {
    pub service_account_email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_task_json() {
        let task: Task = serde_json::from_str(
            r#"{
                "name": "projects/p/locations/l/queues/q/tasks/1",
                "dispatchDeadline": 30,
                "httpRequest": {
                    "body": [123, 125],
                    "oidcToken": { "serviceAccountEmail": "svc@example.com" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(task.dispatch_deadline, Some(Duration::from_secs(30)));
        assert_eq!(task.http_request.url, "");
        assert_eq!(task.http_request.body, b"{}".to_vec());
        assert!(task.http_request.headers.is_empty());
        assert_eq!(
            task.http_request.oidc_token.unwrap().service_account_email,
            "svc@example.com"
        );
    }
}
