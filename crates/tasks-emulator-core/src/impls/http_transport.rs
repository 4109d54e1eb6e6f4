//! HttpTransport - reqwest を使った配送
//!
//! The deadline is enforced by the caller (dispatch queue) by dropping the future,
//! which aborts the in-flight request.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::ports::{DeliveryRequest, Transport};

#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: DeliveryRequest) -> Result<u16, TransportError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(classify)?;
        Ok(response.status().as_u16())
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_connect() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
