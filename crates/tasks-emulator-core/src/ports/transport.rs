//! Transport port - the outbound delivery primitive.
//!
//! A call is cancelled by dropping its future; the dispatch queue does that when
//! the delivery deadline passes.

use async_trait::async_trait;

use crate::error::TransportError;

/// Fully synthesized outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub url: String,
    /// Header pairs in send order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl DeliveryRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST the request and return the response status code.
    async fn send(&self, request: DeliveryRequest) -> Result<u16, TransportError>;
}
