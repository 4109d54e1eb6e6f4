//! Implementations of the ports.
//!
//! - `HttpTransport`: outbound delivery over HTTP (reqwest)

pub mod http_transport;

pub use self::http_transport::HttpTransport;
