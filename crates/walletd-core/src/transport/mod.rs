//! HTTP transport abstraction.
//!
//! Every explorer and broadcast call goes through [`HttpTransport`], so the
//! reader, tracker, and broadcaster can be exercised against canned
//! responses. [`ReqwestTransport`] is the production implementation.

mod client;
#[cfg(test)]
pub mod mock;

pub use client::ReqwestTransport;

use std::time::Duration;

use async_trait::async_trait;

/// A completed HTTP exchange. Non-2xx statuses are still `Ok`; callers
/// decide how to classify them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent as `text/plain`.
    Text(String),
    /// Sent as `application/json`.
    Json(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpReply, TransportError>;

    async fn post(
        &self,
        url: &str,
        body: RequestBody,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError>;
}
