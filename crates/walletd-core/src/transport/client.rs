use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header;
use tracing::{debug, trace};

use crate::error::CoreError;

use super::{HttpReply, HttpTransport, RequestBody, TransportError};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Explorer-facing HTTP client over `reqwest`.
///
/// One pooled client is shared by every source and broadcast service; the
/// timeout is applied per request because each source has its own budget.
pub struct ReqwestTransport {
    client: reqwest::Client,
    limiter: Option<DirectRateLimiter>,
}

impl ReqwestTransport {
    /// If `requests_per_second` is set, every outbound request waits for the
    /// limiter first. Public explorers throttle aggressively, so a modest
    /// global ceiling keeps us under their limits.
    pub fn new(requests_per_second: Option<u32>) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .user_agent(concat!("walletd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::Io(std::io::Error::other(format!("build HTTP client: {e}"))))?;

        let limiter = match requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::InvalidInput("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self { client, limiter })
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        self.wait_for_rate_limit().await;
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;
        debug!(url, status, body_len = body.len(), "http response");
        trace!(url, body = %body, "http response body");
        Ok(HttpReply { status, body })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpReply, TransportError> {
        debug!(url, ?timeout, "http get");
        self.execute(self.client.get(url), url, timeout).await
    }

    async fn post(
        &self,
        url: &str,
        body: RequestBody,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        debug!(url, ?timeout, "http post");
        let request = match body {
            RequestBody::Text(text) => self
                .client
                .post(url)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(text),
            RequestBody::Json(json) => self.client.post(url).json(&json),
        };
        self.execute(request, url, timeout).await
    }
}

fn classify_reqwest_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
