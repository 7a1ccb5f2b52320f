use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{HttpReply, HttpTransport, RequestBody, TransportError};

/// A scripted transport for tests. Replies are queued per URL; once a queue
/// drains to its last entry that entry keeps being returned. Unscripted URLs
/// fail with a connection error. Every request is recorded in order.
pub struct MockTransport {
    replies: Mutex<HashMap<String, VecDeque<Result<HttpReply, TransportError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub url: String,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

impl MockTransport {
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder {
            replies: HashMap::new(),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("mock calls lock").clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.url == url).count()
    }

    fn next_reply(&self, url: &str) -> Result<HttpReply, TransportError> {
        let mut replies = self.replies.lock().expect("mock replies lock");
        match replies.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("queue is non-empty"),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Connect(format!("no reply for {url}")))),
            None => Err(TransportError::Connect(format!("no route to {url}"))),
        }
    }
}

pub struct MockTransportBuilder {
    replies: HashMap<String, VecDeque<Result<HttpReply, TransportError>>>,
}

impl MockTransportBuilder {
    pub fn reply(mut self, url: &str, status: u16, body: &str) -> Self {
        self.replies
            .entry(url.to_owned())
            .or_default()
            .push_back(Ok(HttpReply::new(status, body)));
        self
    }

    pub fn json(self, url: &str, body: serde_json::Value) -> Self {
        self.reply(url, 200, &body.to_string())
    }

    pub fn fail(mut self, url: &str, err: TransportError) -> Self {
        self.replies
            .entry(url.to_owned())
            .or_default()
            .push_back(Err(err));
        self
    }

    pub fn build(self) -> MockTransport {
        MockTransport {
            replies: Mutex::new(self.replies),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpReply, TransportError> {
        self.calls.lock().expect("mock calls lock").push(RecordedCall {
            method: "GET",
            url: url.to_owned(),
            body: None,
            timeout,
        });
        self.next_reply(url)
    }

    async fn post(
        &self,
        url: &str,
        body: RequestBody,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        self.calls.lock().expect("mock calls lock").push(RecordedCall {
            method: "POST",
            url: url.to_owned(),
            body: Some(body),
            timeout,
        });
        self.next_reply(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_queue_then_sticks_on_last() {
        let mock = MockTransport::builder()
            .reply("http://a", 500, "boom")
            .reply("http://a", 200, "ok")
            .build();
        let t = Duration::from_secs(1);
        assert_eq!(mock.get("http://a", t).await.unwrap().status, 500);
        assert_eq!(mock.get("http://a", t).await.unwrap().status, 200);
        assert_eq!(mock.get("http://a", t).await.unwrap().status, 200);
        assert_eq!(mock.call_count("http://a"), 3);
    }

    #[tokio::test]
    async fn unscripted_url_fails_to_connect() {
        let mock = MockTransport::builder().build();
        let err = mock
            .get("http://nowhere", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
