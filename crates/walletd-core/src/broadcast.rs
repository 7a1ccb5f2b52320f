//! Transaction broadcasting across several push endpoints.
//!
//! Services are tried one at a time in priority order and the first one to
//! accept the transaction ends the attempt. Transient failures are retried
//! on the same service with exponential backoff; rejections that would
//! repeat verbatim (duplicate, fee too low, malformed) move straight on to
//! the next service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec;
use crate::error::CoreError;
use crate::sources::explorer_tx_url;
use crate::transport::{HttpReply, HttpTransport, RequestBody, TransportError};
use crate::types::{is_txid_hex, Network};

pub const STATUS_SENT: &str = "sent";

const BASE_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 120;

/// Longest slice of a service's error body kept in a failure message.
const BODY_SNIPPET_LEN: usize = 200;

// ==============================================================================
// Failure Classification
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    AlreadyInChain,
    InsufficientFee,
    Malformed,
    RateLimited,
    PayloadTooLarge,
    Forbidden,
    ServiceUnavailable,
    ServerError,
    Timeout,
    Network,
    Unexpected,
}

impl RejectionKind {
    /// Failures worth retrying against the same service.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::ServiceUnavailable
                | Self::ServerError
                | Self::Timeout
                | Self::Network
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyInChain => "already_in_chain",
            Self::InsufficientFee => "insufficient_fee",
            Self::Malformed => "malformed",
            Self::RateLimited => "rate_limited",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Forbidden => "forbidden",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ServerError => "server_error",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Unexpected => "unexpected",
        }
    }

    fn from_status(status: u16) -> Self {
        match status {
            400 => Self::Malformed,
            403 => Self::Forbidden,
            413 => Self::PayloadTooLarge,
            429 => Self::RateLimited,
            502..=504 => Self::ServiceUnavailable,
            500..=599 => Self::ServerError,
            _ => Self::Unexpected,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::AlreadyInChain => "transaction already in block chain",
            Self::InsufficientFee => "insufficient fee",
            Self::Malformed => "bad request: transaction rejected as invalid",
            Self::RateLimited => "rate limited: too many requests",
            Self::PayloadTooLarge => "payload too large",
            Self::Forbidden => "forbidden: access denied",
            Self::ServiceUnavailable => "service unavailable",
            Self::ServerError => "internal server error",
            Self::Timeout => "request timed out",
            Self::Network => "connection error",
            Self::Unexpected => "unexpected response",
        }
    }
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a non-2xx reply. Node rejection messages take precedence over
/// the status code, since services wrap them in assorted codes.
pub fn classify_rejection(status: u16, body: &str) -> RejectionKind {
    let lower = body.to_ascii_lowercase();
    const DUPLICATE: [&str; 4] = [
        "already in block chain",
        "txn-already-known",
        "txn-already-in-mempool",
        "transaction already exists",
    ];
    const LOW_FEE: [&str; 4] = [
        "insufficient fee",
        "min relay fee not met",
        "mempool min fee not met",
        "insufficient priority",
    ];
    if DUPLICATE.iter().any(|p| lower.contains(p)) {
        return RejectionKind::AlreadyInChain;
    }
    if LOW_FEE.iter().any(|p| lower.contains(p)) {
        return RejectionKind::InsufficientFee;
    }
    RejectionKind::from_status(status)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFailure {
    pub service: String,
    pub kind: RejectionKind,
    pub message: String,
}

impl std::fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} [{}]", self.service, self.message, self.kind)
    }
}

// ==============================================================================
// Services
// ==============================================================================

/// How the raw hex is carried in the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// The hex string itself as `text/plain`.
    RawHex,
    /// A JSON object with the hex under the given key.
    JsonField(String),
}

#[derive(Debug, Clone)]
pub struct BroadcastService {
    pub name: String,
    pub url: String,
    pub priority: u8,
    pub payload: Payload,
    /// Extra attempts on transient failure.
    pub retries: u32,
}

impl BroadcastService {
    pub fn new(name: &str, url: impl Into<String>, priority: u8, payload: Payload, retries: u32) -> Self {
        Self {
            name: name.to_owned(),
            url: url.into(),
            priority,
            payload,
            retries,
        }
    }

    fn body(&self, raw_hex: &str) -> RequestBody {
        match &self.payload {
            Payload::RawHex => RequestBody::Text(raw_hex.to_owned()),
            Payload::JsonField(key) => {
                let mut object = serde_json::Map::new();
                object.insert(key.clone(), serde_json::Value::String(raw_hex.to_owned()));
                RequestBody::Json(serde_json::Value::Object(object))
            }
        }
    }
}

/// Push endpoints for `network`, in priority order. Mainnet has more
/// options since some indexers do not serve testnet.
pub fn broadcast_services(network: Network) -> Vec<BroadcastService> {
    let json = |key: &str| Payload::JsonField(key.to_owned());
    let mut services = match network {
        Network::Mainnet => vec![
            BroadcastService::new("mempool.space", "https://mempool.space/api/tx", 1, Payload::RawHex, 2),
            BroadcastService::new("blockstream.info", "https://blockstream.info/api/tx", 2, Payload::RawHex, 2),
            BroadcastService::new("blockcypher.com", "https://api.blockcypher.com/v1/btc/main/txs/push", 3, json("tx"), 1),
            BroadcastService::new("blockchair.com", "https://api.blockchair.com/bitcoin/push/transaction", 4, json("data"), 1),
        ],
        Network::Testnet => vec![
            BroadcastService::new("mempool.space", "https://mempool.space/testnet/api/tx", 1, Payload::RawHex, 2),
            BroadcastService::new("blockstream.info", "https://blockstream.info/testnet/api/tx", 2, Payload::RawHex, 2),
            BroadcastService::new("blockcypher.com", "https://api.blockcypher.com/v1/btc/test3/txs/push", 3, json("tx"), 1),
        ],
    };
    services.sort_by_key(|s| s.priority);
    services
}

/// Per-request timeout, growing one second per KiB of payload.
pub fn timeout_for(size_bytes: usize) -> Duration {
    let size_kb = (size_bytes / 1024) as u64;
    Duration::from_secs((BASE_TIMEOUT_SECS + size_kb).min(MAX_TIMEOUT_SECS))
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    base.saturating_mul(factor).min(max)
}

// ==============================================================================
// Txid Extraction
// ==============================================================================

const TXID_POINTERS: [&str; 6] = [
    "/txid",
    "/tx_hash",
    "/hash",
    "/tx/hash",
    "/data/transaction_hash",
    "/result",
];

/// Pull a txid out of a success body: a bare 64-hex string, a JSON string,
/// or one of the field names the supported services use.
pub fn extract_txid(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if is_txid_hex(trimmed) {
        return Some(trimmed.to_ascii_lowercase());
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    if let Some(s) = value.as_str() {
        return is_txid_hex(s).then(|| s.to_ascii_lowercase());
    }
    TXID_POINTERS
        .iter()
        .filter_map(|p| value.pointer(p).and_then(serde_json::Value::as_str))
        .find(|s| is_txid_hex(s))
        .map(str::to_ascii_lowercase)
}

// ==============================================================================
// Broadcaster
// ==============================================================================

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastOutcome {
    pub txid: String,
    pub status: String,
    pub explorer_url: String,
    pub service_used: String,
    pub elapsed_ms: u64,
}

pub struct Broadcaster {
    transport: Arc<dyn HttpTransport>,
    mainnet: Vec<BroadcastService>,
    testnet: Vec<BroadcastService>,
    config: BroadcastConfig,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn HttpTransport>, config: BroadcastConfig) -> Self {
        Self {
            transport,
            mainnet: broadcast_services(Network::Mainnet),
            testnet: broadcast_services(Network::Testnet),
            config,
        }
    }

    pub fn with_services(mut self, network: Network, mut services: Vec<BroadcastService>) -> Self {
        services.sort_by_key(|s| s.priority);
        match network {
            Network::Mainnet => self.mainnet = services,
            Network::Testnet => self.testnet = services,
        }
        self
    }

    pub fn services(&self, network: Network) -> &[BroadcastService] {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Testnet => &self.testnet,
        }
    }

    /// Validate `raw_hex` locally, then push it to each service in turn
    /// until one accepts it.
    pub async fn broadcast(&self, raw_hex: &str, network: Network) -> Result<BroadcastOutcome, CoreError> {
        let raw_hex = raw_hex.trim();
        let decoded = codec::decode_transaction(raw_hex)?;
        let timeout = timeout_for(decoded.size);
        let started = Instant::now();
        let mut failures = Vec::new();

        for service in self.services(network) {
            match self.try_service(service, raw_hex, timeout).await {
                Ok(reported) => {
                    let txid = reported.unwrap_or_else(|| decoded.txid.clone());
                    if txid != decoded.txid {
                        warn!(service = %service.name, reported = %txid, local = %decoded.txid, "service reported a different txid");
                    }
                    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    info!(service = %service.name, %txid, %network, elapsed_ms, "transaction broadcast");
                    return Ok(BroadcastOutcome {
                        explorer_url: explorer_tx_url(network, &txid),
                        txid,
                        status: STATUS_SENT.to_owned(),
                        service_used: service.name.clone(),
                        elapsed_ms,
                    });
                }
                Err(failure) => {
                    warn!(service = %service.name, kind = %failure.kind, error = %failure.message, "broadcast service failed");
                    failures.push(failure);
                }
            }
        }

        Err(CoreError::BroadcastFailed { failures })
    }

    /// Attempt one service, retrying transient failures. `Ok(None)` means
    /// the service accepted the transaction without echoing a txid.
    async fn try_service(
        &self,
        service: &BroadcastService,
        raw_hex: &str,
        timeout: Duration,
    ) -> Result<Option<String>, ServiceFailure> {
        let mut attempt = 0;
        loop {
            match self.send_once(service, raw_hex, timeout).await {
                Ok(txid) => return Ok(txid),
                Err(failure) if failure.kind.is_transient() && attempt < service.retries => {
                    attempt += 1;
                    let delay = backoff_delay(attempt, self.config.backoff_base, self.config.backoff_max);
                    info!(service = %service.name, attempt, ?delay, kind = %failure.kind, "retrying broadcast");
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    async fn send_once(
        &self,
        service: &BroadcastService,
        raw_hex: &str,
        timeout: Duration,
    ) -> Result<Option<String>, ServiceFailure> {
        let failure = |kind: RejectionKind, detail: String| ServiceFailure {
            service: service.name.clone(),
            kind,
            message: detail,
        };

        let reply: HttpReply = self
            .transport
            .post(&service.url, service.body(raw_hex), timeout)
            .await
            .map_err(|e| {
                let kind = match e {
                    TransportError::Timeout(_) => RejectionKind::Timeout,
                    TransportError::Connect(_) | TransportError::Other(_) => RejectionKind::Network,
                };
                failure(kind, e.to_string())
            })?;

        if reply.is_success() {
            return Ok(extract_txid(&reply.body));
        }

        let kind = classify_rejection(reply.status, &reply.body);
        let snippet: String = reply.body.trim().chars().take(BODY_SNIPPET_LEN).collect();
        let message = if snippet.is_empty() {
            format!("HTTP {}: {}", reply.status, kind.describe())
        } else {
            format!("HTTP {}: {} ({snippet})", reply.status, kind.describe())
        };
        Err(failure(kind, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::legacy_tx_hex;
    use crate::transport::mock::MockTransport;

    fn services(names: &[&str]) -> Vec<BroadcastService> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| BroadcastService::new(n, format!("http://{n}/tx"), i as u8 + 1, Payload::RawHex, 2))
            .collect()
    }

    fn broadcaster(mock: Arc<MockTransport>, names: &[&str]) -> Broadcaster {
        Broadcaster::new(
            mock,
            BroadcastConfig {
                backoff_base: Duration::ZERO,
                backoff_max: Duration::ZERO,
            },
        )
        .with_services(Network::Testnet, services(names))
    }

    fn local_txid() -> String {
        codec::decode_transaction(&legacy_tx_hex()).unwrap().txid
    }

    #[tokio::test]
    async fn stops_at_first_accepting_service() {
        let txid = local_txid();
        let mock = Arc::new(
            MockTransport::builder()
                .reply("http://a/tx", 400, "sendrawtransaction RPC error: bad-txns")
                .reply("http://b/tx", 200, &txid)
                .reply("http://c/tx", 200, &txid)
                .build(),
        );
        let outcome = broadcaster(mock.clone(), &["a", "b", "c"])
            .broadcast(&legacy_tx_hex(), Network::Testnet)
            .await
            .unwrap();

        assert_eq!(outcome.service_used, "b");
        assert_eq!(outcome.status, STATUS_SENT);
        assert!(outcome.explorer_url.contains(&txid));
        assert!(outcome.explorer_url.contains("/testnet/"));
        assert_eq!(mock.call_count("http://a/tx"), 1);
        assert_eq!(mock.call_count("http://c/tx"), 0);
    }

    #[tokio::test]
    async fn transient_failures_retry_on_same_service() {
        let mock = Arc::new(
            MockTransport::builder()
                .reply("http://a/tx", 503, "")
                .fail("http://a/tx", TransportError::Timeout(Duration::from_secs(30)))
                .reply("http://a/tx", 200, "")
                .build(),
        );
        let outcome = broadcaster(mock.clone(), &["a"])
            .broadcast(&legacy_tx_hex(), Network::Testnet)
            .await
            .unwrap();

        assert_eq!(mock.call_count("http://a/tx"), 3);
        // Empty success body falls back to the locally computed txid.
        assert_eq!(outcome.txid, local_txid());
    }

    #[tokio::test]
    async fn duplicate_rejection_is_not_retried() {
        let mock = Arc::new(
            MockTransport::builder()
                .reply("http://a/tx", 400, "Transaction already in block chain")
                .reply("http://b/tx", 429, "slow down")
                .build(),
        );
        let err = broadcaster(mock.clone(), &["a", "b"])
            .broadcast(&legacy_tx_hex(), Network::Testnet)
            .await
            .unwrap_err();

        assert_eq!(mock.call_count("http://a/tx"), 1);
        // 429 is transient: initial attempt plus two retries.
        assert_eq!(mock.call_count("http://b/tx"), 3);
        match err {
            CoreError::BroadcastFailed { failures } => {
                let kinds: Vec<_> = failures.iter().map(|f| f.kind).collect();
                assert_eq!(kinds, vec![RejectionKind::AlreadyInChain, RejectionKind::RateLimited]);
                assert!(failures[0].message.contains("already in block chain"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn invalid_hex_never_reaches_the_network() {
        let mock = Arc::new(MockTransport::builder().build());
        let hex = legacy_tx_hex();
        let err = broadcaster(mock.clone(), &["a"])
            .broadcast(&hex[..hex.len() - 2], Network::Testnet)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn json_payload_wraps_hex() {
        let mock = Arc::new(
            MockTransport::builder()
                .json("http://push/tx", serde_json::json!({"tx": {"hash": local_txid()}}))
                .build(),
        );
        let b = Broadcaster::new(mock.clone(), BroadcastConfig::default()).with_services(
            Network::Mainnet,
            vec![BroadcastService::new("push", "http://push/tx", 1, Payload::JsonField("tx".into()), 0)],
        );
        let outcome = b.broadcast(&legacy_tx_hex(), Network::Mainnet).await.unwrap();
        assert_eq!(outcome.txid, local_txid());

        let calls = mock.calls();
        assert_eq!(
            calls[0].body,
            Some(RequestBody::Json(serde_json::json!({"tx": legacy_tx_hex()})))
        );
        assert_eq!(calls[0].timeout, Duration::from_secs(30));
    }

    #[test]
    fn txid_extraction_shapes() {
        let t = "AB".repeat(32);
        let lower = t.to_ascii_lowercase();
        assert_eq!(extract_txid(&format!("{t}\n")), Some(lower.clone()));
        assert_eq!(extract_txid(&format!("\"{t}\"")), Some(lower.clone()));
        assert_eq!(extract_txid(&format!(r#"{{"txid":"{t}"}}"#)), Some(lower.clone()));
        assert_eq!(
            extract_txid(&format!(r#"{{"data":{{"transaction_hash":"{t}"}}}}"#)),
            Some(lower)
        );
        assert_eq!(extract_txid(r#"{"ok":true}"#), None);
        assert_eq!(extract_txid("accepted"), None);
    }

    #[test]
    fn rejection_classification() {
        assert_eq!(classify_rejection(400, "min relay fee not met, 100 < 141"), RejectionKind::InsufficientFee);
        assert_eq!(classify_rejection(500, "txn-already-known"), RejectionKind::AlreadyInChain);
        assert_eq!(classify_rejection(413, ""), RejectionKind::PayloadTooLarge);
        assert_eq!(classify_rejection(503, ""), RejectionKind::ServiceUnavailable);
        assert_eq!(classify_rejection(418, ""), RejectionKind::Unexpected);
        assert!(!RejectionKind::Malformed.is_transient());
        assert!(RejectionKind::ServerError.is_transient());
    }

    #[test]
    fn timeout_scales_with_size() {
        assert_eq!(timeout_for(200), Duration::from_secs(30));
        assert_eq!(timeout_for(10 * 1024), Duration::from_secs(40));
        assert_eq!(timeout_for(1024 * 1024), Duration::from_secs(120));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(3);
        assert_eq!(backoff_delay(1, base, max), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, base, max), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3, base, max), Duration::from_millis(2000));
        assert_eq!(backoff_delay(4, base, max), max);
    }

    #[test]
    fn mainnet_has_more_services() {
        assert!(broadcast_services(Network::Mainnet).len() > broadcast_services(Network::Testnet).len());
    }
}
