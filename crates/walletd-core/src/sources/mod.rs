//! Block-explorer source catalog.
//!
//! No two explorers share a response schema, so each source is a plain
//! record of `(name, endpoint, timeout, priority, parse)` where `parse` is a
//! pure function from the explorer's JSON into a canonical shape. The reader
//! and tracker walk these lists in ascending priority order.

mod blockchair;
mod blockcypher;
mod esplora;

use std::time::Duration;

use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::trace;

use crate::error::CoreError;
use crate::transport::HttpTransport;
use crate::types::{BalanceObservation, Network, Utxo};

pub type BalanceParser = fn(&serde_json::Value, &str) -> Result<BalanceObservation, String>;
pub type UtxoParser = fn(&serde_json::Value, &str) -> Result<Vec<Utxo>, String>;
pub type StatusParser = fn(&serde_json::Value, Option<u64>) -> Result<StatusObservation, String>;

/// One explorer endpoint with its response parser. `endpoint` contains a
/// `{id}` placeholder for the address or txid.
#[derive(Clone)]
pub struct Source<P> {
    pub name: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub priority: u8,
    pub parse: P,
}

impl<P> Source<P> {
    pub fn new(name: &str, endpoint: impl Into<String>, timeout: Duration, priority: u8, parse: P) -> Self {
        Self {
            name: name.to_owned(),
            endpoint: endpoint.into(),
            timeout,
            priority,
            parse,
        }
    }

    pub fn url_for(&self, id: &str) -> String {
        self.endpoint.replace("{id}", id)
    }
}

impl<P> std::fmt::Debug for Source<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("priority", &self.priority)
            .finish()
    }
}

pub type BalanceSource = Source<BalanceParser>;
pub type UtxoSource = Source<UtxoParser>;

/// A transaction lookup source. Some explorers do not report confirmation
/// counts directly; those expose a chain-tip endpoint so the count can be
/// derived from the block height.
#[derive(Clone, Debug)]
pub struct StatusSource {
    pub source: Source<StatusParser>,
    pub tip_endpoint: Option<String>,
}

/// Confirmation data as reported by one explorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusObservation {
    pub confirmations: u64,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub timestamp: Option<u64>,
}

// ==============================================================================
// Per-network catalogs
// ==============================================================================

const FAST: Duration = Duration::from_secs(10);
const SLOW: Duration = Duration::from_secs(15);

struct Bases {
    mempool: &'static str,
    blockstream: &'static str,
    blockcypher: &'static str,
    blockchair: &'static str,
}

fn bases(network: Network) -> Bases {
    match network {
        Network::Mainnet => Bases {
            mempool: "https://mempool.space/api",
            blockstream: "https://blockstream.info/api",
            blockcypher: "https://api.blockcypher.com/v1/btc/main",
            blockchair: "https://api.blockchair.com/bitcoin",
        },
        Network::Testnet => Bases {
            mempool: "https://mempool.space/testnet/api",
            blockstream: "https://blockstream.info/testnet/api",
            blockcypher: "https://api.blockcypher.com/v1/btc/test3",
            blockchair: "https://api.blockchair.com/bitcoin/testnet",
        },
    }
}

pub fn balance_sources(network: Network) -> Vec<BalanceSource> {
    let b = bases(network);
    let mut sources: Vec<BalanceSource> = vec![
        Source::new("mempool.space", format!("{}/address/{{id}}", b.mempool), FAST, 1, esplora::parse_balance as BalanceParser),
        Source::new("blockstream.info", format!("{}/address/{{id}}", b.blockstream), FAST, 2, esplora::parse_balance as BalanceParser),
        Source::new("blockcypher.com", format!("{}/addrs/{{id}}/balance", b.blockcypher), SLOW, 3, blockcypher::parse_balance as BalanceParser),
        Source::new("blockchair.com", format!("{}/dashboards/address/{{id}}", b.blockchair), SLOW, 4, blockchair::parse_balance as BalanceParser),
    ];
    sources.sort_by_key(|s| s.priority);
    sources
}

pub fn utxo_sources(network: Network) -> Vec<UtxoSource> {
    let b = bases(network);
    let mut sources: Vec<UtxoSource> = vec![
        Source::new("mempool.space", format!("{}/address/{{id}}/utxo", b.mempool), FAST, 1, esplora::parse_utxos as UtxoParser),
        Source::new("blockstream.info", format!("{}/address/{{id}}/utxo", b.blockstream), FAST, 2, esplora::parse_utxos as UtxoParser),
        Source::new(
            "blockcypher.com",
            format!("{}/addrs/{{id}}?unspentOnly=true&includeScript=true", b.blockcypher),
            SLOW,
            3,
            blockcypher::parse_utxos as UtxoParser,
        ),
        Source::new("blockchair.com", format!("{}/dashboards/address/{{id}}", b.blockchair), SLOW, 4, blockchair::parse_utxos as UtxoParser),
    ];
    sources.sort_by_key(|s| s.priority);
    sources
}

pub fn status_sources(network: Network) -> Vec<StatusSource> {
    let b = bases(network);
    let mut sources = vec![
        StatusSource {
            source: Source::new("mempool.space", format!("{}/tx/{{id}}", b.mempool), FAST, 1, esplora::parse_status as StatusParser),
            tip_endpoint: Some(format!("{}/blocks/tip/height", b.mempool)),
        },
        StatusSource {
            source: Source::new("blockstream.info", format!("{}/tx/{{id}}", b.blockstream), FAST, 2, esplora::parse_status as StatusParser),
            tip_endpoint: Some(format!("{}/blocks/tip/height", b.blockstream)),
        },
        StatusSource {
            source: Source::new("blockcypher.com", format!("{}/txs/{{id}}", b.blockcypher), SLOW, 3, blockcypher::parse_status as StatusParser),
            tip_endpoint: None,
        },
        StatusSource {
            source: Source::new(
                "blockchair.com",
                format!("{}/dashboards/transaction/{{id}}", b.blockchair),
                SLOW,
                4,
                blockchair::parse_status as StatusParser,
            ),
            tip_endpoint: None,
        },
    ];
    sources.sort_by_key(|s| s.source.priority);
    sources
}

/// Every source list for one network.
#[derive(Debug, Clone)]
pub struct NetworkSources {
    pub balance: Vec<BalanceSource>,
    pub utxo: Vec<UtxoSource>,
    pub status: Vec<StatusSource>,
}

impl NetworkSources {
    pub fn public(network: Network) -> Self {
        Self {
            balance: balance_sources(network),
            utxo: utxo_sources(network),
            status: status_sources(network),
        }
    }
}

/// Source lists for both networks. Production uses [`SourceCatalog::public`];
/// tests swap in lists pointing at scripted URLs.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    mainnet: NetworkSources,
    testnet: NetworkSources,
}

impl SourceCatalog {
    pub fn public() -> Self {
        Self {
            mainnet: NetworkSources::public(Network::Mainnet),
            testnet: NetworkSources::public(Network::Testnet),
        }
    }

    pub fn get(&self, network: Network) -> &NetworkSources {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Testnet => &self.testnet,
        }
    }

    pub fn with_network(mut self, network: Network, sources: NetworkSources) -> Self {
        match network {
            Network::Mainnet => self.mainnet = sources,
            Network::Testnet => self.testnet = sources,
        }
        self
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::public()
    }
}

/// Public explorer page for a transaction.
pub fn explorer_tx_url(network: Network, txid: &str) -> String {
    match network {
        Network::Mainnet => format!("https://mempool.space/tx/{txid}"),
        Network::Testnet => format!("https://mempool.space/testnet/tx/{txid}"),
    }
}

// ==============================================================================
// Fetching
// ==============================================================================

/// GET `url` and decode the body as JSON. Transport errors, non-2xx
/// statuses, and unparseable bodies all surface as `SourceUnavailable`
/// naming the source.
pub(crate) async fn fetch_json(
    transport: &dyn HttpTransport,
    source_name: &str,
    url: &str,
    timeout: Duration,
) -> Result<serde_json::Value, CoreError> {
    let reply = transport
        .get(url, timeout)
        .await
        .map_err(|e| CoreError::unavailable(source_name, e.to_string()))?;
    trace!(source = source_name, status = reply.status, body = %reply.body, "source reply");
    if !reply.is_success() {
        return Err(CoreError::unavailable(
            source_name,
            format!("HTTP {}", reply.status),
        ));
    }
    serde_json::from_str(&reply.body)
        .map_err(|e| CoreError::unavailable(source_name, format!("invalid JSON: {e}")))
}

// ==============================================================================
// Shared parsing helpers
// ==============================================================================

/// Read an integer that an explorer may encode as a JSON number (possibly a
/// float) or a numeric string.
pub(crate) fn as_int(value: Option<&serde_json::Value>) -> Option<i64> {
    let value = value?;
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if let Some(n) = value.as_u64() {
        return i64::try_from(n).ok();
    }
    if let Some(f) = value.as_f64() {
        return (f.is_finite() && f.fract() == 0.0).then_some(f as i64);
    }
    value.as_str().and_then(|s| s.trim().parse().ok())
}

pub(crate) fn require_int(value: Option<&serde_json::Value>, field: &str) -> Result<i64, String> {
    as_int(value).ok_or_else(|| format!("missing or non-integer `{field}`"))
}

pub(crate) fn require_non_negative(value: Option<&serde_json::Value>, field: &str) -> Result<u64, String> {
    let n = require_int(value, field)?;
    u64::try_from(n).map_err(|_| format!("`{field}` is negative: {n}"))
}

/// Blockchair's `YYYY-MM-DD HH:MM:SS`, always UTC.
const BLOCKCHAIR_TIME: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Parse an explorer timestamp into Unix seconds. RFC 3339 values keep
/// their offset; bare Blockchair timestamps are taken as UTC.
pub(crate) fn parse_utc_timestamp(s: &str) -> Option<u64> {
    let s = s.trim();
    let parsed = OffsetDateTime::parse(s, &Rfc3339)
        .or_else(|_| PrimitiveDateTime::parse(s, BLOCKCHAIR_TIME).map(PrimitiveDateTime::assume_utc))
        .ok()?;
    u64::try_from(parsed.unix_timestamp()).ok()
}

/// Confirmations for a block at `height` given the current chain tip.
pub(crate) fn confirmations_at(tip: u64, height: u64) -> u64 {
    if height == 0 || height > tip {
        return 0;
    }
    tip - height + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalogs_are_priority_ordered() {
        for network in Network::ALL {
            let balance = balance_sources(network);
            assert!(balance.len() >= 2);
            assert!(balance.windows(2).all(|w| w[0].priority < w[1].priority));

            let status = status_sources(network);
            assert!(status.windows(2).all(|w| w[0].source.priority < w[1].source.priority));
        }
    }

    #[test]
    fn source_hostnames_are_distinct() {
        let sources = balance_sources(Network::Mainnet);
        let hosts: std::collections::HashSet<_> =
            sources.iter().map(|s| s.endpoint.split('/').nth(2).unwrap_or("")).collect();
        assert_eq!(hosts.len(), sources.len());
    }

    #[test]
    fn url_substitutes_id() {
        let s = &utxo_sources(Network::Testnet)[0];
        assert_eq!(
            s.url_for("tb1qabc"),
            "https://mempool.space/testnet/api/address/tb1qabc/utxo"
        );
    }

    #[test]
    fn integer_coercion() {
        assert_eq!(as_int(Some(&json!(5))), Some(5));
        assert_eq!(as_int(Some(&json!("12"))), Some(12));
        assert_eq!(as_int(Some(&json!(3.0))), Some(3));
        assert_eq!(as_int(Some(&json!(3.5))), None);
        assert_eq!(as_int(Some(&json!(null))), None);
        assert_eq!(as_int(None), None);
    }

    #[test]
    fn utc_timestamps() {
        assert_eq!(parse_utc_timestamp("1970-01-01T00:00:00Z"), Some(0));
        assert_eq!(parse_utc_timestamp("2009-01-03 18:15:05"), Some(1_231_006_505));
        assert_eq!(parse_utc_timestamp("2024-02-29T12:00:00.123Z"), Some(1_709_208_000));
        assert_eq!(parse_utc_timestamp("garbage"), None);
    }

    #[test]
    fn utc_offsets_are_applied() {
        let utc = parse_utc_timestamp("2023-04-01T12:00:00Z");
        assert_eq!(utc, Some(1_680_350_400));
        assert_eq!(parse_utc_timestamp("2023-04-01T12:00:00+02:00"), Some(1_680_343_200));
        assert_eq!(parse_utc_timestamp("2023-04-01T12:00:00-01:00"), Some(1_680_354_000));
    }

    #[test]
    fn confirmation_math() {
        assert_eq!(confirmations_at(100, 100), 1);
        assert_eq!(confirmations_at(105, 100), 6);
        assert_eq!(confirmations_at(99, 100), 0);
        assert_eq!(confirmations_at(100, 0), 0);
    }
}
