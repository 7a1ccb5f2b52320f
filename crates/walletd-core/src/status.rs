//! Transaction confirmation tracking.
//!
//! Sources are tried sequentially and the first answer is authoritative.
//! A short pause separates failed attempts so rate-limited explorers are not
//! hit back to back.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{cache_key, status_ttl, store_best_effort, CacheKind, DurableCache};
use crate::error::CoreError;
use crate::sources::{explorer_tx_url, fetch_json, SourceCatalog, StatusObservation, StatusSource};
use crate::transport::HttpTransport;
use crate::types::{is_txid_hex, Network, StatusKind, TransactionStatus};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Pause after a failed source before trying the next one.
    pub retry_delay: Duration,
    pub tip_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            tip_timeout: Duration::from_secs(5),
        }
    }
}

pub struct StatusTracker {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<DurableCache>,
    catalog: Arc<SourceCatalog>,
    config: TrackerConfig,
}

impl StatusTracker {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        cache: Arc<DurableCache>,
        catalog: Arc<SourceCatalog>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            catalog,
            config,
        }
    }

    pub async fn status(
        &self,
        txid: &str,
        network: Network,
        force_refresh: bool,
    ) -> Result<TransactionStatus, CoreError> {
        if !is_txid_hex(txid) {
            return Err(CoreError::InvalidInput(format!(
                "txid must be 64 hex characters, got {:?}",
                txid
            )));
        }
        let txid = txid.to_ascii_lowercase();
        let key = cache_key(CacheKind::TxStatus, network, &txid);

        if !force_refresh {
            if let Some(cached) = self.cache.get::<TransactionStatus>(&key, false) {
                debug!(%txid, %network, "status cache hit");
                return Ok(cached);
            }
        }

        let sources = &self.catalog.get(network).status;
        let mut errors: Vec<(String, String)> = Vec::new();
        for (i, source) in sources.iter().enumerate() {
            match self.query(source, &txid).await {
                Ok(observation) => {
                    let status = TransactionStatus {
                        status: StatusKind::from_confirmations(observation.confirmations),
                        confirmations: observation.confirmations,
                        block_height: observation.block_height,
                        block_hash: observation.block_hash,
                        timestamp: observation.timestamp,
                        explorer_url: explorer_tx_url(network, &txid),
                        source: source.source.name.clone(),
                        error: None,
                        txid,
                    };
                    debug!(txid = %status.txid, source = %status.source, confirmations = status.confirmations, "status resolved");
                    store_best_effort(&self.cache, &key, &status, status_ttl(status.confirmations));
                    return Ok(status);
                }
                Err(e) => {
                    warn!(source = %source.source.name, %txid, error = %e, "status source failed");
                    errors.push((source.source.name.clone(), e.to_string()));
                    if i + 1 < sources.len() && !self.config.retry_delay.is_zero() {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        let summary = CoreError::AllSourcesFailed { errors }.to_string();
        if let Some(mut stale) = self.cache.get::<TransactionStatus>(&key, true) {
            warn!(%txid, %network, "all status sources failed; serving stale cache");
            stale.status = stale.status.as_cached();
            stale.error = Some(summary);
            return Ok(stale);
        }

        Ok(TransactionStatus {
            status: StatusKind::Unknown,
            confirmations: 0,
            block_height: None,
            block_hash: None,
            timestamp: None,
            explorer_url: explorer_tx_url(network, &txid),
            source: "none".to_owned(),
            error: Some(summary),
            txid,
        })
    }

    async fn query(&self, source: &StatusSource, txid: &str) -> Result<StatusObservation, CoreError> {
        let s = &source.source;
        let raw = fetch_json(self.transport.as_ref(), &s.name, &s.url_for(txid), s.timeout).await?;
        let tip = match &source.tip_endpoint {
            Some(url) => self.chain_tip(&s.name, url).await,
            None => None,
        };
        (s.parse)(&raw, tip).map_err(|e| CoreError::unavailable(&s.name, e))
    }

    /// Current block height, best effort. A failed lookup only costs
    /// confirmation precision.
    async fn chain_tip(&self, source_name: &str, url: &str) -> Option<u64> {
        match self.transport.get(url, self.config.tip_timeout).await {
            Ok(reply) if reply.is_success() => reply.body.trim().parse().ok(),
            Ok(reply) => {
                debug!(source = source_name, status = reply.status, "tip height lookup failed");
                None
            }
            Err(e) => {
                debug!(source = source_name, error = %e, "tip height lookup failed");
                None
            }
        }
    }
}
