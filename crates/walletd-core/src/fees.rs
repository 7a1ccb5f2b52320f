//! Recommended fee rates.
//!
//! Every configured source is asked and each tier keeps the highest rate
//! seen, so disagreement errs toward faster confirmation. When nothing
//! answers, a stale cache entry or a fixed per-network table is served.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{cache_key, store_best_effort, unix_now, CacheKind, DurableCache, FEE_TTL};
use crate::error::CoreError;
use crate::sources::{as_int, fetch_json, Source};
use crate::transport::HttpTransport;
use crate::types::Network;

pub const FEE_UNIT: &str = "sat/vB";
pub const FALLBACK_SOURCE: &str = "fallback";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeTiers {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl FeeTiers {
    fn max(self, other: Self) -> Self {
        Self {
            high: self.high.max(other.high),
            medium: self.medium.max(other.medium),
            low: self.low.max(other.low),
        }
    }

    /// Force `high >= medium >= low >= 1`.
    fn normalized(self) -> Self {
        let low = self.low.max(1);
        let medium = self.medium.max(low);
        Self {
            high: self.high.max(medium),
            medium,
            low,
        }
    }

    /// Fixed rates used when no source or cache entry is available.
    pub fn fallback(network: Network) -> Self {
        let base = match network {
            Network::Mainnet => 5,
            Network::Testnet => 1,
        };
        Self {
            high: base * 2,
            medium: base,
            low: (base / 2).max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// Recommended rate; equal to `medium_priority`.
    pub fee_rate: u64,
    pub high_priority: u64,
    pub medium_priority: u64,
    pub low_priority: u64,
    pub timestamp: u64,
    pub unit: String,
    pub source: String,
}

impl FeeEstimate {
    fn new(tiers: FeeTiers, source: String) -> Self {
        Self {
            fee_rate: tiers.medium,
            high_priority: tiers.high,
            medium_priority: tiers.medium,
            low_priority: tiers.low,
            timestamp: unix_now(),
            unit: FEE_UNIT.to_owned(),
            source,
        }
    }
}

// ==============================================================================
// Sources
// ==============================================================================

pub type FeeParser = fn(&Value) -> Result<FeeTiers, String>;
pub type FeeSource = Source<FeeParser>;

pub fn fee_sources(network: Network) -> Vec<FeeSource> {
    let (mempool, blockstream) = match network {
        Network::Mainnet => ("https://mempool.space/api", "https://blockstream.info/api"),
        Network::Testnet => ("https://mempool.space/testnet/api", "https://blockstream.info/testnet/api"),
    };
    vec![
        Source::new(
            "mempool.space",
            format!("{mempool}/v1/fees/recommended"),
            Duration::from_secs(10),
            1,
            parse_recommended as FeeParser,
        ),
        Source::new(
            "blockstream.info",
            format!("{blockstream}/fee-estimates"),
            Duration::from_secs(10),
            2,
            parse_target_map as FeeParser,
        ),
    ]
}

/// mempool.space `{fastestFee, halfHourFee, hourFee, economyFee, minimumFee}`.
fn parse_recommended(raw: &Value) -> Result<FeeTiers, String> {
    let rate = |field: &str| {
        as_int(raw.get(field))
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| format!("missing `{field}`"))
    };
    Ok(FeeTiers {
        high: rate("fastestFee")?,
        medium: rate("halfHourFee")?,
        low: rate("hourFee")?,
    })
}

/// Esplora `{"<target blocks>": sat_per_vb, ...}` with fractional rates.
fn parse_target_map(raw: &Value) -> Result<FeeTiers, String> {
    let map = raw.as_object().ok_or("expected an object of targets")?;
    let rate = |target: &str| {
        map.get(target)
            .and_then(Value::as_f64)
            .filter(|r| r.is_finite() && *r >= 0.0)
            .map(|r| r.ceil() as u64)
            .ok_or_else(|| format!("missing target `{target}`"))
    };
    Ok(FeeTiers {
        high: rate("1")?,
        medium: rate("6")?,
        low: rate("144")?,
    })
}

// ==============================================================================
// Estimator
// ==============================================================================

pub struct FeeEstimator {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<DurableCache>,
    mainnet: Vec<FeeSource>,
    testnet: Vec<FeeSource>,
}

impl FeeEstimator {
    pub fn new(transport: Arc<dyn HttpTransport>, cache: Arc<DurableCache>) -> Self {
        Self {
            transport,
            cache,
            mainnet: fee_sources(Network::Mainnet),
            testnet: fee_sources(Network::Testnet),
        }
    }

    pub fn with_sources(mut self, network: Network, sources: Vec<FeeSource>) -> Self {
        match network {
            Network::Mainnet => self.mainnet = sources,
            Network::Testnet => self.testnet = sources,
        }
        self
    }

    pub async fn estimate(&self, network: Network) -> FeeEstimate {
        let key = cache_key(CacheKind::Fees, network, "recommended");
        if let Some(cached) = self.cache.get::<FeeEstimate>(&key, false) {
            return cached;
        }

        let sources = match network {
            Network::Mainnet => &self.mainnet,
            Network::Testnet => &self.testnet,
        };

        let mut combined: Option<FeeTiers> = None;
        let mut answered = Vec::new();
        for source in sources {
            match self.query(source).await {
                Ok(tiers) => {
                    debug!(source = %source.name, ?tiers, "fee source answered");
                    combined = Some(combined.map_or(tiers, |c| c.max(tiers)));
                    answered.push(source.name.as_str());
                }
                Err(e) => warn!(source = %source.name, error = %e, "fee source failed"),
            }
        }

        if let Some(tiers) = combined {
            let estimate = FeeEstimate::new(tiers.normalized(), answered.join(", "));
            store_best_effort(&self.cache, &key, &estimate, FEE_TTL);
            return estimate;
        }

        if let Some(mut stale) = self.cache.get::<FeeEstimate>(&key, true) {
            warn!(%network, "all fee sources failed; serving stale cache");
            stale.source = crate::reader::STALE_SOURCE.to_owned();
            return stale;
        }

        warn!(%network, "all fee sources failed; using fallback rates");
        FeeEstimate::new(FeeTiers::fallback(network), FALLBACK_SOURCE.to_owned())
    }

    async fn query(&self, source: &FeeSource) -> Result<FeeTiers, CoreError> {
        let raw = fetch_json(self.transport.as_ref(), &source.name, &source.endpoint, source.timeout).await?;
        (source.parse)(&raw).map_err(|e| CoreError::unavailable(&source.name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    fn estimator(mock: Arc<MockTransport>) -> FeeEstimator {
        FeeEstimator::new(mock, Arc::new(DurableCache::in_memory()))
    }

    #[tokio::test]
    async fn takes_highest_rate_per_tier() {
        let mock = Arc::new(
            MockTransport::builder()
                .json(
                    "https://mempool.space/api/v1/fees/recommended",
                    json!({"fastestFee": 20, "halfHourFee": 12, "hourFee": 4, "economyFee": 2}),
                )
                .json(
                    "https://blockstream.info/api/fee-estimates",
                    json!({"1": 18.2, "3": 15.0, "6": 13.4, "144": 1.1}),
                )
                .build(),
        );
        let fees = estimator(mock).estimate(Network::Mainnet).await;
        assert_eq!(fees.high_priority, 20);
        assert_eq!(fees.medium_priority, 14);
        assert_eq!(fees.low_priority, 4);
        assert_eq!(fees.fee_rate, 14);
        assert_eq!(fees.unit, FEE_UNIT);
        assert_eq!(fees.source, "mempool.space, blockstream.info");
    }

    #[tokio::test]
    async fn fallback_when_everything_fails() {
        let fees = estimator(Arc::new(MockTransport::builder().build()))
            .estimate(Network::Mainnet)
            .await;
        assert_eq!(fees.source, FALLBACK_SOURCE);
        assert_eq!((fees.high_priority, fees.medium_priority, fees.low_priority), (10, 5, 2));

        let testnet = FeeTiers::fallback(Network::Testnet);
        assert_eq!((testnet.high, testnet.medium, testnet.low), (2, 1, 1));
    }

    #[tokio::test]
    async fn stale_cache_beats_fallback() {
        let est = estimator(Arc::new(MockTransport::builder().build()));
        let key = cache_key(CacheKind::Fees, Network::Testnet, "recommended");
        let old = FeeEstimate::new(FeeTiers { high: 9, medium: 7, low: 3 }, "mempool.space".into());
        est.cache.set_at(&key, &old, FEE_TTL, 1).unwrap();

        let fees = est.estimate(Network::Testnet).await;
        assert_eq!(fees.medium_priority, 7);
        assert_eq!(fees.source, crate::reader::STALE_SOURCE);
    }

    #[test]
    fn tiers_are_monotonic() {
        let t = FeeTiers { high: 1, medium: 3, low: 0 }.normalized();
        assert_eq!((t.high, t.medium, t.low), (3, 3, 1));
    }
}
