//! Multi-source balance and UTXO lookups.
//!
//! Balances are cross-checked: the two highest-priority sources are asked,
//! and when they disagree a third breaks the tie. UTXO lists are not voted
//! on; the first source to answer wins. Every live answer is cached, and a
//! stale cache entry is preferred over an error when all sources fail.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{cache_key, store_best_effort, CacheKind, DurableCache, BALANCE_TTL, UTXO_TTL};
use crate::error::CoreError;
use crate::sources::{fetch_json, BalanceSource, SourceCatalog};
use crate::transport::HttpTransport;
use crate::types::{Balance, BalanceObservation, ConsensusKind, Network, UtxoSet};

pub const OFFLINE_SOURCE: &str = "offline_cache";
pub const STALE_SOURCE: &str = "stale_cache";

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub balance_ttl: Duration,
    pub utxo_ttl: Duration,
    /// Matching answers needed before a balance is returned without a
    /// tie-break.
    pub quorum: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            balance_ttl: BALANCE_TTL,
            utxo_ttl: UTXO_TTL,
            quorum: 2,
        }
    }
}

pub struct ChainReader {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<DurableCache>,
    catalog: Arc<SourceCatalog>,
    config: ReaderConfig,
}

impl ChainReader {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        cache: Arc<DurableCache>,
        catalog: Arc<SourceCatalog>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            catalog,
            config,
        }
    }

    // ==========================================================================
    // Balance
    // ==========================================================================

    pub async fn balance(
        &self,
        address: &str,
        network: Network,
        offline: bool,
    ) -> Result<Balance, CoreError> {
        validate_lookup_id(address)?;
        let key = cache_key(CacheKind::Balance, network, address);

        if let Some(cached) = self.cache.get::<Balance>(&key, false) {
            debug!(address, %network, "balance cache hit");
            return Ok(cached);
        }

        if offline {
            return Ok(match self.cache.get::<Balance>(&key, true) {
                Some(stale) => relabel(
                    stale,
                    OFFLINE_SOURCE,
                    "offline mode: cached value may be outdated".to_owned(),
                ),
                None => Balance::empty(address, network, OFFLINE_SOURCE),
            });
        }

        self.query_balance(address, network, &key).await
    }

    /// Ask the sources directly, skipping the fresh-cache check. A stale
    /// entry is still served (labelled) when every source fails.
    pub async fn refresh_balance(&self, address: &str, network: Network) -> Result<Balance, CoreError> {
        validate_lookup_id(address)?;
        let key = cache_key(CacheKind::Balance, network, address);
        self.query_balance(address, network, &key).await
    }

    async fn query_balance(&self, address: &str, network: Network, key: &str) -> Result<Balance, CoreError> {
        let sources = &self.catalog.get(network).balance;
        let quorum = self.config.quorum.min(sources.len());
        let (primary, tie_breakers) = sources.split_at(quorum);
        let mut observations: Vec<(String, BalanceObservation)> = Vec::new();
        let mut errors: Vec<(String, String)> = Vec::new();

        for source in primary {
            self.observe(source, address, &mut observations, &mut errors)
                .await;
        }

        if observations.len() >= 2 && !all_equal(&observations) {
            info!(address, %network, "balance sources disagree; querying tie-break source");
            for source in tie_breakers {
                if self
                    .observe(source, address, &mut observations, &mut errors)
                    .await
                {
                    break;
                }
            }
        }

        if observations.is_empty() {
            return match self.cache.get::<Balance>(key, true) {
                Some(stale) => {
                    warn!(address, %network, "all balance sources failed; serving stale cache");
                    Ok(relabel(
                        stale,
                        STALE_SOURCE,
                        format!(
                            "live sources unavailable, showing cached data: {}",
                            CoreError::AllSourcesFailed {
                                errors: errors.clone()
                            }
                        ),
                    ))
                }
                None => Err(CoreError::AllSourcesFailed { errors }),
            };
        }

        let resolved = resolve_consensus(&observations);
        let balance = Balance {
            address: address.to_owned(),
            network,
            confirmed: resolved.observation.confirmed.max(0),
            unconfirmed: resolved.observation.unconfirmed,
            sources_checked: observations.len(),
            sources_agreed: resolved.agreed,
            source: resolved.source,
            consensus: resolved.kind,
            warning: None,
        };
        store_best_effort(&self.cache, key, &balance, self.config.balance_ttl);
        Ok(balance)
    }

    /// Query one balance source, recording the outcome. Returns `true` on
    /// success.
    async fn observe(
        &self,
        source: &BalanceSource,
        address: &str,
        observations: &mut Vec<(String, BalanceObservation)>,
        errors: &mut Vec<(String, String)>,
    ) -> bool {
        let result = fetch_json(
            self.transport.as_ref(),
            &source.name,
            &source.url_for(address),
            source.timeout,
        )
        .await
        .and_then(|raw| {
            (source.parse)(&raw, address).map_err(|e| CoreError::unavailable(&source.name, e))
        });

        match result {
            Ok(observation) => {
                debug!(source = %source.name, address, confirmed = observation.confirmed, "balance source answered");
                observations.push((source.name.clone(), observation));
                true
            }
            Err(e) => {
                warn!(source = %source.name, address, error = %e, "balance source failed");
                errors.push((source.name.clone(), e.to_string()));
                false
            }
        }
    }

    // ==========================================================================
    // UTXOs
    // ==========================================================================

    pub async fn utxos(
        &self,
        address: &str,
        network: Network,
        offline: bool,
        force_refresh: bool,
    ) -> Result<UtxoSet, CoreError> {
        validate_lookup_id(address)?;
        let key = cache_key(CacheKind::Utxo, network, address);

        if !force_refresh {
            if let Some(cached) = self.cache.get::<UtxoSet>(&key, false) {
                debug!(address, %network, "utxo cache hit");
                return Ok(cached);
            }
        }

        if offline {
            return Ok(match self.cache.get::<UtxoSet>(&key, true) {
                Some(mut stale) => {
                    stale.source = OFFLINE_SOURCE.to_owned();
                    stale.warning = Some("offline mode: cached value may be outdated".to_owned());
                    stale
                }
                None => UtxoSet {
                    address: address.to_owned(),
                    network,
                    utxos: Vec::new(),
                    source: OFFLINE_SOURCE.to_owned(),
                    warning: None,
                },
            });
        }

        let mut errors = Vec::new();
        for source in &self.catalog.get(network).utxo {
            let result = fetch_json(
                self.transport.as_ref(),
                &source.name,
                &source.url_for(address),
                source.timeout,
            )
            .await
            .and_then(|raw| {
                (source.parse)(&raw, address).map_err(|e| CoreError::unavailable(&source.name, e))
            });

            match result {
                Ok(mut utxos) => {
                    utxos.sort_by(|a, b| b.value.cmp(&a.value));
                    debug!(source = %source.name, address, count = utxos.len(), "utxo source answered");
                    let set = UtxoSet {
                        address: address.to_owned(),
                        network,
                        utxos,
                        source: source.name.clone(),
                        warning: None,
                    };
                    store_best_effort(&self.cache, &key, &set, self.config.utxo_ttl);
                    return Ok(set);
                }
                Err(e) => {
                    warn!(source = %source.name, address, error = %e, "utxo source failed");
                    errors.push((source.name.clone(), e.to_string()));
                }
            }
        }

        match self.cache.get::<UtxoSet>(&key, true) {
            Some(mut stale) => {
                warn!(address, %network, "all utxo sources failed; serving stale cache");
                stale.source = STALE_SOURCE.to_owned();
                stale.warning = Some("live sources unavailable, showing cached data".to_owned());
                Ok(stale)
            }
            None => Err(CoreError::AllSourcesFailed { errors }),
        }
    }
}

/// Addresses are interpolated into explorer URLs, so only the characters
/// that occur in base58 and bech32 encodings are accepted.
fn validate_lookup_id(address: &str) -> Result<(), CoreError> {
    if address.is_empty() || address.len() > 128 {
        return Err(CoreError::InvalidInput(format!(
            "address must be 1-128 characters, got {}",
            address.len()
        )));
    }
    if !address.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(CoreError::InvalidInput(format!(
            "address contains invalid characters: {address}"
        )));
    }
    Ok(())
}

fn relabel(mut balance: Balance, source: &str, warning: String) -> Balance {
    balance.source = source.to_owned();
    balance.consensus = ConsensusKind::Cached;
    balance.warning = Some(warning);
    balance
}

// ==============================================================================
// Consensus
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Resolved {
    observation: BalanceObservation,
    agreed: usize,
    source: String,
    kind: ConsensusKind,
}

fn all_equal(observations: &[(String, BalanceObservation)]) -> bool {
    observations.windows(2).all(|w| w[0].1 == w[1].1)
}

/// Reduce per-source observations to one answer. Expects at least one
/// observation.
fn resolve_consensus(observations: &[(String, BalanceObservation)]) -> Resolved {
    let names = |filter: &dyn Fn(&BalanceObservation) -> bool| {
        observations
            .iter()
            .filter(|(_, o)| filter(o))
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    if observations.len() == 1 {
        let (name, observation) = &observations[0];
        return Resolved {
            observation: *observation,
            agreed: 1,
            source: name.clone(),
            kind: ConsensusKind::SingleSource,
        };
    }

    if all_equal(observations) {
        return Resolved {
            observation: observations[0].1,
            agreed: observations.len(),
            source: names(&|_| true),
            kind: ConsensusKind::Unanimous,
        };
    }

    let mut counts: HashMap<BalanceObservation, usize> = HashMap::new();
    for (_, o) in observations {
        *counts.entry(*o).or_default() += 1;
    }
    let best = counts.values().copied().max().unwrap_or(0);
    let leaders: Vec<BalanceObservation> = counts
        .iter()
        .filter(|(_, c)| **c == best)
        .map(|(o, _)| *o)
        .collect();

    if best >= 2 && leaders.len() == 1 {
        let winner = leaders[0];
        return Resolved {
            observation: winner,
            agreed: best,
            source: names(&|o| *o == winner),
            kind: ConsensusKind::Majority,
        };
    }

    // i128 holds the sum of any number of i64 observations we will see.
    let n = observations.len() as f64;
    let mean = |field: fn(&BalanceObservation) -> i64| {
        let sum: i128 = observations.iter().map(|(_, o)| i128::from(field(o))).sum();
        (sum as f64 / n).round() as i64
    };
    Resolved {
        observation: BalanceObservation {
            confirmed: mean(|o| o.confirmed),
            unconfirmed: mean(|o| o.unconfirmed),
        },
        agreed: 0,
        source: format!("{} (average)", names(&|_| true)),
        kind: ConsensusKind::Average,
    }
}
