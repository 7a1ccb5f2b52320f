//! Disk-backed key/value cache with per-entry TTL.
//!
//! Every successful explorer answer lands here so that the last known good
//! value survives restarts and outages. Reads go against an immutable
//! snapshot (`ArcSwap`) and never block; writers serialize on a mutex,
//! swap in a new snapshot, and rewrite the whole JSON document on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::types::{Network, SETTLED_CONFIRMATIONS};

pub const CACHE_FILE_NAME: &str = "chain_cache.json";

pub const BALANCE_TTL: Duration = Duration::from_secs(300);
pub const UTXO_TTL: Duration = Duration::from_secs(300);
pub const FEE_TTL: Duration = Duration::from_secs(300);

/// Status TTL by confirmation depth. Deeply buried transactions are
/// effectively immutable, so they may be cached much longer.
pub fn status_ttl(confirmations: u64) -> Duration {
    match confirmations {
        0 => Duration::from_secs(120),
        c if c < SETTLED_CONFIRMATIONS => Duration::from_secs(600),
        _ => Duration::from_secs(3600),
    }
}

// ==============================================================================
// Keys
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Balance,
    Utxo,
    TxStatus,
    Fees,
}

impl CacheKind {
    const ALL: [Self; 4] = [Self::Balance, Self::Utxo, Self::TxStatus, Self::Fees];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Balance => "balance",
            Self::Utxo => "utxo",
            Self::TxStatus => "txstatus",
            Self::Fees => "fees",
        }
    }

    fn of_key(key: &str) -> Option<Self> {
        let (prefix, _) = key.split_once('_')?;
        Self::ALL.into_iter().find(|kind| kind.as_str() == prefix)
    }
}

/// TTL for an entry written without one, derived from its key kind. Status
/// entries take their depth from the stored `confirmations` field.
fn implied_ttl(key: &str, value: &serde_json::Value) -> Option<Duration> {
    match CacheKind::of_key(key)? {
        CacheKind::Balance => Some(BALANCE_TTL),
        CacheKind::Utxo => Some(UTXO_TTL),
        CacheKind::Fees => Some(FEE_TTL),
        CacheKind::TxStatus => value
            .get("confirmations")
            .and_then(serde_json::Value::as_u64)
            .map(status_ttl),
    }
}

/// Composite key `<kind>_<network>_<address-or-txid>`.
pub fn cache_key(kind: CacheKind, network: Network, id: &str) -> String {
    format!("{}_{}_{}", kind.as_str(), network, id)
}

// ==============================================================================
// On-disk Document
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheDocument {
    cache: HashMap<String, serde_json::Value>,
    /// Unix seconds at which each key was last written.
    timestamps: HashMap<String, u64>,
    /// TTL in seconds each key was written with. Entries missing here fall
    /// back to the TTL implied by their key, or are only reachable with
    /// `ignore_ttl` when none is.
    #[serde(default)]
    ttls: HashMap<String, u64>,
}

impl CacheDocument {
    fn lookup(&self, key: &str, ignore_ttl: bool, now: u64) -> Option<&serde_json::Value> {
        let value = self.cache.get(key)?;
        if ignore_ttl {
            return Some(value);
        }
        let stored_at = *self.timestamps.get(key)?;
        let ttl = match self.ttls.get(key) {
            Some(secs) => *secs,
            None => implied_ttl(key, value).map_or(0, |ttl| ttl.as_secs()),
        };
        (now.saturating_sub(stored_at) < ttl).then_some(value)
    }
}

// ==============================================================================
// DurableCache
// ==============================================================================

pub struct DurableCache {
    /// `None` keeps the cache purely in memory.
    path: Option<PathBuf>,
    snapshot: ArcSwap<CacheDocument>,
    write_lock: Mutex<()>,
}

impl DurableCache {
    /// Open (or create) the cache under `dir` and load it eagerly. A missing
    /// or unreadable document starts an empty cache.
    pub fn open(dir: &Path) -> Result<Self, CoreError> {
        std::fs::create_dir_all(dir)?;
        let cache = Self {
            path: Some(dir.join(CACHE_FILE_NAME)),
            snapshot: ArcSwap::from_pointee(CacheDocument::default()),
            write_lock: Mutex::new(()),
        };
        cache.load();
        Ok(cache)
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            snapshot: ArcSwap::from_pointee(CacheDocument::default()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the in-memory state with the on-disk document.
    pub fn load(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let doc = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<CacheDocument>(&content) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cache file is corrupt; starting empty");
                    CacheDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheDocument::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cache file unreadable; starting empty");
                CacheDocument::default()
            }
        };
        debug!(path = %path.display(), entries = doc.cache.len(), "loaded cache");
        self.snapshot.store(Arc::new(doc));
    }

    /// Write the current snapshot to disk.
    pub fn save(&self) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.persist(&self.snapshot.load())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str, ignore_ttl: bool) -> Option<T> {
        self.get_at(key, ignore_ttl, unix_now())
    }

    pub fn get_at<T: DeserializeOwned>(&self, key: &str, ignore_ttl: bool, now: u64) -> Option<T> {
        let snapshot = self.snapshot.load();
        let value = snapshot.lookup(key, ignore_ttl, now)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "cached value has unexpected shape; ignoring");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CoreError> {
        self.set_at(key, value, ttl, unix_now())
    }

    pub fn set_at<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        now: u64,
    ) -> Result<(), CoreError> {
        let value = serde_json::to_value(value)
            .map_err(|e| CoreError::Cache(format!("serialize value for {key}: {e}")))?;

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut doc = CacheDocument::clone(&self.snapshot.load());
        doc.cache.insert(key.to_owned(), value);
        doc.timestamps.insert(key.to_owned(), now);
        doc.ttls.insert(key.to_owned(), ttl.as_secs());
        let doc = Arc::new(doc);
        self.snapshot.store(Arc::clone(&doc));
        self.persist(&doc)
    }

    fn persist(&self, doc: &CacheDocument) -> Result<(), CoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_vec(doc)
            .map_err(|e| CoreError::Cache(format!("serialize cache document: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Store `value`, logging rather than failing when the disk write does not
/// succeed. A lost cache write never fails the request that produced it.
pub(crate) fn store_best_effort<T: Serialize>(
    cache: &DurableCache,
    key: &str,
    value: &T,
    ttl: Duration,
) {
    if let Err(e) = cache.set(key, value, ttl) {
        warn!(key, error = %e, "failed to persist cache entry");
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
