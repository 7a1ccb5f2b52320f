//! All wallet components wired to one transport and one cache.

use std::sync::Arc;

use crate::broadcast::{BroadcastConfig, Broadcaster};
use crate::builder::{BuilderConfig, TransactionBuilder};
use crate::cache::DurableCache;
use crate::fees::FeeEstimator;
use crate::reader::{ChainReader, ReaderConfig};
use crate::sources::SourceCatalog;
use crate::status::{StatusTracker, TrackerConfig};
use crate::transport::HttpTransport;

#[derive(Debug, Clone, Default)]
pub struct WalletConfig {
    pub reader: ReaderConfig,
    pub tracker: TrackerConfig,
    pub builder: BuilderConfig,
    pub broadcast: BroadcastConfig,
}

pub struct Wallet {
    pub reader: ChainReader,
    pub builder: TransactionBuilder,
    pub broadcaster: Broadcaster,
    pub tracker: StatusTracker,
    pub fees: FeeEstimator,
    cache: Arc<DurableCache>,
}

impl Wallet {
    pub fn new(transport: Arc<dyn HttpTransport>, cache: Arc<DurableCache>, config: WalletConfig) -> Self {
        Self::with_catalog(transport, cache, Arc::new(SourceCatalog::public()), config)
    }

    pub fn with_catalog(
        transport: Arc<dyn HttpTransport>,
        cache: Arc<DurableCache>,
        catalog: Arc<SourceCatalog>,
        config: WalletConfig,
    ) -> Self {
        Self {
            reader: ChainReader::new(transport.clone(), cache.clone(), catalog.clone(), config.reader),
            builder: TransactionBuilder::new(config.builder),
            broadcaster: Broadcaster::new(transport.clone(), config.broadcast),
            tracker: StatusTracker::new(transport.clone(), cache.clone(), catalog, config.tracker),
            fees: FeeEstimator::new(transport, cache.clone()),
            cache,
        }
    }

    pub fn cache(&self) -> &DurableCache {
        &self.cache
    }
}
