//! Indexer type registry and instance cache.

use crate::core::registry_metrics::RegistryMetrics;
use crate::indexers::{NftBidIndexer, NftPriceIndexer, TokenBorrowIndexer, TokenPriceIndexer};
use crate::types::models::{IndexerRecord, IndexerType};
use crate::types::traits::Indexer;
use crate::utils::error::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Builds the variant for `indexer_type`, validating `params`.
///
/// # Errors
///
/// Returns `ValidationError` when `params` do not fit the variant.
pub fn build_indexer(
    id: &str,
    indexer_type: IndexerType,
    params: &Value,
) -> Result<Arc<dyn Indexer>> {
    let indexer: Arc<dyn Indexer> = match indexer_type {
        IndexerType::NftBid => Arc::new(NftBidIndexer::from_params(id, params)?),
        IndexerType::NftPrice => Arc::new(NftPriceIndexer::from_params(id, params)?),
        IndexerType::TokenBorrow => Arc::new(TokenBorrowIndexer::from_params(id, params)?),
        IndexerType::TokenPrice => Arc::new(TokenPriceIndexer::from_params(id, params)?),
    };
    Ok(indexer)
}

/// Caches one instance per indexer id.
pub struct IndexerRegistry {
    instances: DashMap<String, Arc<dyn Indexer>>,
    metrics: RegistryMetrics,
}

impl IndexerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            metrics: RegistryMetrics::new("indexers"),
        }
    }

    /// Returns the cached instance for `record`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when the stored params no longer validate.
    pub fn get_or_create(&self, record: &IndexerRecord) -> Result<Arc<dyn Indexer>> {
        self.metrics.inc_lookups();
        if let Some(existing) = self.instances.get(&record.id) {
            self.metrics.inc_hits();
            return Ok(Arc::clone(existing.value()));
        }

        let built = build_indexer(&record.id, record.indexer_type, &record.params)?;
        self.metrics.inc_builds();
        let instance = Arc::clone(
            self.instances
                .entry(record.id.clone())
                .or_insert(built)
                .value(),
        );
        self.metrics.set_cached(self.instances.len());
        tracing::debug!(indexer_id = %record.id, indexer_type = %record.indexer_type, "Built indexer instance");
        Ok(instance)
    }

    /// Drops the cached instance for `indexer_id`.
    pub fn evict(&self, indexer_id: &str) -> bool {
        let removed = self.instances.remove(indexer_id).is_some();
        self.metrics.set_cached(self.instances.len());
        removed
    }

    #[must_use]
    pub fn contains(&self, indexer_id: &str) -> bool {
        self.instances.contains_key(indexer_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    #[must_use]
    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }
}

impl Default for IndexerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
