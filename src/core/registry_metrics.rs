//! Counters for the indexer instance cache.
//!
//! [`RegistryMetrics`] tracks how many indexer instances are cached, how many
//! lookups the dispatcher made and how many of them were served from cache.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Lock-free usage counters for a registry.
#[derive(Debug)]
pub struct RegistryMetrics {
    /// Instances currently cached.
    pub cached_count: AtomicUsize,
    /// Total lookups.
    pub lookups: AtomicU64,
    /// Lookups answered from cache.
    pub hits: AtomicU64,
    /// Instances built because the cache missed.
    pub builds: AtomicU64,
    /// Name used in log lines.
    pub name: &'static str,
}

impl RegistryMetrics {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            cached_count: AtomicUsize::new(0),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            name,
        }
    }

    pub fn inc_lookups(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hits(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_builds(&self) {
        self.builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_cached(&self, count: usize) {
        self.cached_count.store(count, Ordering::Relaxed);
    }

    /// Fraction of lookups served from cache, `0.0` before the first lookup.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.lookups.load(Ordering::Relaxed);
        if lookups == 0 {
            return 0.0;
        }
        self.hits.load(Ordering::Relaxed) as f64 / lookups as f64
    }

    /// Writes the counters to the log.
    pub fn report(&self) {
        let cached = self.cached_count.load(Ordering::Relaxed);
        let lookups = self.lookups.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let builds = self.builds.load(Ordering::Relaxed);

        crate::utils::logging::log(
            crate::utils::logging::LogLevel::Info,
            &format!(
                "Registry [{}] Stats: {} cached | Lookups: {} | Hits: {} | Builds: {}",
                self.name, cached, lookups, hits, builds
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let metrics = RegistryMetrics::new("test");
        assert_eq!(metrics.hit_ratio(), 0.0);
        metrics.inc_lookups();
        metrics.inc_lookups();
        metrics.inc_hits();
        assert!((metrics.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
