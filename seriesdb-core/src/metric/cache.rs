//! Bounded metric cache
//!
//! Maps a metric hash to a shared [`Metric`]. When the number of entries
//! exceeds the capacity the whole cache is reset rather than evicting single
//! entries (no LRU bookkeeping on the hot path). Callers may rely on pointer
//! identity between two `get` calls only while the cache stays under its
//! bound; equality by hash always holds.

use super::{compute_hash, slug, Metric};
use crate::Result;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::warn;

static GLOBAL: OnceLock<MetricCache> = OnceLock::new();

/// Cache of metrics keyed by hash
pub struct MetricCache {
    entries: DashMap<String, Arc<Metric>>,
    capacity: usize,
}

impl MetricCache {
    /// Create a cache holding at most `capacity` metrics before it resets
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    /// The process-wide cache used by [`Metric::get`]
    pub fn global() -> &'static MetricCache {
        GLOBAL.get_or_init(|| MetricCache::new(crate::config::METRIC_CACHE_CAPACITY))
    }

    /// Install the process-wide cache with a custom capacity.
    ///
    /// Returns `false` if the global cache was already initialized.
    pub fn init_global(capacity: usize) -> bool {
        GLOBAL.set(MetricCache::new(capacity)).is_ok()
    }

    /// Get the cached metric for `name` and `labels`, creating it on a miss
    pub fn get(&self, name: &str, labels: BTreeMap<String, String>) -> Result<Arc<Metric>> {
        if name.trim().is_empty() {
            return Err(crate::SeriesError::invalid("metric name cannot be blank"));
        }
        let hash = compute_hash(&slug(name), &labels);
        if let Some(metric) = self.entries.get(&hash) {
            return Ok(Arc::clone(metric.value()));
        }

        // Concurrent resets may race; the worst case is a duplicate allocation.
        if self.entries.len() >= self.capacity {
            warn!("Metric cache reached {} entries, resetting", self.capacity);
            self.entries.clear();
        }

        let metric = Arc::new(Metric::build(name, labels)?);
        let entry = self.entries.entry(hash).or_insert(metric);
        Ok(Arc::clone(entry.value()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
