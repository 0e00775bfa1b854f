//! In-memory series store

use super::{min_option, CounterAdapter, SeriesStore};
use crate::metric::Metric;
use crate::series::{DefaultSeries, Series};
use crate::{Batch, Result, TimeRange, Timestamp, Value};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// A store which holds all series in memory
pub struct SeriesMemoryStore {
    series: DashMap<Metric, Arc<DefaultSeries>>,
    retention: RwLock<Duration>,
    counters: CounterAdapter,
}

impl SeriesMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
            retention: RwLock::new(crate::config::DEFAULT_RETENTION),
            counters: CounterAdapter::new(),
        }
    }

    /// Number of metrics with a series
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    fn get_or_create(&self, metric: &Metric) -> Arc<DefaultSeries> {
        if let Some(series) = self.series.get(metric) {
            return Arc::clone(series.value());
        }
        // The entry holds the shard lock, so only one series is ever created
        // per metric even when first writes race.
        let entry = self.series.entry(metric.clone()).or_insert_with(|| {
            Arc::new(DefaultSeries::new(metric.name()).with_retention(self.retention()))
        });
        Arc::clone(entry.value())
    }
}

impl Default for SeriesMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SeriesStore for SeriesMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn retention(&self) -> Duration {
        *self.retention.read()
    }

    fn set_retention(&self, retention: Duration) {
        *self.retention.write() = retention;
    }

    fn metrics(&self) -> Result<Vec<Metric>> {
        let mut metrics: Vec<Metric> = self.series.iter().map(|entry| entry.key().clone()).collect();
        metrics.sort();
        Ok(metrics)
    }

    fn earliest_timestamp(&self) -> Result<Option<Timestamp>> {
        Ok(self
            .series
            .iter()
            .fold(None, |earliest, entry| {
                min_option(earliest, entry.value().first().map(|v| v.timestamp))
            }))
    }

    fn earliest_timestamp_of(&self, metric: &Metric) -> Result<Option<Timestamp>> {
        Ok(self
            .series
            .get(metric)
            .and_then(|series| series.first())
            .map(|v| v.timestamp))
    }

    fn latest_timestamp(&self) -> Result<Option<Timestamp>> {
        Ok(self
            .series
            .iter()
            .filter_map(|entry| entry.value().last().map(|v| v.timestamp))
            .max())
    }

    fn latest_timestamp_of(&self, metric: &Metric) -> Result<Option<Timestamp>> {
        Ok(self
            .series
            .get(metric)
            .and_then(|series| series.last())
            .map(|v| v.timestamp))
    }

    fn get(&self, metric: &Metric) -> Result<Arc<DefaultSeries>> {
        Ok(self.get_or_create(metric))
    }

    fn get_range(&self, metric: &Metric, range: TimeRange) -> Result<DefaultSeries> {
        Ok(self.get_or_create(metric).filter(range))
    }

    fn average_range(&self, metric: &Metric, range: TimeRange) -> Result<Option<f64>> {
        Ok(self.get_range(metric, range)?.average())
    }

    fn add(&self, metric: &Metric, value: Value) -> Result<()> {
        let series = self.get_or_create(metric);
        if let Some(value) = self.counters.adapt(metric, value) {
            series.add(value);
        }
        Ok(())
    }

    fn add_batch(&self, batch: &Batch) -> Result<()> {
        for (metric, value) in batch.iter() {
            self.add(metric, value)?;
        }
        Ok(())
    }

    fn append(&self, metric: &Metric, values: &[Value]) -> Result<()> {
        let series = self.get_or_create(metric);
        for value in values {
            series.add(*value);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.series.clear();
        Ok(())
    }
}
