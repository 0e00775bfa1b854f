//! Series stores
//!
//! A [`SeriesStore`] maps metrics to series. Two backends exist:
//!
//! - [`SeriesMemoryStore`]: concurrent in-memory map
//! - [`SqlSeriesStore`]: SQLite file, one table per metric
//!
//! Both adapt counter metrics to per-interval deltas before storing them
//! (see [`CounterAdapter`]) and both can absorb other stores through the
//! merge algorithm in [`merge`].

mod counter;
mod memory;
pub mod merge;
mod sql;

pub use counter::{CounterAdapter, StagedBaselines};
pub use memory::SeriesMemoryStore;
pub use sql::SqlSeriesStore;

use crate::metric::{Metric, MetricCache};
use crate::series::DefaultSeries;
use crate::{Batch, Result, SeriesError, TimeRange, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Storage for the series of many metrics.
///
/// Every operation may be called concurrently from several threads.
pub trait SeriesStore: Send + Sync {
    /// Store name, used in error context
    fn name(&self) -> &str;

    /// Declared retention; nothing is evicted based on it
    fn retention(&self) -> Duration;

    fn set_retention(&self, retention: Duration);

    /// Metrics with a series in this store
    fn metrics(&self) -> Result<Vec<Metric>>;

    /// Earliest timestamp across all metrics
    fn earliest_timestamp(&self) -> Result<Option<Timestamp>> {
        let mut earliest = None;
        for metric in self.metrics()? {
            earliest = min_option(earliest, self.earliest_timestamp_of(&metric)?);
        }
        Ok(earliest)
    }

    fn earliest_timestamp_of(&self, metric: &Metric) -> Result<Option<Timestamp>>;

    /// Latest timestamp across all metrics
    fn latest_timestamp(&self) -> Result<Option<Timestamp>> {
        let mut latest = None;
        for metric in self.metrics()? {
            latest = latest.max(self.latest_timestamp_of(&metric)?);
        }
        Ok(latest)
    }

    fn latest_timestamp_of(&self, metric: &Metric) -> Result<Option<Timestamp>>;

    /// The series of a metric, empty if nothing was stored yet
    fn get(&self, metric: &Metric) -> Result<Arc<DefaultSeries>>;

    /// A new series with the values inside `range` (bounds inclusive)
    fn get_range(&self, metric: &Metric, range: TimeRange) -> Result<DefaultSeries>;

    /// Average of the values inside `range`
    fn average_range(&self, metric: &Metric, range: TimeRange) -> Result<Option<f64>>;

    /// Average over the last `interval` up to now
    fn average_over(&self, metric: &Metric, interval: Duration) -> Result<Option<f64>> {
        self.average_range(metric, TimeRange::last(interval))
    }

    /// Average over the whole series
    fn average(&self, metric: &Metric) -> Result<Option<f64>> {
        self.average_range(metric, TimeRange::unbounded())
    }

    /// Record a raw sample; counter metrics are adapted to deltas first
    fn add(&self, metric: &Metric, value: Value) -> Result<()>;

    /// Record every sample of a batch
    fn add_batch(&self, batch: &Batch) -> Result<()>;

    /// Store values as-is, bypassing counter adaptation
    fn append(&self, metric: &Metric, values: &[Value]) -> Result<()>;

    /// Drop all stored values
    fn clear(&self) -> Result<()>;

    /// Copy every series of `other` into this store
    fn add_store(&self, other: &dyn SeriesStore) -> Result<()> {
        merge::merge_into(self, &[other], false)
    }

    /// Merge several stores into this one, see [`merge::merge_into`]
    fn merge(&self, stores: &[&dyn SeriesStore], average: bool) -> Result<()> {
        merge::merge_into(self, stores, average)
    }
}

pub(crate) fn min_option(a: Option<Timestamp>, b: Option<Timestamp>) -> Option<Timestamp> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    #[serde(alias = "sqlite")]
    Sql,
}

impl FromStr for StoreKind {
    type Err = SeriesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreKind::Memory),
            "sql" | "sqlite" | "disk" => Ok(StoreKind::Sql),
            other => Err(SeriesError::Resolution(format!(
                "no series store implementation named '{}'",
                other
            ))),
        }
    }
}

/// SQL store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlStoreConfig {
    /// Directory holding the database file
    pub data_dir: PathBuf,
    /// Database name, `.db` is appended
    pub name: String,
    /// How long a call waits on a locked database
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

impl Default for SqlStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            name: crate::config::DEFAULT_STORE_NAME.to_string(),
            busy_timeout: crate::config::DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend to open
    pub kind: StoreKind,
    /// Retention declared on the store and its series
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// SQL backend settings
    pub sql: SqlStoreConfig,
    /// Capacity of the process-wide metric cache
    pub metric_cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            retention: crate::config::DEFAULT_RETENTION,
            sql: SqlStoreConfig::default(),
            metric_cache_capacity: crate::config::METRIC_CACHE_CAPACITY,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from JSON, missing fields take defaults
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SeriesError::Config(e.to_string()))
    }
}

/// Open the store described by `config`
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn SeriesStore>> {
    if !MetricCache::init_global(config.metric_cache_capacity) {
        debug!(
            "Metric cache already initialized with capacity {}",
            MetricCache::global().capacity()
        );
    }

    let store: Arc<dyn SeriesStore> = match config.kind {
        StoreKind::Memory => Arc::new(SeriesMemoryStore::new()),
        StoreKind::Sql => {
            let store = SqlSeriesStore::new(config.sql.clone())
                .and_then(|store| store.initialize().map(|_| store))
                .map_err(|e| {
                    SeriesError::Resolution(format!(
                        "cannot open SQL store '{}' in {}: {}",
                        config.sql.name,
                        config.sql.data_dir.display(),
                        e
                    ))
                })?;
            Arc::new(store)
        }
    };
    store.set_retention(config.retention);

    info!("Opened {:?} series store '{}'", config.kind, store.name());
    Ok(store)
}
