//! SeriesDB Core - Embedded Time-Series Storage Engine
//!
//! An in-process engine for metric samples:
//! - Concurrent ingestion from many threads
//! - Counter readings adapted to per-interval deltas
//! - Compact fixed-width binary form for archival and transport
//! - Rollups built by merging time-bounded stores
//!
//! # Architecture
//!
//! - **Metric**: name plus labels, identified by a stable hash and interned
//!   through a bounded cache
//! - **Series**: ordered values with cached aggregates, either mutable
//!   ([`DefaultSeries`]) or immutable and compact ([`CompactSeries`])
//! - **Store**: maps metrics to series, in memory or in a SQLite file with
//!   one table per metric
//! - **Query**: [`Matrix`] and [`Vector`] result shapes built from a store

pub mod metric;
pub mod query;
pub mod series;
pub mod store;

mod error;
mod types;

pub use error::{Result, SeriesError};
pub use metric::{Metric, MetricCache, MetricType};
pub use query::{Matrix, Vector};
pub use series::{CompactSeries, DefaultSeries, Series};
pub use store::{
    open_store, SeriesMemoryStore, SeriesStore, SqlSeriesStore, SqlStoreConfig, StoreConfig,
    StoreKind,
};
pub use types::*;

/// SeriesDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    use std::time::Duration;

    /// Metrics held by the global cache before it resets
    pub const METRIC_CACHE_CAPACITY: usize = 10_000;

    /// Retention declared on new series and stores (15 minutes)
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(15 * 60);

    /// Name of the SQL store database
    pub const DEFAULT_STORE_NAME: &str = "metrics";

    /// Extension of SQL store database files
    pub const FILE_EXTENSION: &str = ".db";

    /// How long SQL calls wait on a locked database
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
}
