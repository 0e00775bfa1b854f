//! Series of values
//!
//! Two representations share the [`Series`] capability:
//!
//! - [`DefaultSeries`]: mutable, lock-guarded, used for ingestion
//! - [`CompactSeries`]: immutable fixed-width binary form with O(1) random
//!   access, used for archival and transport
//!
//! Values are always ordered by timestamp, ascending.

mod compact;
mod default;

pub use compact::CompactSeries;
pub use default::DefaultSeries;

use crate::{Result, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_SERIES_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_series_id() -> String {
    format!("series_{}", NEXT_SERIES_ID.fetch_add(1, Ordering::Relaxed))
}

/// Read access shared by every series representation
pub trait Series: Send + Sync {
    /// Process-unique identifier
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Declared retention; informational, nothing evicts on it
    fn retention(&self) -> Duration;

    /// Snapshot of all values in timestamp order
    fn values(&self) -> Vec<Value>;

    /// Value at `index`, `None` when out of bounds
    fn get(&self, index: usize) -> Option<Value>;

    fn count(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn first(&self) -> Option<Value> {
        self.get(0)
    }

    /// Most recent value
    fn last(&self) -> Option<Value> {
        self.count().checked_sub(1).and_then(|index| self.get(index))
    }

    fn average(&self) -> Option<f64>;

    fn minimum(&self) -> Option<f64>;

    fn maximum(&self) -> Option<f64>;

    /// Maximum value per sample, used to rank series by information density.
    ///
    /// An empty series weighs `0.0`.
    fn weight(&self) -> f64;

    /// Convert to the compact binary form
    fn compact(&self) -> Result<CompactSeries>;
}

/// Aggregates computed in one pass over a series
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aggregates {
    pub count: usize,
    pub sum: f64,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl Aggregates {
    /// Compute aggregates over a sequence of values
    pub fn compute(values: impl IntoIterator<Item = Value>) -> Self {
        let mut aggregates = Self::default();
        for value in values {
            aggregates.add(value.as_f64());
        }
        aggregates
    }

    /// Accumulate one value
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.minimum = Some(self.minimum.map_or(value, |current| current.min(value)));
        self.maximum = Some(self.maximum.map_or(value, |current| current.max(value)));
    }

    pub fn average(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.sum / self.count as f64)
        } else {
            None
        }
    }

    /// `maximum / count`, zero for an empty series
    pub fn weight(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.maximum.unwrap_or(0.0) / self.count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregates() {
        let values = [1.0, 2.0, 5.0, 10.0]
            .iter()
            .enumerate()
            .map(|(i, v)| Value::new(i as i64, *v));
        let aggregates = Aggregates::compute(values);

        assert_eq!(aggregates.count, 4);
        assert_eq!(aggregates.minimum, Some(1.0));
        assert_eq!(aggregates.maximum, Some(10.0));
        assert_eq!(aggregates.average(), Some(4.5));
        assert_eq!(aggregates.weight(), 2.5);
    }

    #[test]
    fn test_empty_aggregates() {
        let aggregates = Aggregates::compute(Vec::new());
        assert_eq!(aggregates.average(), None);
        assert_eq!(aggregates.minimum, None);
        assert_eq!(aggregates.weight(), 0.0);
    }

    #[test]
    fn test_series_ids_are_unique() {
        assert_ne!(next_series_id(), next_series_id());
    }
}
