//! Mutable, lock-guarded series

use super::{next_series_id, Aggregates, CompactSeries, Series};
use crate::{Result, TimeRange, Timestamp, Value};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::time::Duration;

/// A series holding its values in a growable vector.
///
/// Reads take the read lock, [`DefaultSeries::add`] takes the write lock and
/// mutates in place. Aggregates are memoized on first read and dropped on
/// every mutation.
#[derive(Debug)]
pub struct DefaultSeries {
    id: String,
    name: String,
    retention: RwLock<Duration>,
    values: RwLock<Vec<Value>>,
    // Always locked after `values`, never before.
    aggregates: Mutex<Option<Aggregates>>,
}

impl DefaultSeries {
    /// Create an empty series
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_sorted(name.into(), Vec::new())
    }

    /// Create a series from values in any order
    pub fn from_values(name: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        let mut values: Vec<Value> = values.into_iter().collect();
        values.sort_by_key(|v| v.timestamp);
        Self::from_sorted(name.into(), values)
    }

    fn from_sorted(name: String, values: Vec<Value>) -> Self {
        Self {
            id: next_series_id(),
            name,
            retention: RwLock::new(crate::config::DEFAULT_RETENTION),
            values: RwLock::new(values),
            aggregates: Mutex::new(None),
        }
    }

    /// Create a series of `count` random values in `[min, max)`, `interval` apart
    pub fn random(
        name: impl Into<String>,
        start: Timestamp,
        interval: Duration,
        count: usize,
        min: f32,
        max: f32,
    ) -> Self {
        let mut rng = rand::thread_rng();
        let step = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
        let values = (0..count).map(|i| {
            let value = if max > min { rng.gen_range(min..max) } else { min };
            Value::new(start.saturating_add(step.saturating_mul(i as i64)), value)
        });
        Self::from_sorted(name.into(), values.collect())
    }

    /// Builder-style retention
    pub fn with_retention(self, retention: Duration) -> Self {
        *self.retention.write() = retention;
        self
    }

    pub fn set_retention(&self, retention: Duration) -> &Self {
        *self.retention.write() = retention;
        self
    }

    /// Append a value in place and return this same series.
    ///
    /// Out-of-order values are inserted after any value with an equal or
    /// smaller timestamp, so the series stays sorted.
    pub fn add(&self, value: Value) -> &Self {
        let mut values = self.values.write();
        insert_sorted(&mut values, value);
        *self.aggregates.lock() = None;
        self
    }

    /// Append every value of `other`
    pub fn add_series(&self, other: &dyn Series) -> &Self {
        let incoming = other.values();
        if incoming.is_empty() {
            return self;
        }
        let mut values = self.values.write();
        values.reserve(incoming.len());
        for value in incoming {
            insert_sorted(&mut values, value);
        }
        *self.aggregates.lock() = None;
        self
    }

    /// Append one value holding the average of `other`, stamped at its first
    /// timestamp. Does nothing when `other` is empty.
    pub fn add_average(&self, other: &dyn Series) -> &Self {
        if let (Some(average), Some(first)) = (other.average(), other.first()) {
            self.add(Value::new(first.timestamp, average as f32));
        }
        self
    }

    /// New series holding only the values inside `range`
    pub fn filter(&self, range: TimeRange) -> DefaultSeries {
        let values = self.values.read();
        let filtered = values
            .iter()
            .filter(|v| range.contains(v.timestamp))
            .copied()
            .collect();
        Self::from_sorted(self.name.clone(), filtered).with_retention(self.retention())
    }

    /// Memoized aggregates over the current values
    pub fn aggregates(&self) -> Aggregates {
        let values = self.values.read();
        let mut cached = self.aggregates.lock();
        *cached.get_or_insert_with(|| Aggregates::compute(values.iter().copied()))
    }
}

fn insert_sorted(values: &mut Vec<Value>, value: Value) {
    match values.last() {
        Some(last) if last.timestamp > value.timestamp => {
            let position = values.partition_point(|v| v.timestamp <= value.timestamp);
            values.insert(position, value);
        }
        _ => values.push(value),
    }
}

impl Series for DefaultSeries {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn retention(&self) -> Duration {
        *self.retention.read()
    }

    fn values(&self) -> Vec<Value> {
        self.values.read().clone()
    }

    fn get(&self, index: usize) -> Option<Value> {
        self.values.read().get(index).copied()
    }

    fn count(&self) -> usize {
        self.values.read().len()
    }

    fn first(&self) -> Option<Value> {
        self.values.read().first().copied()
    }

    fn last(&self) -> Option<Value> {
        self.values.read().last().copied()
    }

    fn average(&self) -> Option<f64> {
        self.aggregates().average()
    }

    fn minimum(&self) -> Option<f64> {
        self.aggregates().minimum
    }

    fn maximum(&self) -> Option<f64> {
        self.aggregates().maximum
    }

    fn weight(&self) -> f64 {
        self.aggregates().weight()
    }

    fn compact(&self) -> Result<CompactSeries> {
        let values = self.values.read();
        Ok(CompactSeries::from_values(self.name.clone(), &values)?.with_retention(self.retention()))
    }
}
