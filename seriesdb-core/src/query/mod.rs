//! Query result shapes
//!
//! The query layer consumes store data in two shapes:
//!
//! - [`Matrix`]: a metric and its values over a time range
//! - [`Vector`]: a metric and a single instant value
//!
//! [`range`] and [`instant`] build them from any [`SeriesStore`].

use crate::metric::Metric;
use crate::series::{Aggregates, DefaultSeries, Series};
use crate::store::SeriesStore;
use crate::{Result, TimeRange, Value};
use serde::{Deserialize, Serialize};

// ============================================================================
// Matrix
// ============================================================================

/// Values of one metric over a time range, ordered by timestamp
#[derive(Debug, Clone, Serialize)]
pub struct Matrix {
    metric: Metric,
    values: Vec<Value>,
    #[serde(skip)]
    aggregates: Aggregates,
}

impl Matrix {
    /// A matrix with no values
    pub fn empty(metric: Metric) -> Self {
        Self::new(metric, Vec::new())
    }

    pub fn new(metric: Metric, mut values: Vec<Value>) -> Self {
        values.sort_by_key(|v| v.timestamp);
        let aggregates = Aggregates::compute(values.iter().copied());
        Self {
            metric,
            values,
            aggregates,
        }
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first(&self) -> Option<Value> {
        self.values.first().copied()
    }

    pub fn last(&self) -> Option<Value> {
        self.values.last().copied()
    }

    pub fn average(&self) -> Option<f64> {
        self.aggregates.average()
    }

    pub fn minimum(&self) -> Option<f64> {
        self.aggregates.minimum
    }

    pub fn maximum(&self) -> Option<f64> {
        self.aggregates.maximum
    }

    /// Sum of all values, `0.0` when empty
    pub fn sum(&self) -> f64 {
        self.aggregates.sum
    }

    /// Copy the values into a series named after the metric's display name
    pub fn to_series(&self) -> DefaultSeries {
        DefaultSeries::from_values(self.metric.display_name(), self.values.iter().copied())
    }
}

// ============================================================================
// Vector
// ============================================================================

/// A single value of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    metric: Metric,
    value: Value,
}

impl Vector {
    pub fn new(metric: Metric, value: Value) -> Self {
        Self { metric, value }
    }

    /// A vector holding zero, stamped now
    pub fn empty(metric: Metric) -> Self {
        Self::new(metric, Value::zero())
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn value(&self) -> Value {
        self.value
    }
}

/// Values of `metric` inside `range`
pub fn range(store: &dyn SeriesStore, metric: &Metric, range: TimeRange) -> Result<Matrix> {
    let series = store.get_range(metric, range)?;
    Ok(Matrix::new(metric.clone(), series.values()))
}

/// Most recent value of `metric`, or an empty vector when there is none
pub fn instant(store: &dyn SeriesStore, metric: &Metric) -> Result<Vector> {
    let vector = match store.get(metric)?.last() {
        Some(value) => Vector::new(metric.clone(), value),
        None => Vector::empty(metric.clone()),
    };
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SeriesMemoryStore;
    use crate::{now_millis, Timestamp};

    const START: Timestamp = 1_700_000_000_000;

    fn store_with(metric: &Metric, values: &[f32]) -> SeriesMemoryStore {
        let store = SeriesMemoryStore::new();
        for (i, value) in values.iter().enumerate() {
            store.add(metric, Value::new(START + i as i64 * 1_000, *value)).unwrap();
        }
        store
    }

    #[test]
    fn test_matrix_aggregates() {
        let metric = Metric::create("latency").unwrap();
        let matrix = Matrix::new(
            metric,
            vec![Value::new(3, 6.0), Value::new(1, 2.0), Value::new(2, 4.0)],
        );

        assert_eq!(matrix.count(), 3);
        assert_eq!(matrix.first(), Some(Value::new(1, 2.0)));
        assert_eq!(matrix.last(), Some(Value::new(3, 6.0)));
        assert_eq!(matrix.average(), Some(4.0));
        assert_eq!(matrix.minimum(), Some(2.0));
        assert_eq!(matrix.maximum(), Some(6.0));
        assert_eq!(matrix.sum(), 12.0);
    }

    #[test]
    fn test_empty_matrix() {
        let matrix = Matrix::empty(Metric::create("idle").unwrap());
        assert!(matrix.is_empty());
        assert_eq!(matrix.average(), None);
        assert_eq!(matrix.sum(), 0.0);
        assert!(matrix.to_series().is_empty());
    }

    #[test]
    fn test_matrix_to_series() {
        let metric = Metric::create("disk.reads").unwrap();
        let matrix = Matrix::new(metric, vec![Value::new(1, 1.0), Value::new(2, 3.0)]);
        let series = matrix.to_series();
        assert_eq!(series.name(), "Disk Reads");
        assert_eq!(series.values(), matrix.values());
    }

    #[test]
    fn test_range() {
        let metric = Metric::create("cpu").unwrap();
        let store = store_with(&metric, &[1.0, 2.0, 3.0, 4.0, 5.0]);

        let matrix = range(&store, &metric, TimeRange::between(START + 1_000, START + 3_000)).unwrap();
        assert_eq!(matrix.metric(), &metric);
        assert_eq!(matrix.count(), 3);
        assert_eq!(matrix.average(), Some(3.0));
    }

    #[test]
    fn test_instant() {
        let metric = Metric::create("cpu").unwrap();
        let store = store_with(&metric, &[1.0, 2.0, 7.5]);

        let vector = instant(&store, &metric).unwrap();
        assert_eq!(vector.value(), Value::new(START + 2_000, 7.5));
    }

    #[test]
    fn test_instant_without_data() {
        let metric = Metric::create("missing").unwrap();
        let store = SeriesMemoryStore::new();
        let before = now_millis();

        let vector = instant(&store, &metric).unwrap();
        assert_eq!(vector.value().value, 0.0);
        assert!(vector.value().timestamp >= before);
        assert_eq!(vector.metric().name(), "missing");
    }
}
