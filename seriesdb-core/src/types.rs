//! Core types for SeriesDB

use crate::metric::Metric;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// A numeric sample at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Value {
    /// Timestamp in milliseconds
    pub timestamp: Timestamp,
    /// Sample value
    pub value: f32,
}

impl Value {
    /// Create a new value
    pub fn new(timestamp: Timestamp, value: f32) -> Self {
        Self { timestamp, value }
    }

    /// Create a value stamped with the current time
    pub fn now(value: f32) -> Self {
        Self::new(now_millis(), value)
    }

    /// A zero value stamped with the current time
    pub fn zero() -> Self {
        Self::now(0.0)
    }

    /// Returns a new value with `delta` added, keeping the timestamp
    pub fn add(&self, delta: f32) -> Self {
        Self::new(self.timestamp, self.value + delta)
    }

    /// Check if the timestamp falls within optional inclusive bounds
    pub fn is_within(&self, from: Option<Timestamp>, to: Option<Timestamp>) -> bool {
        TimeRange::new(from, to).contains(self.timestamp)
    }

    pub fn as_f64(&self) -> f64 {
        self.value as f64
    }

    pub fn as_i64(&self) -> i64 {
        self.value as i64
    }

    /// Timestamp as a UTC date/time
    pub fn at_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Timestamp as a local date/time
    pub fn at_local(&self) -> DateTime<Local> {
        self.at_utc().with_timezone(&Local)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.at_utc().to_rfc3339(), self.value)
    }
}

/// Time range for queries, both bounds inclusive; `None` is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Option<Timestamp>,
    /// End timestamp (inclusive)
    pub end: Option<Timestamp>,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        Self { start, end }
    }

    /// A closed range
    pub fn between(start: Timestamp, end: Timestamp) -> Self {
        Self::new(Some(start), Some(end))
    }

    /// A range with no bounds
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// The last `duration` up to now
    pub fn last(duration: Duration) -> Self {
        let now = now_millis();
        let span = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self::between(now.saturating_sub(span), now)
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start.map_or(true, |start| ts >= start) && self.end.map_or(true, |end| ts <= end)
    }

    /// Lower bound with unbounded mapped to the smallest timestamp
    pub fn start_or_min(&self) -> Timestamp {
        self.start.unwrap_or(Timestamp::MIN)
    }

    /// Upper bound with unbounded mapped to the largest timestamp
    pub fn end_or_max(&self) -> Timestamp {
        self.end.unwrap_or(Timestamp::MAX)
    }
}

/// Metric values collected at the same time and ingested together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    timestamp: Timestamp,
    entries: Vec<(Metric, Value)>,
}

impl Batch {
    /// Create an empty batch stamped at `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            entries: Vec::new(),
        }
    }

    /// Create an empty batch stamped with the current time
    pub fn now() -> Self {
        Self::new(now_millis())
    }

    /// Add a metric value at the batch timestamp
    pub fn add(&mut self, metric: &Metric, value: f32) -> &mut Self {
        self.entries.push((metric.clone(), Value::new(self.timestamp, value)));
        self
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Iterate over entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&Metric, Value)> {
        self.entries.iter().map(|(metric, value)| (metric, *value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_add_keeps_timestamp() {
        let value = Value::new(1_000, 1.5);
        let sum = value.add(2.0);
        assert_eq!(sum.timestamp, 1_000);
        assert_eq!(sum.value, 3.5);
        assert_eq!(value.value, 1.5);
    }

    #[test]
    fn test_value_time_reference() {
        let millis = now_millis();
        let value = Value::new(millis, 1.0);
        assert_eq!(value.at_utc().timestamp_millis(), millis);
        assert_eq!(value.at_local().timestamp_millis(), millis);
        assert!(value.is_within(Some(millis - 1_000), Some(millis + 1_000)));
        assert!(value.is_within(None, None));
        assert!(!value.is_within(Some(millis + 1), None));
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::between(100, 200);
        assert!(range.contains(100));
        assert!(range.contains(200));
        assert!(!range.contains(201));

        let open = TimeRange::new(Some(150), None);
        assert!(open.contains(i64::MAX));
        assert_eq!(open.end_or_max(), i64::MAX);
        assert_eq!(TimeRange::unbounded().start_or_min(), i64::MIN);
    }

    #[test]
    fn test_batch() {
        let cpu = Metric::create("cpu").unwrap();
        let mem = Metric::create("memory").unwrap();
        let mut batch = Batch::new(5_000);
        batch.add(&cpu, 1.0).add(&mem, 2.0);

        assert_eq!(batch.len(), 2);
        let entries: Vec<_> = batch.iter().collect();
        assert_eq!(entries[0].0, &cpu);
        assert_eq!(entries[1].1, Value::new(5_000, 2.0));
    }
}
