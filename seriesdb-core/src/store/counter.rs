//! Counter to delta adaptation

use crate::metric::{Metric, MetricType};
use crate::Value;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

/// Converts raw counter readings into per-interval deltas.
///
/// The last raw reading of every counter metric is kept, keyed by metric
/// identity. The first reading only sets the baseline and a reading below the
/// baseline (a counter reset) emits nothing but becomes the new baseline.
/// Gauges pass through unchanged.
///
/// Stores whose writes can fail stage readings in [`StagedBaselines`] and
/// commit them once the write is durable.
#[derive(Debug, Default)]
pub struct CounterAdapter {
    last: DashMap<String, f32>,
}

/// Baselines moved by writes which have not completed yet
#[derive(Debug, Default)]
pub struct StagedBaselines {
    pending: HashMap<String, f32>,
}

impl StagedBaselines {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl CounterAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapt a raw sample and move the baseline at once, `None` when nothing
    /// should be stored
    pub fn adapt(&self, metric: &Metric, value: Value) -> Option<Value> {
        if metric.kind() != MetricType::Counter {
            return Some(value);
        }
        match self.last.entry(metric.identity().to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(value.value);
                None
            }
            Entry::Occupied(mut entry) => {
                let previous = entry.insert(value.value);
                delta(metric, previous, value)
            }
        }
    }

    /// Adapt a raw sample against committed and staged baselines, recording
    /// the new baseline in `staged` only
    pub fn stage(&self, metric: &Metric, value: Value, staged: &mut StagedBaselines) -> Option<Value> {
        if metric.kind() != MetricType::Counter {
            return Some(value);
        }
        let key = metric.identity();
        let previous = match staged.pending.get(key) {
            Some(previous) => Some(*previous),
            None => self.baseline(metric),
        };
        staged.pending.insert(key.to_string(), value.value);
        previous.and_then(|previous| delta(metric, previous, value))
    }

    /// Make staged baselines current
    pub fn commit(&self, staged: StagedBaselines) {
        for (key, raw) in staged.pending {
            self.last.insert(key, raw);
        }
    }

    /// Last raw reading of a counter
    pub fn baseline(&self, metric: &Metric) -> Option<f32> {
        self.last.get(metric.identity()).map(|entry| *entry.value())
    }
}

fn delta(metric: &Metric, previous: f32, value: Value) -> Option<Value> {
    let delta = value.value - previous;
    if delta >= 0.0 {
        Some(Value::new(value.timestamp, delta))
    } else {
        debug!(
            "Counter '{}' reset from {} to {}",
            metric.name(),
            previous,
            value.value
        );
        None
    }
}
