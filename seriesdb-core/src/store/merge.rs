//! Multi-store merge
//!
//! Builds rollup views out of several time-bounded shards. Source stores are
//! visited in order of their earliest timestamp (stores without data last)
//! and, per metric, either every value or one averaged value per store is
//! appended to the target.

use super::SeriesStore;
use crate::metric::Metric;
use crate::series::Series;
use crate::{Result, Timestamp, Value};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Total order over earliest timestamps where "no data" sorts greatest
pub fn earliest_order(a: Option<Timestamp>, b: Option<Timestamp>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Merge `stores` into `target`.
///
/// The metric set is the union over all sources; a source without a metric
/// contributes nothing to it. With `average` set, each source contributes a
/// single value per metric: its average stamped at its first timestamp.
pub fn merge_into<S>(target: &S, stores: &[&dyn SeriesStore], average: bool) -> Result<()>
where
    S: SeriesStore + ?Sized,
{
    if stores.is_empty() {
        return Ok(());
    }

    let mut sources = Vec::with_capacity(stores.len());
    for store in stores {
        let metrics: HashSet<Metric> = store.metrics()?.into_iter().collect();
        sources.push((store.earliest_timestamp()?, *store, metrics));
    }
    // Stable, so stores with equal earliest timestamps keep their input order
    sources.sort_by(|a, b| earliest_order(a.0, b.0));

    let metrics: BTreeSet<Metric> = sources
        .iter()
        .flat_map(|(_, _, metrics)| metrics.iter().cloned())
        .collect();

    let mut appended = 0;
    for metric in &metrics {
        let mut values = Vec::new();
        for (_, store, store_metrics) in &sources {
            if !store_metrics.contains(metric) {
                continue;
            }
            let series = store.get(metric)?;
            if average {
                if let (Some(avg), Some(first)) = (series.average(), series.first()) {
                    values.push(Value::new(first.timestamp, avg as f32));
                }
            } else {
                values.extend(series.values());
            }
        }
        appended += values.len();
        target.append(metric, &values)?;
    }

    debug!(
        "Merged {} stores into '{}': {} metrics, {} values (average: {})",
        stores.len(),
        target.name(),
        metrics.len(),
        appended,
        average
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SeriesMemoryStore;

    const START: Timestamp = 1_700_000_000_000;
    const STORE_COUNT: i64 = 5;

    /// Store `i` holds `i` values, `1..=i`, one second apart
    fn stores(metric: &Metric) -> Vec<SeriesMemoryStore> {
        (1..=STORE_COUNT)
            .map(|i| {
                let store = SeriesMemoryStore::new();
                for j in 0..i {
                    store
                        .add(metric, Value::new(START + j * 1_000, (j + 1) as f32))
                        .unwrap();
                }
                store
            })
            .collect()
    }

    fn as_dyn(stores: &[SeriesMemoryStore]) -> Vec<&dyn SeriesStore> {
        stores.iter().map(|s| s as &dyn SeriesStore).collect()
    }

    #[test]
    fn test_earliest_order() {
        assert_eq!(earliest_order(Some(1), Some(2)), Ordering::Less);
        assert_eq!(earliest_order(Some(1), None), Ordering::Less);
        assert_eq!(earliest_order(None, Some(1)), Ordering::Greater);
        assert_eq!(earliest_order(None, None), Ordering::Equal);
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let target = SeriesMemoryStore::new();
        target.merge(&[], false).unwrap();
        assert!(target.metrics().unwrap().is_empty());
    }

    #[test]
    fn test_merge_concatenates() {
        let metric = Metric::create("g1").unwrap();
        let sources = stores(&metric);
        let target = SeriesMemoryStore::new();
        target.merge(&as_dyn(&sources), false).unwrap();

        let series = target.get(&metric).unwrap();
        assert_eq!(series.count(), 15);
        assert!((series.average().unwrap() - 2.33).abs() < 0.01);
    }

    #[test]
    fn test_merge_averages() {
        let metric = Metric::create("g1").unwrap();
        let sources = stores(&metric);
        let target = SeriesMemoryStore::new();
        target.merge(&as_dyn(&sources), true).unwrap();

        let series = target.get(&metric).unwrap();
        assert_eq!(series.count(), 5);
        assert!((series.average().unwrap() - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_merge_orders_by_earliest_timestamp() {
        let metric = Metric::create("shards").unwrap();
        let late = SeriesMemoryStore::new();
        late.add(&metric, Value::new(START + 60_000, 2.0)).unwrap();
        let early = SeriesMemoryStore::new();
        early.add(&metric, Value::new(START, 1.0)).unwrap();
        let empty = SeriesMemoryStore::new();

        let target = SeriesMemoryStore::new();
        target.merge(&[&empty, &late, &early], true).unwrap();

        let values: Vec<f32> = target.get(&metric).unwrap().values().iter().map(|v| v.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_merge_union_of_metrics() {
        let cpu = Metric::create("cpu").unwrap();
        let mem = Metric::create("mem").unwrap();
        let a = SeriesMemoryStore::new();
        a.add(&cpu, Value::new(START, 1.0)).unwrap();
        let b = SeriesMemoryStore::new();
        b.add(&mem, Value::new(START + 1, 2.0)).unwrap();

        let target = SeriesMemoryStore::new();
        target.merge(&[&a, &b], false).unwrap();

        assert_eq!(target.metrics().unwrap(), vec![cpu.clone(), mem.clone()]);
        assert_eq!(target.get(&cpu).unwrap().count(), 1);
        assert_eq!(target.get(&mem).unwrap().count(), 1);
        // sources were not given series for metrics they never had
        assert_eq!(a.metrics().unwrap(), vec![cpu]);
    }

    #[test]
    fn test_add_store() {
        let metric = Metric::create("g1").unwrap();
        let sources = stores(&metric);
        let target = SeriesMemoryStore::new();
        target.add_store(&sources[4]).unwrap();
        assert_eq!(target.get(&metric).unwrap().count(), 5);
    }
}
