//! Series benchmarks
//!
//! Run with: `cargo bench -p seriesdb-core`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use seriesdb_core::{CompactSeries, DefaultSeries, Series, Value};
use std::time::Duration;

const START: i64 = 1_700_000_000_000;

fn random_series(count: usize) -> DefaultSeries {
    DefaultSeries::random("bench", START, Duration::from_secs(1), count, 0.0, 100.0)
}

fn bench_compact_random_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact/get");

    for count in [100, 1_000, 10_000] {
        let compact = random_series(count).compact().unwrap();
        let mut rng = rand::thread_rng();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| compact.get(black_box(rng.gen_range(0..count))));
        });
    }

    group.finish();
}

fn bench_compact_from_values(c: &mut Criterion) {
    let values = random_series(10_000).values();

    c.bench_function("compact/from_values_10k", |b| {
        b.iter(|| CompactSeries::from_values("bench", black_box(&values)).unwrap());
    });
}

fn bench_default_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("default/add");

    group.bench_function("in_order", |b| {
        let series = DefaultSeries::new("bench");
        let mut ts = START;
        b.iter(|| {
            ts += 1_000;
            series.add(black_box(Value::new(ts, 42.5)));
        });
    });

    group.bench_function("with_aggregates", |b| {
        let series = random_series(1_000);
        let mut ts = START + 1_000_000;
        b.iter(|| {
            ts += 1_000;
            series.add(Value::new(ts, 1.0));
            black_box(series.average());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_compact_random_access,
    bench_compact_from_values,
    bench_default_add
);
criterion_main!(benches);
