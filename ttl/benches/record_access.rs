//! TTL hot-path benchmarks
//!
//! `record_access` and `metrics` must stay constant-time as the pattern
//! table grows.
//!
//! Run with: `cargo bench --bench record_access`

#![allow(missing_docs)] // Benchmarks don't need extensive docs

use chrono::{DateTime, TimeDelta, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pulse_ttl::{DataType, TtlState};

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

fn populated(keys: usize) -> TtlState {
    let mut state = TtlState::default();
    for i in 0..keys {
        let data_type = DataType::ALL[i % DataType::ALL.len()];
        state.record_access(&format!("key:{i}"), data_type, 2048, start());
    }
    state
}

fn benchmark_record_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_access");
    group.throughput(Throughput::Elements(1));

    for keys in [100, 10_000, 100_000] {
        let mut state = populated(keys);
        let mut tick = 0_i64;
        group.bench_with_input(BenchmarkId::new("existing_key", keys), &keys, |b, _| {
            b.iter(|| {
                tick += 1;
                state.record_access(
                    black_box("key:7"),
                    DataType::User,
                    2048,
                    start() + TimeDelta::milliseconds(tick),
                );
            });
        });
    }

    group.finish();
}

fn benchmark_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics");

    for keys in [100, 10_000, 100_000] {
        let state = populated(keys);
        group.bench_with_input(BenchmarkId::new("read", keys), &keys, |b, _| {
            b.iter(|| black_box(state.metrics()));
        });
    }

    group.finish();
}

fn benchmark_calculate(c: &mut Criterion) {
    let state = populated(1_000);
    c.bench_function("calculate_optimal_ttl", |b| {
        b.iter(|| black_box(state.calculate_optimal_ttl(black_box("key:42"), DataType::User)));
    });
}

criterion_group!(benches, benchmark_record_access, benchmark_metrics, benchmark_calculate);
criterion_main!(benches);
