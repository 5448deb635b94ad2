//! Store send benchmarks
//!
//! Measures the per-action cost of the Store:
//! - reduce + broadcast of a future's result, with and without subscribers
//! - arming and cancelling a timer (the hot path of every phase switch)
//!
//! Run with: `cargo bench --bench store_send`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pulse_core::effect::{Effect, EffectId};
use pulse_core::reducer::Reducer;
use pulse_core::{smallvec, SmallVec};
use pulse_runtime::Store;
use std::time::Duration;

// ============================================================================
// Benchmark Fixtures
// ============================================================================

const CHECK: EffectId = EffectId::new("check");

#[derive(Debug, Clone)]
enum BenchAction {
    Check,
    Checked { visitors: u32 },
    Arm,
    Disarm,
}

#[derive(Debug, Clone, Default)]
struct BenchState {
    checks: u32,
}

#[derive(Clone)]
struct BenchEnvironment;

#[derive(Clone)]
struct BenchReducer;

impl Reducer for BenchReducer {
    type State = BenchState;
    type Action = BenchAction;
    type Environment = BenchEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        _env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            BenchAction::Check => {
                state.checks += 1;
                let visitors = state.checks % 3;
                smallvec![Effect::Future(Box::pin(async move {
                    Some(BenchAction::Checked { visitors })
                }))]
            },
            BenchAction::Checked { .. } => smallvec![],
            BenchAction::Arm => {
                smallvec![Effect::every(CHECK, Duration::from_secs(60), BenchAction::Check)]
            },
            BenchAction::Disarm => smallvec![Effect::Cancel(CHECK)],
        }
    }
}

fn store() -> Store<BenchState, BenchAction, BenchEnvironment, BenchReducer> {
    Store::new(BenchState::default(), BenchReducer, BenchEnvironment)
}

// ============================================================================
// Benchmarks
// ============================================================================

/// Baseline: 100 checks with nobody observing
fn bench_send_no_subscribers(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_send");
    group.measurement_time(Duration::from_secs(10));

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");

    group.bench_function("100_checks_no_subscribers", |b| {
        b.to_async(&runtime).iter(|| async {
            let store = store();
            for _ in 0..100 {
                if let Ok(mut handle) = store.send(black_box(BenchAction::Check)).await {
                    handle.wait().await;
                }
            }
        });
    });

    group.bench_function("100_checks_10_subscribers", |b| {
        b.to_async(&runtime).iter(|| async {
            let store = store();
            let _subscribers: Vec<_> = (0..10).map(|_| store.subscribe_actions()).collect();
            for _ in 0..100 {
                if let Ok(mut handle) = store.send(black_box(BenchAction::Check)).await {
                    handle.wait().await;
                }
            }
        });
    });

    group.finish();
}

/// Arm then cancel a repeating timer
fn bench_timer_swap(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_swap");

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let store = runtime.block_on(async { store() });

    group.bench_function("arm_and_cancel", |b| {
        b.to_async(&runtime).iter(|| async {
            store.send(black_box(BenchAction::Arm)).await.ok();
            store.send(black_box(BenchAction::Disarm)).await.ok();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_send_no_subscribers, bench_timer_swap);
criterion_main!(benches);
