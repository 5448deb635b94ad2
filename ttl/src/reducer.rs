//! TTL reducer: access recording and the periodic optimizer.

use crate::config::TuningConfig;
use crate::state::TtlState;
use crate::types::DataType;
use pulse_core::effect::{Effect, EffectId};
use pulse_core::environment::Clock;
use pulse_core::reducer::Reducer;
use pulse_core::{smallvec, SmallVec};
use pulse_runtime::metrics::TtlMetricsRecorder;
use std::sync::Arc;

/// Timer id of the optimizer loop
pub const OPTIMIZER: EffectId = EffectId::new("ttl.optimizer");

/// Actions of a TTL manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TtlAction {
    /// Arm the optimizer loop
    StartOptimizer,
    /// Disarm the optimizer loop
    StopOptimizer,
    /// One cache read or write
    RecordAccess {
        /// Cache key
        key: String,
        /// Volatility class
        data_type: DataType,
        /// Payload size in bytes
        size: u64,
    },
    /// Run one self-tuning pass
    Optimize,
}

/// Dependencies of a TTL manager
#[derive(Clone)]
pub struct TtlEnvironment {
    /// Time source for access timestamps and sweeps
    pub clock: Arc<dyn Clock>,
    /// Optimizer cadence and sweep horizon
    pub tuning: TuningConfig,
}

impl TtlEnvironment {
    /// Environment with default tuning
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tuning: TuningConfig::default(),
        }
    }

    /// Replace the tuning config
    #[must_use]
    pub const fn with_tuning(mut self, tuning: TuningConfig) -> Self {
        self.tuning = tuning;
        self
    }
}

/// Reducer of [`TtlState`]
#[derive(Clone, Copy, Debug, Default)]
pub struct TtlReducer;

impl TtlReducer {
    /// Create a reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for TtlReducer {
    type State = TtlState;
    type Action = TtlAction;
    type Environment = TtlEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            TtlAction::StartOptimizer => {
                if state.optimizer_running {
                    return smallvec![];
                }
                state.optimizer_running = true;
                tracing::info!(interval = ?env.tuning.optimize_interval, "TTL optimizer started");
                let every = env.tuning.optimize_interval;
                smallvec![Effect::every(OPTIMIZER, every, TtlAction::Optimize)]
            },

            TtlAction::StopOptimizer => {
                if !state.optimizer_running {
                    return smallvec![];
                }
                state.optimizer_running = false;
                tracing::info!("TTL optimizer stopped");
                smallvec![Effect::Cancel(OPTIMIZER)]
            },

            TtlAction::RecordAccess { key, data_type, size } => {
                state.record_access(&key, data_type, size, env.clock.now());
                let metrics = state.metrics();
                TtlMetricsRecorder::record_access(metrics.hit_ratio, metrics.tracked_keys);
                smallvec![]
            },

            TtlAction::Optimize => {
                let report = state.optimize(env.clock.now(), &env.tuning);
                TtlMetricsRecorder::record_optimization(report.swept);
                tracing::info!(
                    hit_ratio = report.hit_ratio,
                    adjusted = report.adjusted.len(),
                    swept = report.swept,
                    tracked_keys = report.tracked_keys,
                    "TTL optimization pass"
                );
                state.last_report = Some(report);
                smallvec![]
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_testing::{assertions, test_clock, ReducerTest};
    use std::time::Duration;

    fn env() -> TtlEnvironment {
        TtlEnvironment::new(Arc::new(test_clock()))
    }

    #[test]
    fn start_arms_the_optimizer() {
        ReducerTest::new(TtlReducer::new())
            .with_env(env())
            .given_state(TtlState::default())
            .when_action(TtlAction::StartOptimizer)
            .then_state(|state| assert!(state.optimizer_running))
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_schedules(effects, OPTIMIZER);
            })
            .run();
    }

    #[test]
    fn second_start_is_a_no_op() {
        ReducerTest::new(TtlReducer::new())
            .with_env(env())
            .given_state(TtlState {
                optimizer_running: true,
                ..TtlState::default()
            })
            .when_action(TtlAction::StartOptimizer)
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn stop_cancels_the_optimizer() {
        ReducerTest::new(TtlReducer::new())
            .with_env(env())
            .given_state(TtlState {
                optimizer_running: true,
                ..TtlState::default()
            })
            .when_action(TtlAction::StopOptimizer)
            .then_state(|state| assert!(!state.optimizer_running))
            .then_effects(|effects| assertions::assert_cancels(effects, OPTIMIZER))
            .run();
    }

    #[test]
    fn record_access_uses_the_clock() {
        ReducerTest::new(TtlReducer::new())
            .with_env(env())
            .given_state(TtlState::default())
            .when_action(TtlAction::RecordAccess {
                key: "k1".to_string(),
                data_type: DataType::User,
                size: 2048,
            })
            .then_state(|state| {
                let pattern = &state.patterns["k1"];
                assert_eq!(pattern.last_access, test_clock().now());
                assert_eq!(
                    state.calculate_optimal_ttl("k1", DataType::User),
                    Duration::from_millis(675_000)
                );
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn optimize_keeps_the_report() {
        ReducerTest::new(TtlReducer::new())
            .with_env(env())
            .given_state(TtlState::default())
            .when_action(TtlAction::Optimize)
            .then_state(|state| {
                let report = state.last_report.as_ref().map(|r| (r.swept, r.tracked_keys));
                assert_eq!(report, Some((0, 0)));
            })
            .run();
    }
}
