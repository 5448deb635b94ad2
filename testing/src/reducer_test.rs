//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use pulse_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// # Example
///
/// ```ignore
/// use pulse_testing::ReducerTest;
///
/// ReducerTest::new(PresenceReducer)
///     .with_env(test_environment())
///     .given_state(PresenceState::new("store-1"))
///     .when_action(PresenceAction::StartTracking)
///     .then_state(|state| {
///         assert_eq!(state.phase, Phase::Sleep);
///     })
///     .then_effects(|effects| {
///         assertions::assert_schedules(effects, SLEEP_CHECK);
///     })
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    action: Option<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
    S: Clone,
    A: Clone,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            action: None,
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Set the action to test (When)
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.action = Some(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set,
    /// or if any assertions fail.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        let action = self.action.expect("Action must be set with when_action()");

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        // Execute reducer
        let effects = self.reducer.reduce(&mut state, action, &env);

        // Run state assertions
        for assertion in self.state_assertions {
            assertion(&state);
        }

        // Run effect assertions
        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
///
/// Timer and cancellation lookups see through [`Effect::Parallel`] and
/// [`Effect::Cancellable`] wrappers.
pub mod assertions {
    use pulse_core::effect::{Effect, EffectId, TimerOperation};

    fn flatten<'a, A>(effects: &'a [Effect<A>], out: &mut Vec<&'a Effect<A>>) {
        for effect in effects {
            match effect {
                Effect::Parallel(inner) => flatten(inner, out),
                Effect::Cancellable { effect, .. } => flatten(std::slice::from_ref(&**effect), out),
                other => out.push(other),
            }
        }
    }

    fn flattened<A>(effects: &[Effect<A>]) -> Vec<&Effect<A>> {
        let mut out = Vec::new();
        flatten(effects, &mut out);
        out
    }

    /// Ids of every timer armed by `effects`, in order
    #[must_use]
    pub fn scheduled_ids<A>(effects: &[Effect<A>]) -> Vec<EffectId> {
        flattened(effects)
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::Timer(timer) => Some(timer.id()),
                _ => None,
            })
            .collect()
    }

    /// Ids cancelled by `effects`, in order
    #[must_use]
    pub fn cancelled_ids<A>(effects: &[Effect<A>]) -> Vec<EffectId> {
        flattened(effects)
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::Cancel(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if effects is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(|effect| matches!(effect, Effect::None)),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Assert that effects contain at least one Future effect
    ///
    /// # Panics
    ///
    /// Panics if no Future effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            flattened(effects).iter().any(|e| matches!(e, Effect::Future(_))),
            "Expected at least one Future effect, but none found"
        );
    }

    /// Assert that effects contain at least one Stream effect
    ///
    /// # Panics
    ///
    /// Panics if no Stream effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_stream_effect<A>(effects: &[Effect<A>]) {
        assert!(
            flattened(effects).iter().any(|e| matches!(e, Effect::Stream(_))),
            "Expected at least one Stream effect, but none found"
        );
    }

    /// Assert that a timer is armed under `id`
    ///
    /// # Panics
    ///
    /// Panics if no timer with that id is scheduled.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_schedules<A>(effects: &[Effect<A>], id: EffectId) {
        let scheduled = scheduled_ids(effects);
        assert!(
            scheduled.contains(&id),
            "Expected timer '{id}' to be scheduled, scheduled: {scheduled:?}"
        );
    }

    /// Assert that a one-shot timer is armed under `id` with the given delay
    ///
    /// # Panics
    ///
    /// Panics if no matching one-shot timer is scheduled.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_schedules_once<A>(
        effects: &[Effect<A>],
        id: EffectId,
        after: std::time::Duration,
    ) {
        assert!(
            flattened(effects).iter().any(|effect| matches!(
                effect,
                Effect::Timer(TimerOperation::Once { id: armed, after: delay, .. })
                    if *armed == id && *delay == after
            )),
            "Expected one-shot timer '{id}' after {after:?}"
        );
    }

    /// Assert that `id` is cancelled
    ///
    /// # Panics
    ///
    /// Panics if `id` is not cancelled.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_cancels<A>(effects: &[Effect<A>], id: EffectId) {
        let cancelled = cancelled_ids(effects);
        assert!(
            cancelled.contains(&id),
            "Expected '{id}' to be cancelled, cancelled: {cancelled:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::effect::{Effect, EffectId};
    use pulse_core::reducer::Reducer;
    use std::time::Duration;

    const HEARTBEAT: EffectId = EffectId::new("heartbeat");
    const FEED: EffectId = EffectId::new("feed");

    #[derive(Clone, Debug)]
    struct GateState {
        visitors: u32,
    }

    #[derive(Clone, Debug)]
    enum GateAction {
        Arrive,
        Leave,
        Beat,
    }

    struct GateReducer;

    struct GateEnv;

    // Heartbeat runs only while someone is inside
    impl Reducer for GateReducer {
        type State = GateState;
        type Action = GateAction;
        type Environment = GateEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> smallvec::SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                GateAction::Arrive => {
                    state.visitors += 1;
                    if state.visitors == 1 {
                        let every = Duration::from_secs(15);
                        smallvec::smallvec![Effect::every(HEARTBEAT, every, GateAction::Beat)]
                    } else {
                        smallvec::smallvec![Effect::None]
                    }
                },
                GateAction::Leave => {
                    state.visitors = state.visitors.saturating_sub(1);
                    if state.visitors == 0 {
                        smallvec::smallvec![Effect::Cancel(HEARTBEAT)]
                    } else {
                        smallvec::smallvec![]
                    }
                },
                GateAction::Beat => smallvec::smallvec![],
            }
        }
    }

    #[test]
    fn test_first_arrival_arms_heartbeat() {
        ReducerTest::new(GateReducer)
            .with_env(GateEnv)
            .given_state(GateState { visitors: 0 })
            .when_action(GateAction::Arrive)
            .then_state(|state| {
                assert_eq!(state.visitors, 1);
            })
            .then_effects(|effects| {
                assertions::assert_schedules(effects, HEARTBEAT);
                assertions::assert_effects_count(effects, 1);
            })
            .run();
    }

    #[test]
    fn test_second_arrival_has_no_effects() {
        ReducerTest::new(GateReducer)
            .with_env(GateEnv)
            .given_state(GateState { visitors: 1 })
            .when_action(GateAction::Arrive)
            .then_effects(|effects| {
                assertions::assert_no_effects(effects);
            })
            .run();
    }

    #[test]
    fn test_last_departure_cancels_heartbeat() {
        ReducerTest::new(GateReducer)
            .with_env(GateEnv)
            .given_state(GateState { visitors: 1 })
            .when_action(GateAction::Leave)
            .then_state(|state| {
                assert_eq!(state.visitors, 0);
            })
            .then_effects(|effects| {
                assertions::assert_cancels(effects, HEARTBEAT);
                assert!(assertions::scheduled_ids(effects).is_empty());
            })
            .run();
    }

    #[test]
    fn test_timer_assertions_see_through_wrappers() {
        let effects = vec![
            Effect::Cancel(HEARTBEAT),
            Effect::merge(vec![
                Effect::every(HEARTBEAT, Duration::from_secs(15), GateAction::Beat),
                Effect::Stream(Box::pin(futures::stream::empty())).cancellable(FEED),
            ]),
            Effect::after(FEED, Duration::from_secs(30), GateAction::Leave),
        ];

        assertions::assert_cancels(&effects, HEARTBEAT);
        assertions::assert_schedules(&effects, HEARTBEAT);
        assertions::assert_schedules_once(&effects, FEED, Duration::from_secs(30));
        assertions::assert_has_stream_effect(&effects);
        assert_eq!(assertions::scheduled_ids(&effects), vec![HEARTBEAT, FEED]);
        assert_eq!(assertions::cancelled_ids(&effects), vec![HEARTBEAT]);
    }
}
