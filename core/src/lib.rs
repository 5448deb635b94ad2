//! # Pulse Core
//!
//! Core traits and types for the Pulse adaptive-frequency core.
//!
//! Pulse decides *how often* to do things based on observed activity: how
//! often to poll for live visitors on a storefront, and how long a cached
//! value should live. Both components are written as reducers whose side
//! effects (remote calls, timers, subscriptions) are returned as values and
//! executed by a runtime.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state for a feature
//! - **Action**: All possible inputs to a reducer (commands, timer ticks, remote results)
//! - **Reducer**: Pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (not execution), including timers
//! - **Environment**: Injected dependencies via traits (clock, remote store, change feed)
//!
//! ## Example
//!
//! ```ignore
//! use pulse_core::*;
//!
//! impl Reducer for TickReducer {
//!     type State = TickState;
//!     type Action = TickAction;
//!     type Environment = TickEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut TickState,
//!         action: TickAction,
//!         env: &TickEnvironment,
//!     ) -> SmallVec<[Effect<TickAction>; 4]> {
//!         match action {
//!             TickAction::Start => smallvec![Effect::Timer(TimerOperation::Repeating {
//!                 id: TICK,
//!                 every: Duration::from_secs(15),
//!                 action: Box::new(TickAction::Tick),
//!             })],
//!             TickAction::Tick => {
//!                 state.ticks += 1;
//!                 smallvec![Effect::None]
//!             }
//!         }
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

/// Change notifications pushed by the remote store
pub mod change_feed;

/// Remote session store contract
pub mod session_store;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all decision logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Inspects the action against current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed, in order
        ///
        /// Timer and cancellation effects are applied by the runtime in the
        /// order they are returned, before the next action is reduced.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution), composable, and cancellable by id.
pub mod effect {
    use futures::Stream;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Identifier for timers and cancellable effects.
    ///
    /// Ids are scoped to a single store: two stores may reuse the same id
    /// without interfering.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct EffectId(&'static str);

    impl EffectId {
        /// Create an id from a static name
        #[must_use]
        pub const fn new(name: &'static str) -> Self {
            Self(name)
        }

        /// The name this id was created with
        #[must_use]
        pub const fn name(&self) -> &'static str {
            self.0
        }
    }

    impl std::fmt::Display for EffectId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    /// Timer descriptions handed to a [`Scheduler`](crate::environment::Scheduler)
    ///
    /// Scheduling an id that is already armed replaces the existing timer.
    pub enum TimerOperation<Action> {
        /// Dispatch `action` every `every`, first firing one period from now
        Repeating {
            /// Timer id (used for cancellation)
            id: EffectId,
            /// Period between firings
            every: Duration,
            /// Action dispatched on every firing
            action: Box<Action>,
        },

        /// Dispatch `action` once after `after`
        Once {
            /// Timer id (used for cancellation)
            id: EffectId,
            /// Delay before firing
            after: Duration,
            /// Action dispatched when the timer fires
            action: Box<Action>,
        },
    }

    impl<Action> TimerOperation<Action> {
        /// The id of the timer this operation arms
        #[must_use]
        pub const fn id(&self) -> EffectId {
            match self {
                Self::Repeating { id, .. } | Self::Once { id, .. } => *id,
            }
        }
    }

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// Long-running stream; every item is fed back into the reducer
        Stream(Pin<Box<dyn Stream<Item = Action> + Send>>),

        /// Arm a timer
        Timer(TimerOperation<Action>),

        /// Run an effect that can later be stopped with [`Effect::Cancel`]
        Cancellable {
            /// Id used to cancel the effect
            id: EffectId,
            /// The wrapped effect
            effect: Box<Effect<Action>>,
        },

        /// Cancel the timer or cancellable effect registered under this id
        ///
        /// Cancelling an id that is not registered is a no-op.
        Cancel(EffectId),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::Stream(_) => write!(f, "Effect::Stream(<stream>)"),
                Effect::Timer(TimerOperation::Repeating { id, every, action }) => f
                    .debug_struct("Effect::Timer::Repeating")
                    .field("id", id)
                    .field("every", every)
                    .field("action", action)
                    .finish(),
                Effect::Timer(TimerOperation::Once { id, after, action }) => f
                    .debug_struct("Effect::Timer::Once")
                    .field("id", id)
                    .field("after", after)
                    .field("action", action)
                    .finish(),
                Effect::Cancellable { id, effect } => f
                    .debug_struct("Effect::Cancellable")
                    .field("id", id)
                    .field("effect", effect)
                    .finish(),
                Effect::Cancel(id) => f.debug_tuple("Effect::Cancel").field(id).finish(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Repeating timer shorthand
        #[must_use]
        pub fn every(id: EffectId, every: Duration, action: Action) -> Effect<Action> {
            Effect::Timer(TimerOperation::Repeating {
                id,
                every,
                action: Box::new(action),
            })
        }

        /// One-shot timer shorthand
        #[must_use]
        pub fn after(id: EffectId, after: Duration, action: Action) -> Effect<Action> {
            Effect::Timer(TimerOperation::Once {
                id,
                after,
                action: Box::new(action),
            })
        }

        /// Wrap this effect so it can be cancelled under `id`
        #[must_use]
        pub fn cancellable(self, id: EffectId) -> Effect<Action> {
            Effect::Cancellable {
                id,
                effect: Box::new(self),
            }
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter (clock) or the runtime (scheduler).
pub mod environment {
    use super::effect::EffectId;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Callback a scheduler uses to hand a fired timer's action back to its store
    pub type Dispatch<A> = Arc<dyn Fn(A) + Send + Sync>;

    /// Scheduler trait - arms and cancels timers on behalf of a store
    ///
    /// The runtime owns one scheduler per store and applies
    /// [`TimerOperation`](crate::effect::TimerOperation)s and
    /// [`Effect::Cancel`](crate::effect::Effect::Cancel) through it.
    ///
    /// Implementations must:
    /// - replace an armed timer when the same id is scheduled again
    /// - forget a timer as soon as it is cancelled (a second cancel returns `false`)
    /// - forget a one-shot timer once it has fired
    pub trait Scheduler<A>: Send + Sync {
        /// Dispatch `action` every `every` until cancelled
        fn schedule_repeating(
            &self,
            id: EffectId,
            every: Duration,
            action: A,
            dispatch: Dispatch<A>,
        );

        /// Dispatch `action` once after `after` unless cancelled first
        fn schedule_once(&self, id: EffectId, after: Duration, action: A, dispatch: Dispatch<A>);

        /// Cancel the timer registered under `id`
        ///
        /// Returns `true` if a timer was armed.
        fn cancel(&self, id: EffectId) -> bool;

        /// Whether a timer is currently armed under `id`
        fn is_armed(&self, id: EffectId) -> bool;

        /// Cancel every armed timer, returning how many were armed
        fn cancel_all(&self) -> usize;
    }
}
