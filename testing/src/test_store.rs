//! Deterministic store for testing reducers together with their effects.
//!
//! [`TestStore`] runs a reducer the way the production `Store` does, but on
//! the test's own task: futures and streams are polled in place, timers are
//! armed on a [`ManualScheduler`] and only fire when the test advances time.
//! Every `send`/`advance` returns once the system has settled, meaning no
//! queued action is left and no in-flight effect can make progress.

#![allow(clippy::module_name_repetitions)] // TestStore is the natural name

use crate::mocks::ManualClock;
use crate::scheduler::ManualScheduler;
use crate::to_delta;
use futures::{FutureExt, Stream, StreamExt};
use pulse_core::effect::{Effect, EffectId, TimerOperation};
use pulse_core::environment::{Clock, Dispatch, Scheduler};
use pulse_core::reducer::Reducer;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type Invariant<S> = Box<dyn Fn(&S, &[EffectId])>;

enum Task<A> {
    Future(Pin<Box<dyn Future<Output = Option<A>> + Send>>),
    Stream(Pin<Box<dyn Stream<Item = A> + Send>>),
}

struct InFlight<A> {
    id: Option<EffectId>,
    task: Task<A>,
}

/// Outcome of polling one in-flight effect
enum Progress<A> {
    Pending,
    Done(Option<A>),
    Item(A),
}

/// Store that executes effects deterministically over simulated time
///
/// # Example
///
/// ```ignore
/// let clock = ManualClock::default();
/// let mut store = TestStore::new(TickReducer, TickState::default(), TickEnv, clock);
///
/// store.send(TickAction::Start).await;
/// store.advance(Duration::from_secs(45)).await;
///
/// assert_eq!(store.state().ticks, 3);
/// ```
pub struct TestStore<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    state: S,
    environment: E,
    clock: ManualClock,
    scheduler: ManualScheduler<A>,
    queue: Arc<Mutex<VecDeque<A>>>,
    in_flight: Vec<InFlight<A>>,
    received: Vec<A>,
    invariants: Vec<Invariant<S>>,
}

impl<R, S, A, E> TestStore<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
    A: Clone + Send + 'static,
{
    /// Create a test store whose timers run on `clock`
    ///
    /// Pass the same clock (or a clone) to the environment so reducers and
    /// timers agree on the time.
    pub fn new(reducer: R, state: S, environment: E, clock: ManualClock) -> Self {
        Self {
            reducer,
            state,
            environment,
            scheduler: ManualScheduler::new(clock.clone()),
            clock,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            in_flight: Vec::new(),
            received: Vec::new(),
            invariants: Vec::new(),
        }
    }

    /// Check `invariant` after every reduced action
    ///
    /// The closure receives the state and the ids of all armed timers.
    #[must_use]
    pub fn with_invariant<F>(mut self, invariant: F) -> Self
    where
        F: Fn(&S, &[EffectId]) + 'static,
    {
        self.invariants.push(Box::new(invariant));
        self
    }

    /// Current state
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// The environment handed to the reducer
    pub const fn environment(&self) -> &E {
        &self.environment
    }

    /// The simulated clock
    pub const fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Whether a timer is armed under `id`
    pub fn is_armed(&self, id: EffectId) -> bool {
        self.scheduler.is_armed(id)
    }

    /// Ids of all armed timers, sorted
    pub fn armed(&self) -> Vec<EffectId> {
        self.scheduler.armed()
    }

    /// Whether a cancellable effect (future or stream) is running under `id`
    pub fn is_running(&self, id: EffectId) -> bool {
        self.in_flight.iter().any(|task| task.id == Some(id))
    }

    /// Actions produced by effects and timers so far, in order
    pub fn received(&self) -> &[A] {
        &self.received
    }

    /// Forget the received log
    pub fn clear_received(&mut self) {
        self.received.clear();
    }

    /// Send an action and run the system until it settles
    pub async fn send(&mut self, action: A) {
        self.reduce(action);
        self.settle().await;
    }

    /// Move simulated time forward by `by`, firing due timers in order
    ///
    /// The system settles after every firing, so an action cancelling a
    /// timer prevents every later firing of it.
    pub async fn advance(&mut self, by: Duration) {
        let deadline = self.clock.now() + to_delta(by);
        self.settle().await;
        while self.scheduler.fire_next(deadline) {
            self.settle().await;
        }
        self.clock.set(deadline);
        self.settle().await;
    }

    fn reduce(&mut self, action: A) {
        let effects = self.reducer.reduce(&mut self.state, action, &self.environment);
        for effect in effects {
            self.apply(effect, None);
        }

        if !self.invariants.is_empty() {
            let armed = self.scheduler.armed();
            for invariant in &self.invariants {
                invariant(&self.state, &armed);
            }
        }
    }

    fn dispatcher(&self) -> Dispatch<A> {
        let queue = Arc::clone(&self.queue);
        Arc::new(move |action| {
            queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(action);
        })
    }

    fn apply(&mut self, effect: Effect<A>, id: Option<EffectId>) {
        match effect {
            Effect::None => {},
            Effect::Parallel(effects) => {
                for effect in effects {
                    self.apply(effect, id);
                }
            },
            Effect::Future(fut) => self.in_flight.push(InFlight {
                id,
                task: Task::Future(fut),
            }),
            Effect::Stream(stream) => self.in_flight.push(InFlight {
                id,
                task: Task::Stream(stream),
            }),
            Effect::Timer(TimerOperation::Repeating { id, every, action }) => {
                self.scheduler.schedule_repeating(id, every, *action, self.dispatcher());
            },
            Effect::Timer(TimerOperation::Once { id, after, action }) => {
                self.scheduler.schedule_once(id, after, *action, self.dispatcher());
            },
            Effect::Cancellable { id, effect } => {
                self.in_flight.retain(|task| task.id != Some(id));
                self.apply(*effect, Some(id));
            },
            Effect::Cancel(id) => {
                self.scheduler.cancel(id);
                self.in_flight.retain(|task| task.id != Some(id));
            },
        }
    }

    fn next_queued(&self) -> Option<A> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    /// Poll every in-flight effect once; returns whether any made progress
    fn poll_in_flight(&mut self) -> bool {
        let mut progressed = false;
        let mut index = 0;

        while index < self.in_flight.len() {
            let progress = match &mut self.in_flight[index].task {
                Task::Future(fut) => fut.now_or_never().map_or(Progress::Pending, Progress::Done),
                Task::Stream(stream) => match stream.next().now_or_never() {
                    None => Progress::Pending,
                    Some(None) => Progress::Done(None),
                    Some(Some(action)) => Progress::Item(action),
                },
            };

            match progress {
                Progress::Pending => index += 1,
                Progress::Done(action) => {
                    progressed = true;
                    self.in_flight.remove(index);
                    if let Some(action) = action {
                        self.queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(action);
                    }
                },
                Progress::Item(action) => {
                    progressed = true;
                    self.queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(action);
                    index += 1;
                },
            }
        }

        progressed
    }

    /// Run queued actions and poll effects until nothing moves
    async fn settle(&mut self) {
        let mut idle_rounds = 0;
        loop {
            while let Some(action) = self.next_queued() {
                self.received.push(action.clone());
                self.reduce(action);
            }

            if self.poll_in_flight() {
                idle_rounds = 0;
                continue;
            }

            if !self.queue.lock().unwrap_or_else(PoisonError::into_inner).is_empty() {
                continue;
            }

            // Give effects waiting on other tasks a chance before giving up
            idle_rounds += 1;
            if idle_rounds > 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
    }
}
