//! # Pulse Runtime
//!
//! Runtime implementation for the Pulse adaptive-frequency core.
//!
//! This crate provides the Store runtime that coordinates reducer execution
//! and effect handling.
//!
//! ## Core Components
//!
//! - **Store**: The runtime that manages state and executes effects
//! - **Scheduler**: [`TokioScheduler`] arms timers requested by reducers
//! - **Metrics**: Prometheus export of store, presence and TTL metrics
//!
//! ## Example
//!
//! ```ignore
//! use pulse_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action
//! store.send(Action::Start).await?;
//!
//! // Read state
//! let phase = store.state(|s| s.phase).await;
//! ```

use pulse_core::{effect::Effect, reducer::Reducer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// Tokio-backed timer scheduler
pub mod scheduler;

/// Prometheus metrics for observability
pub mod metrics;

pub use scheduler::TokioScheduler;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `send()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        ///
        /// Some effects were still running when the timeout elapsed.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for the effects of that
/// action to complete. Timers are not tracked: they belong to the store, not
/// to the action that armed them. Streams are tracked until they end, so the
/// handle of an action that opens a long-lived subscription only completes
/// when the subscription is cancelled.
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };
        let tracking = EffectTracking {
            counter,
            notifier: Arc::new(tx),
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (tx, rx) = watch::channel(());
        let _ = tx.send(());

        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Number of tracked effects still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Wait for all tracked effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait for all effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the timeout expires before all effects complete.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: Effect tracking context passed through effect execution
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl EffectTracking {
    /// Increment the effect counter (effect started)
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the effect counter (effect completed)
    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements effect counter on drop
///
/// Ensures the effect counter is always decremented, even if the effect is
/// aborted or panics.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{
        lock, Arc, AtomicBool, AtomicCounterGuard, AtomicUsize, DecrementGuard, Duration, Effect,
        EffectHandle, EffectTracking, Mutex, Ordering, Reducer, RwLock, StoreError, TokioScheduler,
    };
    use crate::metrics::StoreMetrics;
    use futures::StreamExt;
    use pulse_core::effect::{EffectId, TimerOperation};
    use pulse_core::environment::{Dispatch, Scheduler};
    use std::collections::HashMap;
    use tokio::sync::broadcast;
    use tokio::task::AbortHandle;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock`; the reducer runs under the write lock)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    /// 5. Timers and cancellable effects, keyed by [`EffectId`]
    ///
    /// Timer and cancellation effects are applied synchronously, in the order
    /// the reducer returned them, before the write lock is released. A
    /// cancelled timer therefore can never fire after the action that
    /// cancelled it has been reduced, except for a firing that was already
    /// dispatched; reducers must tolerate such stale actions.
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `E`: Environment type
    /// - `R`: Reducer implementation
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        scheduler: Arc<dyn Scheduler<A>>,
        cancellables: Arc<Mutex<HashMap<EffectId, Vec<AbortHandle>>>>,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        /// Action broadcast channel for observing actions produced by effects
        /// and timers.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Sync + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        ///
        /// Timers run on a fresh [`TokioScheduler`]; the store must be used
        /// from within a tokio runtime.
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            let scheduler = Arc::new(TokioScheduler::new());
            Self::with_scheduler(initial_state, reducer, environment, scheduler)
        }

        /// Create a new store that arms its timers through `scheduler`
        #[must_use]
        pub fn with_scheduler(
            initial_state: S,
            reducer: R,
            environment: E,
            scheduler: Arc<dyn Scheduler<A>>,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(64);

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                scheduler,
                cancellables: Arc::new(Mutex::new(HashMap::new())),
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// Whether a timer is armed under `id`
        #[must_use]
        pub fn is_timer_armed(&self, id: EffectId) -> bool {
            self.scheduler.is_armed(id)
        }

        /// Whether a cancellable effect is registered under `id`
        #[must_use]
        pub fn is_effect_running(&self, id: EffectId) -> bool {
            lock(&self.cancellables)
                .get(&id)
                .is_some_and(|handles| handles.iter().any(|handle| !handle.is_finished()))
        }

        /// Initiate graceful shutdown of the store
        ///
        /// This method:
        /// 1. Sets the shutdown flag (rejecting new actions)
        /// 2. Cancels every timer and cancellable effect
        /// 3. Waits for the remaining effects to complete (with timeout)
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before all
        /// pending effects complete.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            self.shutdown.store(true, Ordering::Release);

            let timers = self.scheduler.cancel_all();
            let cancelled: Vec<AbortHandle> = lock(&self.cancellables)
                .drain()
                .flat_map(|(_, handles)| handles)
                .collect();
            for handle in &cancelled {
                handle.abort();
            }
            tracing::debug!(timers, cancellables = cancelled.len(), "Cancelled scheduled work");

            let start = std::time::Instant::now();
            let poll_interval = Duration::from_millis(10);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);

                if pending == 0 {
                    tracing::info!("All effects completed, shutdown successful");
                    return Ok(());
                }

                if start.elapsed() >= timeout {
                    tracing::error!(
                        pending_effects = pending,
                        "Shutdown timeout: {} effects still running",
                        pending
                    );
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tokio::time::sleep(poll_interval).await;
            }
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Applies timer and cancellation effects in order
        /// 4. Spawns asynchronous effects; their actions are fed back
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError>
        where
            R: Clone,
            E: Clone,
        {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                return Err(StoreError::ShutdownInProgress);
            }

            let (handle, tracking) = EffectHandle::new();

            let mut state = self.state.write().await;
            tracing::trace!("Acquired write lock on state");

            let start = std::time::Instant::now();
            let effects = self.reducer.reduce(&mut *state, action, &self.environment);
            StoreMetrics::record_command(start.elapsed());

            tracing::trace!("Reducer completed, returned {} effects", effects.len());
            for effect in effects {
                let _ = self.execute_effect(effect, &tracking);
            }
            drop(state);

            Ok(handle)
        }

        /// Send an action and wait for a matching result action
        ///
        /// Subscribes to the action broadcast before sending, then returns the
        /// first action produced by an effect or timer that matches `predicate`.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: Timeout expired before matching action received
        /// - [`StoreError::ChannelClosed`]: Action broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: Store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            R: Clone,
            E: Clone,
            F: Fn(&A) -> bool,
        {
            // Subscribe BEFORE sending to avoid race condition
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                skipped,
                                "Action observer lagged, {} actions skipped",
                                skipped
                            );
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to all actions produced by effects and timers
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let visitors = store.state(|s| s.visitors.len()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Callback handed to the scheduler: feeds a fired timer's action back in
        fn dispatcher(&self) -> Dispatch<A>
        where
            R: Clone,
            E: Clone,
        {
            let store = self.clone();
            Arc::new(move |action: A| {
                let store = store.clone();
                tokio::spawn(async move {
                    let _ = store.action_broadcast.send(action.clone());
                    if let Err(error) = store.send(action).await {
                        tracing::debug!(%error, "Dropped timer action");
                    }
                });
            })
        }

        /// Spawn an effect task with shutdown and handle tracking
        fn spawn_tracked<F>(&self, tracking: &EffectTracking, task: F) -> AbortHandle
        where
            F: std::future::Future<Output = ()> + Send + 'static,
        {
            tracking.increment();
            self.pending_effects.fetch_add(1, Ordering::SeqCst);
            let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));
            let guard = DecrementGuard(tracking.clone());

            tokio::spawn(async move {
                let _guard = guard;
                let _pending_guard = pending_guard;
                task.await;
            })
            .abort_handle()
        }

        /// Execute an effect
        ///
        /// Returns the abort handles of any tasks it spawned so that
        /// [`Effect::Cancellable`] can register them.
        ///
        /// # Error Handling Strategy
        ///
        /// Effects are fire-and-forget: failures are handled inside the effect
        /// (which may produce a failure action). A panicking effect task is
        /// contained by tokio and only decrements the counters.
        #[allow(clippy::too_many_lines)]
        fn execute_effect(&self, effect: Effect<A>, tracking: &EffectTracking) -> Vec<AbortHandle>
        where
            R: Clone,
            E: Clone,
        {
            match effect {
                Effect::None => {
                    tracing::trace!("Executing Effect::None (no-op)");
                    Vec::new()
                },
                Effect::Parallel(effects) => {
                    tracing::trace!("Executing Effect::Parallel with {} effects", effects.len());
                    StoreMetrics::record_effect("parallel");
                    effects
                        .into_iter()
                        .flat_map(|effect| self.execute_effect(effect, tracking))
                        .collect()
                },
                Effect::Future(fut) => {
                    tracing::trace!("Executing Effect::Future");
                    StoreMetrics::record_effect("future");
                    let store = self.clone();

                    vec![self.spawn_tracked(tracking, async move {
                        if let Some(action) = fut.await {
                            tracing::trace!("Effect::Future produced an action, sending to store");
                            let _ = store.action_broadcast.send(action.clone());
                            let _ = store.send(action).await;
                        }
                    })]
                },
                Effect::Stream(mut stream) => {
                    tracing::trace!("Executing Effect::Stream");
                    StoreMetrics::record_effect("stream");
                    let store = self.clone();

                    vec![self.spawn_tracked(tracking, async move {
                        while let Some(action) = stream.next().await {
                            let _ = store.action_broadcast.send(action.clone());
                            if store.send(action).await.is_err() {
                                break;
                            }
                        }
                        tracing::trace!("Effect::Stream completed");
                    })]
                },
                Effect::Timer(TimerOperation::Repeating { id, every, action }) => {
                    StoreMetrics::record_effect("timer");
                    self.scheduler.schedule_repeating(id, every, *action, self.dispatcher());
                    Vec::new()
                },
                Effect::Timer(TimerOperation::Once { id, after, action }) => {
                    StoreMetrics::record_effect("timer");
                    self.scheduler.schedule_once(id, after, *action, self.dispatcher());
                    Vec::new()
                },
                Effect::Cancellable { id, effect } => {
                    let handles = self.execute_effect(*effect, tracking);
                    let previous = lock(&self.cancellables).insert(id, handles);
                    for handle in previous.into_iter().flatten() {
                        handle.abort();
                    }
                    tracing::trace!(effect = %id, "Registered cancellable effect");
                    Vec::new()
                },
                Effect::Cancel(id) => {
                    let timer = self.scheduler.cancel(id);
                    let handles = lock(&self.cancellables).remove(&id);
                    let running = handles.is_some();
                    for handle in handles.into_iter().flatten() {
                        handle.abort();
                    }
                    tracing::trace!(effect = %id, timer, running, "Cancelled effect");
                    Vec::new()
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                scheduler: Arc::clone(&self.scheduler),
                cancellables: Arc::clone(&self.cancellables),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

// Re-export for convenience
pub use store::Store;
