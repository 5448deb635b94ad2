//! Tokio-backed [`Scheduler`] implementation.
//!
//! Every armed timer is a spawned tokio task registered under its
//! [`EffectId`]. Cancelling aborts the task and removes the registration in
//! the same critical section, so a handle can never be aborted twice and a
//! one-shot timer that lost a race with `cancel` never dispatches.

use pulse_core::effect::EffectId;
use pulse_core::environment::{Dispatch, Scheduler};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Shortest period a repeating timer may use
const MIN_PERIOD: Duration = Duration::from_millis(1);

struct TimerSlot {
    generation: u64,
    handle: AbortHandle,
}

/// Scheduler that runs timers as tokio tasks.
///
/// Cloning is cheap and clones share the same timer registry.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    timers: Arc<Mutex<HashMap<EffectId, TimerSlot>>>,
    generations: Arc<AtomicU64>,
}

impl TokioScheduler {
    /// Create a scheduler with no armed timers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of all currently armed timers, sorted
    #[must_use]
    pub fn armed(&self) -> Vec<EffectId> {
        let mut ids: Vec<EffectId> = lock(&self.timers).keys().copied().collect();
        ids.sort();
        ids
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("armed", &self.armed())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<A> Scheduler<A> for TokioScheduler
where
    A: Clone + Send + 'static,
{
    fn schedule_repeating(&self, id: EffectId, every: Duration, action: A, dispatch: Dispatch<A>) {
        let every = every.max(MIN_PERIOD);
        let generation = self.next_generation();

        let mut timers = lock(&self.timers);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracing::trace!(timer = %id, "Repeating timer fired");
                dispatch(action.clone());
            }
        });

        let slot = TimerSlot {
            generation,
            handle: task.abort_handle(),
        };
        if let Some(previous) = timers.insert(id, slot) {
            previous.handle.abort();
        }
        tracing::trace!(timer = %id, every_ms = every.as_millis(), "Repeating timer armed");
    }

    fn schedule_once(&self, id: EffectId, after: Duration, action: A, dispatch: Dispatch<A>) {
        let generation = self.next_generation();
        let registry = Arc::clone(&self.timers);

        // Spawn while holding the lock so the task cannot look up its slot
        // before it has been inserted.
        let mut timers = lock(&self.timers);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            {
                let mut timers = lock(&registry);
                let current = timers.get(&id).is_some_and(|slot| slot.generation == generation);
                if !current {
                    return;
                }
                timers.remove(&id);
            }
            tracing::trace!(timer = %id, "One-shot timer fired");
            dispatch(action);
        });

        let slot = TimerSlot {
            generation,
            handle: task.abort_handle(),
        };
        if let Some(previous) = timers.insert(id, slot) {
            previous.handle.abort();
        }
        tracing::trace!(timer = %id, after_ms = after.as_millis(), "One-shot timer armed");
    }

    fn cancel(&self, id: EffectId) -> bool {
        match lock(&self.timers).remove(&id) {
            Some(slot) => {
                slot.handle.abort();
                tracing::trace!(timer = %id, "Timer cancelled");
                true
            },
            None => false,
        }
    }

    fn is_armed(&self, id: EffectId) -> bool {
        lock(&self.timers).contains_key(&id)
    }

    fn cancel_all(&self) -> usize {
        let drained: Vec<TimerSlot> = lock(&self.timers).drain().map(|(_, slot)| slot).collect();
        for slot in &drained {
            slot.handle.abort();
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const TICK: EffectId = EffectId::new("tick");
    const LATER: EffectId = EffectId::new("later");

    fn counting_dispatch(counter: &Arc<AtomicUsize>) -> Dispatch<()> {
        let counter = Arc::clone(counter);
        Arc::new(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn once_timer_fires_and_forgets_itself() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_once(LATER, Duration::from_secs(30), (), counting_dispatch(&fired));
        assert!(Scheduler::<()>::is_armed(&scheduler, LATER));

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!Scheduler::<()>::is_armed(&scheduler, LATER));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_once_timer_never_fires() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_once(LATER, Duration::from_secs(30), (), counting_dispatch(&fired));
        assert!(Scheduler::<()>::cancel(&scheduler, LATER));
        assert!(!Scheduler::<()>::cancel(&scheduler, LATER));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_timer_fires_each_period() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_repeating(TICK, Duration::from_secs(15), (), counting_dispatch(&fired));

        tokio::time::sleep(Duration::from_secs(46)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        assert_eq!(Scheduler::<()>::cancel_all(&scheduler), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_previous_timer() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_once(LATER, Duration::from_secs(10), (), counting_dispatch(&fired));
        scheduler.schedule_once(LATER, Duration::from_secs(40), (), counting_dispatch(&fired));
        assert_eq!(scheduler.armed(), vec![LATER]);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(25)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
