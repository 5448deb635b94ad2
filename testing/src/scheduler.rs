//! Simulated-time [`Scheduler`] for deterministic timer tests.
//!
//! Timers never fire on their own. A test (usually through
//! [`TestStore::advance`](crate::TestStore::advance)) asks for the next due
//! timer, which moves the shared [`ManualClock`] to its due time before
//! dispatching. Timers due at the same instant fire in the order they were
//! armed.

use crate::mocks::ManualClock;
use crate::to_delta;
use chrono::{DateTime, Utc};
use pulse_core::effect::EffectId;
use pulse_core::environment::{Clock, Dispatch, Scheduler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct VirtualTimer<A> {
    due: DateTime<Utc>,
    period: Option<Duration>,
    action: A,
    dispatch: Dispatch<A>,
    seq: u64,
}

struct Timers<A> {
    armed: HashMap<EffectId, VirtualTimer<A>>,
    next_seq: u64,
}

/// Scheduler driven by a [`ManualClock`]
///
/// Clones share the same timers.
pub struct ManualScheduler<A> {
    clock: ManualClock,
    timers: Arc<Mutex<Timers<A>>>,
}

impl<A> Clone for ManualScheduler<A> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            timers: Arc::clone(&self.timers),
        }
    }
}

impl<A> std::fmt::Debug for ManualScheduler<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.clock.now())
            .field("armed", &self.armed())
            .finish()
    }
}

impl<A> ManualScheduler<A> {
    /// Create a scheduler reading time from `clock`
    #[must_use]
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            timers: Arc::new(Mutex::new(Timers {
                armed: HashMap::new(),
                next_seq: 0,
            })),
        }
    }

    fn timers(&self) -> MutexGuard<'_, Timers<A>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The clock this scheduler moves
    #[must_use]
    pub const fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Ids of all armed timers, sorted
    #[must_use]
    pub fn armed(&self) -> Vec<EffectId> {
        let mut ids: Vec<EffectId> = self.timers().armed.keys().copied().collect();
        ids.sort();
        ids
    }

    /// When the next timer is due, if any
    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.timers().armed.values().map(|timer| timer.due).min()
    }

    fn insert(
        &self,
        id: EffectId,
        after: Duration,
        period: Option<Duration>,
        action: A,
        dispatch: Dispatch<A>,
    ) {
        let due = self.clock.now() + to_delta(after);
        let mut timers = self.timers();
        let seq = timers.next_seq;
        timers.next_seq += 1;
        timers.armed.insert(
            id,
            VirtualTimer {
                due,
                period,
                action,
                dispatch,
                seq,
            },
        );
    }
}

impl<A: Clone> ManualScheduler<A> {
    /// Fire the earliest timer due at or before `deadline`
    ///
    /// Moves the clock to the timer's due time, re-arms repeating timers one
    /// period later and forgets one-shot timers, then dispatches. Returns
    /// `false` when nothing is due.
    pub fn fire_next(&self, deadline: DateTime<Utc>) -> bool {
        let fired = {
            let mut timers = self.timers();
            let next = timers
                .armed
                .iter()
                .filter(|(_, timer)| timer.due <= deadline)
                .min_by_key(|(_, timer)| (timer.due, timer.seq))
                .map(|(id, _)| *id);

            let Some(id) = next else {
                return false;
            };

            let seq = timers.next_seq;
            timers.next_seq += 1;

            let fired = match timers.armed.get_mut(&id) {
                Some(timer) => match timer.period {
                    Some(period) => {
                        let due = timer.due;
                        timer.due = due + to_delta(period);
                        timer.seq = seq;
                        Some((due, timer.action.clone(), Arc::clone(&timer.dispatch)))
                    },
                    None => None,
                },
                None => return false,
            };

            match fired {
                Some(fired) => fired,
                None => match timers.armed.remove(&id) {
                    Some(timer) => (timer.due, timer.action, timer.dispatch),
                    None => return false,
                },
            }
        };

        let (due, action, dispatch) = fired;
        self.clock.set(due);
        dispatch(action);
        true
    }
}

impl<A: Send + 'static> Scheduler<A> for ManualScheduler<A> {
    fn schedule_repeating(&self, id: EffectId, every: Duration, action: A, dispatch: Dispatch<A>) {
        let every = every.max(Duration::from_millis(1));
        self.insert(id, every, Some(every), action, dispatch);
    }

    fn schedule_once(&self, id: EffectId, after: Duration, action: A, dispatch: Dispatch<A>) {
        self.insert(id, after, None, action, dispatch);
    }

    fn cancel(&self, id: EffectId) -> bool {
        self.timers().armed.remove(&id).is_some()
    }

    fn is_armed(&self, id: EffectId) -> bool {
        self.timers().armed.contains_key(&id)
    }

    fn cancel_all(&self) -> usize {
        let mut timers = self.timers();
        let count = timers.armed.len();
        timers.armed.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::epoch;
    use chrono::TimeDelta;

    const TICK: EffectId = EffectId::new("tick");
    const ONCE: EffectId = EffectId::new("once");

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>) -> Dispatch<&'static str> {
        let log = Arc::clone(log);
        Arc::new(move |action| {
            log.lock().unwrap_or_else(PoisonError::into_inner).push(action);
        })
    }

    #[test]
    fn fires_in_due_order_and_moves_the_clock() {
        let clock = ManualClock::default();
        let scheduler = ManualScheduler::new(clock.clone());
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.schedule_repeating(TICK, Duration::from_secs(15), "tick", recording(&log));
        scheduler.schedule_once(ONCE, Duration::from_secs(20), "once", recording(&log));

        let deadline = epoch() + TimeDelta::seconds(45);
        while scheduler.fire_next(deadline) {}

        let fired = log.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(fired, vec!["tick", "once", "tick", "tick"]);
        assert_eq!(clock.now(), epoch() + TimeDelta::seconds(45));
        assert_eq!(scheduler.armed(), vec![TICK]);
    }

    #[test]
    fn cancel_forgets_the_timer() {
        let scheduler = ManualScheduler::new(ManualClock::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.schedule_once(ONCE, Duration::from_secs(30), "once", recording(&log));
        assert!(scheduler.cancel(ONCE));
        assert!(!scheduler.cancel(ONCE));
        assert!(!scheduler.fire_next(epoch() + TimeDelta::minutes(5)));
        assert!(scheduler.next_due().is_none());
    }

    #[test]
    fn rescheduling_replaces_due_time() {
        let scheduler = ManualScheduler::new(ManualClock::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.schedule_once(ONCE, Duration::from_secs(10), "first", recording(&log));
        scheduler.schedule_once(ONCE, Duration::from_secs(40), "second", recording(&log));

        assert_eq!(scheduler.next_due(), Some(epoch() + TimeDelta::seconds(40)));
        assert_eq!(Scheduler::<&'static str>::cancel_all(&scheduler), 1);
    }
}
