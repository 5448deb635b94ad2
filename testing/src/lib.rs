//! # Pulse Testing
//!
//! Testing utilities and helpers for the Pulse adaptive-frequency core.
//!
//! This crate provides:
//! - Mock implementations of Environment traits (clocks, scheduler)
//! - [`TestStore`]: deterministic effect execution over simulated time
//! - [`ReducerTest`]: given/when/then reducer tests
//! - In-memory session store and change feed with failure injection
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use pulse_testing::{ManualClock, TestStore};
//! use std::time::Duration;
//!
//! #[tokio::test]
//! async fn wakes_up_when_a_visitor_arrives() {
//!     let clock = ManualClock::default();
//!     let mut store = TestStore::new(PresenceReducer, PresenceState::new("store-1"), env, clock);
//!
//!     store.send(PresenceAction::StartTracking).await;
//!     store.advance(Duration::from_secs(60)).await;
//!
//!     assert_eq!(store.state().phase, Phase::Active);
//! }
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use pulse_core::environment::Clock;

/// Simulated-time scheduler
pub mod scheduler;

/// Deterministic store for reducer + effect tests
pub mod test_store;

/// Reducer testing utilities
pub mod reducer_test;

/// In-memory remote store and change feed
pub mod session_mocks;

/// Mock implementations for testing.
pub mod mocks {
    use super::{to_delta, Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use pulse_testing::mocks::FixedClock;
    /// use pulse_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }

    /// The instant every test clock starts at (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Clock that only moves when told to
    ///
    /// Clones share the same time. [`ManualScheduler`](crate::scheduler::ManualScheduler)
    /// moves it forward as timers fire.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        now: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `start`
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Arc::new(Mutex::new(start)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
            *now += to_delta(by);
        }

        /// Jump to `time`; the clock never moves backwards
        pub fn set(&self, time: DateTime<Utc>) {
            let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
            if time > *now {
                *now = time;
            }
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(epoch())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber
    ///
    /// Honors `RUST_LOG`; safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Browser-ish user agent strings
    pub fn user_agent() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["Mozilla/5.0", "Safari", "Chrome", "curl"]),
            1u8..=130,
            "[a-z]{0,8}",
        )
            .prop_map(|(family, major, suffix)| format!("{family}/{major}.0 {suffix}"))
    }

    /// IPv4 addresses in dotted notation
    pub fn address() -> impl Strategy<Value = String> {
        any::<[u8; 4]>().prop_map(|[a, b, c, d]| format!("{a}.{b}.{c}.{d}"))
    }

    /// Sequences of distinct-visitor counts observed by consecutive checks
    pub fn visitor_counts() -> impl Strategy<Value = Vec<usize>> {
        prop::collection::vec(prop_oneof![3 => Just(0usize), 2 => 1usize..5], 1..24)
    }
}

/// Convert a std duration into a chrono delta, saturating on overflow
#[must_use]
pub fn to_delta(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

// Re-export commonly used items
pub use mocks::{epoch, test_clock, FixedClock, ManualClock};
pub use reducer_test::{assertions, ReducerTest};
pub use scheduler::ManualScheduler;
pub use session_mocks::{InMemoryChangeFeed, InMemorySessionStore};
pub use test_store::TestStore;
