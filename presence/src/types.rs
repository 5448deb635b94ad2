//! Presence tracker state, actions and timer ids.

use crate::session::{ActiveVisitors, VisitorStats};
use chrono::{DateTime, Utc};
use pulse_core::change_feed::ChangeKind;
use pulse_core::session_store::SessionRecord;
use serde::Serialize;
use std::fmt;

/// Ids of the timers and effects a tracker owns
pub mod ids {
    use pulse_core::effect::EffectId;

    /// Sleeping poll
    pub const SLEEP_CHECK: EffectId = EffectId::new("presence.sleep_check");
    /// Active re-check
    pub const ACTIVE_RECHECK: EffectId = EffectId::new("presence.active_recheck");
    /// Active stale-row cleanup
    pub const CLEANUP: EffectId = EffectId::new("presence.cleanup");
    /// Active heartbeat
    pub const HEARTBEAT: EffectId = EffectId::new("presence.heartbeat");
    /// Delayed deactivation
    pub const DEACTIVATION: EffectId = EffectId::new("presence.deactivation");
    /// Realtime change subscription
    pub const CHANGE_SUBSCRIPTION: EffectId = EffectId::new("presence.change_subscription");

    /// Timers armed only while active
    pub const ACTIVE_TIMERS: [EffectId; 3] = [ACTIVE_RECHECK, CLEANUP, HEARTBEAT];

    /// Everything a stopped tracker must not leave behind
    pub const ALL: [EffectId; 6] = [
        SLEEP_CHECK,
        ACTIVE_RECHECK,
        CLEANUP,
        HEARTBEAT,
        DEACTIVATION,
        CHANGE_SUBSCRIPTION,
    ];
}

/// Polling phase of a tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Slow polling, nobody around
    #[default]
    Sleep,
    /// Fast polling with realtime updates
    Active,
    /// Swapping timers; never observable between actions
    Transitioning,
}

impl Phase {
    /// Lowercase name, used in logs and metric labels
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Active => "active",
            Self::Transitioning => "transitioning",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The visitor this tracker reports heartbeats for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentVisitor {
    /// Session row key
    pub session_id: String,
    /// User agent sent with every upsert
    pub user_agent: String,
    /// Network address sent with every upsert
    pub address: String,
}

/// Tracking state of one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceState {
    /// Store being watched
    pub store_id: String,
    /// Current polling phase
    pub phase: Phase,
    /// Whether tracking has been started
    pub running: bool,
    /// Rows seen by the last successful check
    pub visitors: Vec<SessionRecord>,
    /// Counts over `visitors`
    pub stats: VisitorStats,
    /// Visitor registered through `TrackVisitor`
    pub current_visitor: Option<CurrentVisitor>,
    /// Interaction reported since the last heartbeat
    pub interacted: bool,
    /// Generation of the armed deactivation, if any
    pub pending_deactivation: Option<u64>,
    /// Last generation handed out
    pub deactivation_generation: u64,
    /// When the last check was started
    pub last_checked: Option<DateTime<Utc>>,
    /// Checks failed in a row
    pub consecutive_failures: u32,
}

impl PresenceState {
    /// Fresh, stopped state for `store_id`
    #[must_use]
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            phase: Phase::Sleep,
            running: false,
            visitors: Vec::new(),
            stats: VisitorStats::default(),
            current_visitor: None,
            interacted: false,
            pending_deactivation: None,
            deactivation_generation: 0,
            last_checked: None,
            consecutive_failures: 0,
        }
    }

    /// Snapshot of the last successful check
    #[must_use]
    pub fn active_visitors(&self) -> ActiveVisitors {
        ActiveVisitors {
            visitors: self.visitors.clone(),
            stats: self.stats,
        }
    }
}

/// Everything that can happen to a tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceAction {
    // ========== Commands ==========
    /// Begin sleeping-phase polling
    StartTracking,
    /// Cancel every timer and the subscription
    StopTracking,
    /// Upsert the visitor's session row and remember it for heartbeats
    TrackVisitor {
        /// Session row key
        session_id: String,
        /// Visitor user agent
        user_agent: String,
        /// Visitor network address
        address: String,
    },
    /// The visitor did something since the last heartbeat
    UserInteraction,
    /// Fetch active sessions regardless of phase
    FetchActiveVisitors,
    /// Delete stale rows now, regardless of phase
    CleanupExpired,

    // ========== Timers ==========
    /// Periodic check (sleep poll and active re-check)
    CheckActivity,
    /// Periodic cleanup, ignored unless active
    CleanupTick,
    /// Periodic heartbeat, ignored unless active
    Heartbeat,
    /// Delayed deactivation armed with this generation
    DeactivationDue {
        /// Generation the timer was armed with
        generation: u64,
    },

    // ========== Effect results ==========
    /// The session table changed
    SessionsChanged {
        /// What changed
        kind: ChangeKind,
    },
    /// Active sessions fetched
    ActiveVisitorsLoaded {
        /// Rows returned by the store
        visitors: Vec<SessionRecord>,
    },
    /// Fetching active sessions failed
    ActivityCheckFailed {
        /// Error text
        reason: String,
    },
    /// Stale rows deleted
    ExpiredSessionsRemoved {
        /// Rows removed
        count: u64,
    },
    /// Deleting stale rows failed
    CleanupFailed {
        /// Error text
        reason: String,
    },
    /// The change subscription could not be opened
    SubscriptionFailed {
        /// Error text
        reason: String,
    },
}
