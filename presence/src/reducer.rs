//! Presence reducer: the sleep/active polling state machine.
//!
//! A tracker sleeps until an activity check sees at least
//! `activation_threshold` distinct sessions, then swaps its single sleep
//! timer for the active set (re-check, cleanup, heartbeat) plus a realtime
//! subscription. A re-check that sees nobody arms a delayed deactivation
//! instead of going back to sleep at once; any later check that sees
//! somebody cancels it.
//!
//! Every timer swap happens inside one `reduce` call, between setting and
//! clearing [`Phase::Transitioning`]. The runtime reduces actions one at a
//! time, so no other action can observe the swap half done.

use crate::config::PresenceConfig;
use crate::session::VisitorStats;
use crate::types::{ids, CurrentVisitor, Phase, PresenceAction, PresenceState};
use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use pulse_core::change_feed::ChangeFeed;
use pulse_core::effect::Effect;
use pulse_core::environment::Clock;
use pulse_core::reducer::Reducer;
use pulse_core::session_store::{SessionQuery, SessionRecord, SessionStore};
use pulse_core::{smallvec, SmallVec};
use pulse_runtime::metrics::PresenceMetrics;
use std::sync::Arc;
use std::time::Duration;

type Effects = SmallVec<[Effect<PresenceAction>; 4]>;

/// Dependencies of a presence tracker
#[derive(Clone)]
pub struct PresenceEnvironment {
    /// Remote session table
    pub sessions: Arc<dyn SessionStore>,
    /// Realtime change notifications
    pub changes: Arc<dyn ChangeFeed>,
    /// Time source for windows and heartbeats
    pub clock: Arc<dyn Clock>,
    /// Cadences and thresholds
    pub config: PresenceConfig,
}

impl PresenceEnvironment {
    /// Create an environment with default configuration
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        changes: Arc<dyn ChangeFeed>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            changes,
            clock,
            config: PresenceConfig::default(),
        }
    }

    /// Replace the configuration
    #[must_use]
    pub const fn with_config(mut self, config: PresenceConfig) -> Self {
        self.config = config;
        self
    }

    /// Start of the active window relative to now
    fn window_start(&self) -> DateTime<Utc> {
        subtract(self.clock.now(), self.config.active_window)
    }
}

/// Drop rows that went quiet before `cutoff`
fn retain_active(visitors: &mut Vec<SessionRecord>, cutoff: DateTime<Utc>) {
    visitors.retain(|row| row.last_activity >= cutoff);
}

fn subtract(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Reducer for one store's presence tracking
#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceReducer;

impl PresenceReducer {
    /// Creates a new presence reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn sleep_check(env: &PresenceEnvironment) -> Effect<PresenceAction> {
        Effect::every(ids::SLEEP_CHECK, env.config.sleep_interval, PresenceAction::CheckActivity)
    }

    fn fetch_effect(state: &PresenceState, env: &PresenceEnvironment) -> Effect<PresenceAction> {
        let sessions = Arc::clone(&env.sessions);
        let clock = Arc::clone(&env.clock);
        let window = env.config.active_window;
        let query = SessionQuery::new(state.store_id.clone(), env.window_start())
            .with_limit(env.config.fetch_limit);

        Effect::Future(Box::pin(async move {
            match sessions.select_sessions(query).await {
                Ok(mut visitors) => {
                    // Backends may ignore the cutoff or answer late
                    retain_active(&mut visitors, subtract(clock.now(), window));
                    Some(PresenceAction::ActiveVisitorsLoaded { visitors })
                },
                Err(error) => {
                    tracing::warn!(%error, "Activity check failed");
                    PresenceMetrics::record_remote_failure("select");
                    Some(PresenceAction::ActivityCheckFailed {
                        reason: error.to_string(),
                    })
                },
            }
        }))
    }

    fn cleanup_effect(state: &PresenceState, env: &PresenceEnvironment) -> Effect<PresenceAction> {
        let sessions = Arc::clone(&env.sessions);
        let store_id = state.store_id.clone();
        let cutoff = env.window_start();

        Effect::Future(Box::pin(async move {
            match sessions.delete_sessions(&store_id, cutoff).await {
                Ok(count) => Some(PresenceAction::ExpiredSessionsRemoved { count }),
                Err(error) => {
                    tracing::warn!(%error, %store_id, "Session cleanup failed");
                    PresenceMetrics::record_remote_failure("delete");
                    Some(PresenceAction::CleanupFailed {
                        reason: error.to_string(),
                    })
                },
            }
        }))
    }

    fn upsert_effect(record: SessionRecord, env: &PresenceEnvironment) -> Effect<PresenceAction> {
        let sessions = Arc::clone(&env.sessions);

        Effect::Future(Box::pin(async move {
            let session_id = record.session_id.clone();
            if let Err(error) = sessions.upsert_session(record).await {
                tracing::warn!(%error, %session_id, "Session upsert failed");
                PresenceMetrics::record_remote_failure("upsert");
            }
            None
        }))
    }

    fn subscription_effect(
        state: &PresenceState,
        env: &PresenceEnvironment,
    ) -> Effect<PresenceAction> {
        let feed = Arc::clone(&env.changes);
        let store_id = state.store_id.clone();

        Effect::Stream(Box::pin(async_stream::stream! {
            match feed.subscribe(&store_id).await {
                Ok(mut changes) => {
                    while let Some(change) = changes.next().await {
                        yield PresenceAction::SessionsChanged { kind: change.kind };
                    }
                    tracing::debug!(%store_id, "Change feed closed");
                },
                Err(error) => {
                    PresenceMetrics::record_remote_failure("subscribe");
                    yield PresenceAction::SubscriptionFailed { reason: error.to_string() };
                },
            }
        }))
        .cancellable(ids::CHANGE_SUBSCRIPTION)
    }

    fn activate(state: &mut PresenceState, env: &PresenceEnvironment) -> Effects {
        state.phase = Phase::Transitioning;
        state.pending_deactivation = None;

        let config = &env.config;
        let effects = smallvec![
            Effect::Cancel(ids::SLEEP_CHECK),
            Effect::Cancel(ids::DEACTIVATION),
            Effect::merge(vec![
                Effect::every(
                    ids::ACTIVE_RECHECK,
                    config.active_recheck_interval,
                    PresenceAction::CheckActivity,
                ),
                Effect::every(ids::CLEANUP, config.cleanup_interval, PresenceAction::CleanupTick),
                Effect::every(ids::HEARTBEAT, config.heartbeat_interval, PresenceAction::Heartbeat),
            ]),
            Self::subscription_effect(state, env),
        ];

        state.phase = Phase::Active;
        tracing::info!(
            store_id = %state.store_id,
            visitors = state.stats.total_visitors,
            "Presence tracker active"
        );
        PresenceMetrics::record_transition(Phase::Active.as_str());
        effects
    }

    fn deactivate(state: &mut PresenceState, env: &PresenceEnvironment) -> Effects {
        state.phase = Phase::Transitioning;
        state.pending_deactivation = None;

        let mut effects: Effects = ids::ACTIVE_TIMERS.iter().copied().map(Effect::Cancel).collect();
        effects.push(Effect::Cancel(ids::CHANGE_SUBSCRIPTION));
        effects.push(Effect::Cancel(ids::DEACTIVATION));
        effects.push(Self::sleep_check(env));

        state.phase = Phase::Sleep;
        tracing::info!(store_id = %state.store_id, "Presence tracker sleeping");
        PresenceMetrics::record_transition(Phase::Sleep.as_str());
        effects
    }

    /// Decide what a fresh visitor count means for the current phase
    fn on_visitors(
        state: &mut PresenceState,
        mut visitors: Vec<SessionRecord>,
        env: &PresenceEnvironment,
    ) -> Effects {
        // Rows may have gone stale while the action was queued
        retain_active(&mut visitors, env.window_start());

        state.stats = VisitorStats::from_records(&visitors);
        state.visitors = visitors;
        state.consecutive_failures = 0;
        PresenceMetrics::record_active_visitors(state.stats.total_visitors);

        if !state.running {
            return smallvec![];
        }

        let count = state.stats.total_visitors;
        match state.phase {
            Phase::Sleep if count >= env.config.activation_threshold => Self::activate(state, env),
            Phase::Active if count > 0 => match state.pending_deactivation.take() {
                Some(generation) => {
                    tracing::debug!(generation, count, "Visitors returned, deactivation cancelled");
                    smallvec![Effect::Cancel(ids::DEACTIVATION)]
                },
                None => smallvec![],
            },
            Phase::Active if state.pending_deactivation.is_none() => {
                state.deactivation_generation += 1;
                let generation = state.deactivation_generation;
                state.pending_deactivation = Some(generation);
                tracing::debug!(generation, "No visitors, deactivation scheduled");
                smallvec![Effect::after(
                    ids::DEACTIVATION,
                    env.config.deactivation_delay,
                    PresenceAction::DeactivationDue { generation },
                )]
            },
            _ => smallvec![],
        }
    }
}

impl Reducer for PresenceReducer {
    type State = PresenceState;
    type Action = PresenceAction;
    type Environment = PresenceEnvironment;

    #[allow(clippy::too_many_lines)]
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Commands ==========
            PresenceAction::StartTracking => {
                if state.running {
                    return smallvec![];
                }
                state.running = true;
                state.phase = Phase::Sleep;
                state.last_checked = Some(env.clock.now());
                tracing::info!(store_id = %state.store_id, "Presence tracking started");

                smallvec![
                    Self::sleep_check(env),
                    Self::fetch_effect(state, env),
                ]
            },

            PresenceAction::StopTracking => {
                if !state.running {
                    return smallvec![];
                }
                let current_visitor = state.current_visitor.take();
                *state = PresenceState {
                    current_visitor,
                    ..PresenceState::new(std::mem::take(&mut state.store_id))
                };
                tracing::info!(store_id = %state.store_id, "Presence tracking stopped");

                ids::ALL.iter().copied().map(Effect::Cancel).collect()
            },

            PresenceAction::TrackVisitor {
                session_id,
                user_agent,
                address,
            } => {
                state.current_visitor = Some(CurrentVisitor {
                    session_id: session_id.clone(),
                    user_agent: user_agent.clone(),
                    address: address.clone(),
                });
                state.interacted = false;

                let record = SessionRecord {
                    session_id,
                    store_id: state.store_id.clone(),
                    user_agent,
                    address,
                    last_activity: env.clock.now(),
                };
                smallvec![Self::upsert_effect(record, env)]
            },

            PresenceAction::UserInteraction => {
                state.interacted = true;
                smallvec![]
            },

            PresenceAction::FetchActiveVisitors => smallvec![Self::fetch_effect(state, env)],

            PresenceAction::CleanupExpired => smallvec![Self::cleanup_effect(state, env)],

            // ========== Timers ==========
            PresenceAction::CheckActivity => {
                if !state.running {
                    return smallvec![];
                }
                state.last_checked = Some(env.clock.now());
                smallvec![Self::fetch_effect(state, env)]
            },

            PresenceAction::CleanupTick => {
                if !state.running || state.phase != Phase::Active {
                    return smallvec![];
                }
                smallvec![Self::cleanup_effect(state, env)]
            },

            PresenceAction::Heartbeat => {
                if !state.running || state.phase != Phase::Active || !state.interacted {
                    return smallvec![];
                }
                let Some(visitor) = state.current_visitor.clone() else {
                    return smallvec![];
                };
                state.interacted = false;

                let record = SessionRecord {
                    session_id: visitor.session_id,
                    store_id: state.store_id.clone(),
                    user_agent: visitor.user_agent,
                    address: visitor.address,
                    last_activity: env.clock.now(),
                };
                smallvec![Self::upsert_effect(record, env)]
            },

            PresenceAction::DeactivationDue { generation } => {
                let due = state.running
                    && state.phase == Phase::Active
                    && state.pending_deactivation == Some(generation);
                if due {
                    Self::deactivate(state, env)
                } else {
                    tracing::debug!(
                        generation,
                        pending = ?state.pending_deactivation,
                        "Stale deactivation ignored"
                    );
                    smallvec![]
                }
            },

            // ========== Effect results ==========
            PresenceAction::SessionsChanged { kind } => {
                if !state.running || state.phase != Phase::Active {
                    return smallvec![];
                }
                tracing::debug!(?kind, "Session table changed, re-checking");
                state.last_checked = Some(env.clock.now());
                smallvec![Self::fetch_effect(state, env)]
            },

            PresenceAction::ActiveVisitorsLoaded { visitors } => {
                Self::on_visitors(state, visitors, env)
            },

            PresenceAction::ActivityCheckFailed { reason } => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                tracing::debug!(
                    %reason,
                    failures = state.consecutive_failures,
                    "Skipping transition decision"
                );
                smallvec![]
            },

            PresenceAction::ExpiredSessionsRemoved { count } => {
                tracing::debug!(count, "Expired sessions removed");
                PresenceMetrics::record_sessions_removed(count);
                smallvec![]
            },

            PresenceAction::CleanupFailed { reason } => {
                tracing::debug!(%reason, "Cleanup skipped");
                smallvec![]
            },

            PresenceAction::SubscriptionFailed { reason } => {
                tracing::warn!(
                    %reason,
                    store_id = %state.store_id,
                    "Change subscription failed, relying on re-checks"
                );
                smallvec![]
            },
        }
    }
}
