//! `PresenceTracker`: async facade over a presence [`Store`].

use crate::reducer::{PresenceEnvironment, PresenceReducer};
use crate::session::{generate_session_id, ActiveVisitors, VisitorStats};
use crate::types::{Phase, PresenceAction, PresenceState};
use pulse_core::session_store::SessionRecord;
use pulse_runtime::{Store, StoreError};
use std::time::Duration;

type PresenceStore = Store<PresenceState, PresenceAction, PresenceEnvironment, PresenceReducer>;

/// How long facade calls wait for a remote round trip
const ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(10);

/// Presence tracker for one store.
///
/// Cloning is cheap; clones drive the same tracker.
///
/// # Example
///
/// ```ignore
/// let tracker = PresenceTracker::new("store-1", environment);
/// tracker.start().await?;
///
/// let session_id = tracker.track("Mozilla/5.0", "10.0.0.1").await;
/// tracker.record_interaction().await;
///
/// let active = tracker.fetch_active_visitors().await;
/// println!("{} visitors online", active.stats.total_visitors);
/// ```
#[derive(Clone)]
pub struct PresenceTracker {
    store: PresenceStore,
}

impl PresenceTracker {
    /// Create a stopped tracker for `store_id`
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(store_id: impl Into<String>, environment: PresenceEnvironment) -> Self {
        Self {
            store: Store::new(PresenceState::new(store_id), PresenceReducer::new(), environment),
        }
    }

    /// Begin sleeping-phase polling
    ///
    /// Returns once the initial activity check has been applied, so a
    /// visitor already online has activated the tracker.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> Result<(), StoreError> {
        let mut handle = self.store.send(PresenceAction::StartTracking).await?;
        handle.wait().await;
        Ok(())
    }

    /// Cancel every timer and close the subscription
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`shutdown`](Self::shutdown).
    pub async fn stop(&self) -> Result<(), StoreError> {
        self.store.send(PresenceAction::StopTracking).await.map(drop)
    }

    /// Upsert a visitor's session row and wait for the write
    ///
    /// Never fails: remote errors are logged and counted.
    pub async fn track_visitor(
        &self,
        session_id: impl Into<String>,
        user_agent: impl Into<String>,
        address: impl Into<String>,
    ) {
        let action = PresenceAction::TrackVisitor {
            session_id: session_id.into(),
            user_agent: user_agent.into(),
            address: address.into(),
        };
        match self.store.send(action).await {
            Ok(mut handle) => handle.wait().await,
            Err(error) => tracing::warn!(%error, "Visitor not tracked"),
        }
    }

    /// Fingerprint the visitor, track it and return its session id
    pub async fn track(&self, user_agent: &str, address: &str) -> String {
        let session_id = generate_session_id(user_agent, address);
        self.track_visitor(session_id.clone(), user_agent, address).await;
        session_id
    }

    /// Report user activity for the next heartbeat
    pub async fn record_interaction(&self) {
        let _ = self.store.send(PresenceAction::UserInteraction).await;
    }

    /// Fetch sessions active inside the window
    ///
    /// The result drives phase transitions like any scheduled check. If the
    /// store cannot be reached the last known snapshot is returned.
    pub async fn fetch_active_visitors(&self) -> ActiveVisitors {
        let result = self
            .store
            .send_and_wait_for(
                PresenceAction::FetchActiveVisitors,
                |action| {
                    matches!(
                        action,
                        PresenceAction::ActiveVisitorsLoaded { .. }
                            | PresenceAction::ActivityCheckFailed { .. }
                    )
                },
                ROUND_TRIP_TIMEOUT,
            )
            .await;

        match result {
            Ok(PresenceAction::ActiveVisitorsLoaded { visitors }) => {
                ActiveVisitors::from_records(visitors)
            },
            Ok(_) => self.store.state(PresenceState::active_visitors).await,
            Err(error) => {
                tracing::warn!(%error, "Active visitors unavailable, returning last snapshot");
                self.store.state(PresenceState::active_visitors).await
            },
        }
    }

    /// Delete rows that went quiet before the window; returns rows removed
    pub async fn cleanup_expired_sessions(&self) -> u64 {
        let result = self
            .store
            .send_and_wait_for(
                PresenceAction::CleanupExpired,
                |action| {
                    matches!(
                        action,
                        PresenceAction::ExpiredSessionsRemoved { .. }
                            | PresenceAction::CleanupFailed { .. }
                    )
                },
                ROUND_TRIP_TIMEOUT,
            )
            .await;

        match result {
            Ok(PresenceAction::ExpiredSessionsRemoved { count }) => count,
            Ok(_) => 0,
            Err(error) => {
                tracing::warn!(%error, "Cleanup result unavailable");
                0
            },
        }
    }

    /// Current phase
    pub async fn phase(&self) -> Phase {
        self.store.state(|s| s.phase).await
    }

    /// Whether tracking is started
    pub async fn is_running(&self) -> bool {
        self.store.state(|s| s.running).await
    }

    /// Rows seen by the last successful check
    pub async fn active_visitors(&self) -> Vec<SessionRecord> {
        self.store.state(|s| s.visitors.clone()).await
    }

    /// Counts of the last successful check
    pub async fn stats(&self) -> VisitorStats {
        self.store.state(|s| s.stats).await
    }

    /// Stop tracking and shut the underlying store down
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if in-flight remote calls do not
    /// finish within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        let _ = self.stop().await;
        self.store.shutdown(timeout).await
    }
}
