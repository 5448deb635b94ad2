//! `PresenceTracker` against the tokio runtime.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use chrono::{TimeDelta, Utc};
use pulse_core::environment::SystemClock;
use pulse_core::session_store::SessionRecord;
use pulse_presence::{Phase, PresenceConfig, PresenceEnvironment, PresenceTracker};
use pulse_testing::{helpers, InMemoryChangeFeed, InMemorySessionStore};
use std::sync::Arc;
use std::time::Duration;

fn tracker(config: PresenceConfig) -> (PresenceTracker, InMemorySessionStore, InMemoryChangeFeed) {
    helpers::init_tracing();
    let feed = InMemoryChangeFeed::new();
    let sessions = InMemorySessionStore::new().with_change_feed(feed.clone());
    let env = PresenceEnvironment::new(
        Arc::new(sessions.clone()),
        Arc::new(feed.clone()),
        Arc::new(SystemClock),
    )
    .with_config(config);
    (PresenceTracker::new("store-1", env), sessions, feed)
}

async fn wait_for_phase(tracker: &PresenceTracker, phase: Phase) -> bool {
    for _ in 0..100 {
        if tracker.phase().await == phase {
            return true;
        }
        tokio::task::yield_now().await;
    }
    false
}

#[tokio::test]
async fn tracked_visitor_is_fetched() {
    let (tracker, sessions, _feed) = tracker(PresenceConfig::default());

    let session_id = tracker.track("Mozilla/5.0", "10.0.0.1").await;
    assert!(sessions.get("store-1", &session_id).is_some());

    let active = tracker.fetch_active_visitors().await;
    assert_eq!(active.stats.total_visitors, 1);
    assert_eq!(active.visitors[0].session_id, session_id);
}

#[tokio::test]
async fn start_with_a_visitor_online_activates() {
    let (tracker, _sessions, feed) = tracker(PresenceConfig::default());
    tracker.track("Mozilla/5.0", "10.0.0.1").await;

    tracker.start().await.unwrap();
    assert!(tracker.is_running().await);
    assert!(wait_for_phase(&tracker, Phase::Active).await);

    for _ in 0..100 {
        if feed.subscriber_count() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(feed.subscriber_count(), 1);

    tracker.stop().await.unwrap();
    assert_eq!(tracker.phase().await, Phase::Sleep);
    assert!(!tracker.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn goes_back_to_sleep_when_everyone_leaves() {
    let config = PresenceConfig::default();
    let (tracker, sessions, _feed) = tracker(config);
    tracker.track("Mozilla/5.0", "10.0.0.1").await;
    tracker.start().await.unwrap();
    assert!(wait_for_phase(&tracker, Phase::Active).await);

    sessions.clear();
    tokio::time::sleep(Duration::from_secs(50)).await;
    assert!(wait_for_phase(&tracker, Phase::Sleep).await);

    tracker.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn remote_failures_never_reach_the_caller() {
    let (tracker, sessions, _feed) = tracker(PresenceConfig::default());
    sessions.fail_upserts(true);
    sessions.fail_selects(true);
    sessions.fail_deletes(true);

    tracker.track("Mozilla/5.0", "10.0.0.1").await;
    let active = tracker.fetch_active_visitors().await;
    assert!(active.visitors.is_empty());
    assert_eq!(tracker.cleanup_expired_sessions().await, 0);
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn shutdown_rejects_further_commands() {
    let (tracker, _sessions, _feed) = tracker(PresenceConfig::default());
    tracker.start().await.unwrap();
    tracker.shutdown(Duration::from_secs(1)).await.unwrap();

    assert!(tracker.start().await.is_err());
}

#[tokio::test]
async fn fetched_visitors_exclude_rows_outside_the_window() {
    let (tracker, sessions, _feed) = tracker(PresenceConfig::default());
    let fresh = tracker.track("Mozilla/5.0", "10.0.0.1").await;
    sessions.insert(SessionRecord {
        session_id: "session_stale".to_string(),
        store_id: "store-1".to_string(),
        user_agent: "curl/8.0".to_string(),
        address: "10.0.0.2".to_string(),
        last_activity: Utc::now() - TimeDelta::minutes(10),
    });
    sessions.ignore_window(true);

    let active = tracker.fetch_active_visitors().await;
    assert_eq!(active.stats.total_visitors, 1);
    assert_eq!(active.visitors[0].session_id, fresh);

    for _ in 0..100 {
        if tracker.stats().await.total_visitors == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(tracker.stats().await, active.stats);
}
