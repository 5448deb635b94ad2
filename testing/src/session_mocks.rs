//! In-memory remote store testing utilities
//!
//! Provides fast, deterministic stand-ins for the remote session table:
//! - [`InMemorySessionStore`]: `HashMap`-backed session rows with failure injection
//! - [`InMemoryChangeFeed`]: broadcast-channel backed change notifications
//!
//! Attach a feed to a store with [`InMemorySessionStore::with_change_feed`] and
//! every write publishes a notification, the way the real table does.

use chrono::{DateTime, Utc};
use pulse_core::change_feed::{ChangeFeed, ChangeKind, ChangeStream, SessionChange};
use pulse_core::session_store::{
    RemoteFuture, RemoteStoreError, SessionQuery, SessionRecord, SessionStore,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Which operations should fail
#[derive(Clone, Copy, Debug, Default)]
struct Failures {
    upserts: bool,
    selects: bool,
    deletes: bool,
    ignore_window: bool,
}

/// Per-operation call counters
#[derive(Debug, Default)]
struct Calls {
    upserts: AtomicUsize,
    selects: AtomicUsize,
    deletes: AtomicUsize,
}

/// In-memory session table for fast, deterministic testing.
///
/// Rows are keyed by `(store_id, session_id)`. Clones share the same rows,
/// counters and failure switches.
///
/// # Example
///
/// ```
/// use pulse_testing::InMemorySessionStore;
/// use pulse_core::session_store::{SessionQuery, SessionRecord, SessionStore};
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemorySessionStore::new();
/// store.upsert_session(SessionRecord {
///     session_id: "session_a".into(),
///     store_id: "store-1".into(),
///     user_agent: "Mozilla/5.0".into(),
///     address: "10.0.0.1".into(),
///     last_activity: Utc::now(),
/// }).await?;
///
/// let since = Utc::now() - chrono::Duration::minutes(2);
/// let rows = store.select_sessions(SessionQuery::new("store-1", since)).await?;
/// assert_eq!(rows.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySessionStore {
    rows: Arc<RwLock<HashMap<(String, String), SessionRecord>>>,
    failures: Arc<RwLock<Failures>>,
    calls: Arc<Calls>,
    feed: Option<InMemoryChangeFeed>,
}

impl InMemorySessionStore {
    /// Create a new empty session store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every write to `feed`
    #[must_use]
    pub fn with_change_feed(mut self, feed: InMemoryChangeFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Seed a row directly, bypassing failure injection and the feed
    pub fn insert(&self, record: SessionRecord) {
        let key = (record.store_id.clone(), record.session_id.clone());
        self.rows.write().unwrap_or_else(PoisonError::into_inner).insert(key, record);
    }

    /// Look up a single row
    #[must_use]
    pub fn get(&self, store_id: &str, session_id: &str) -> Option<SessionRecord> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(store_id.to_string(), session_id.to_string()))
            .cloned()
    }

    /// Every row of `store_id`, in no particular order
    #[must_use]
    pub fn rows_for(&self, store_id: &str) -> Vec<SessionRecord> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|row| row.store_id == store_id)
            .cloned()
            .collect()
    }

    /// Number of stored rows across all stores
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Remove every row (for test isolation)
    pub fn clear(&self) {
        self.rows.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Make upserts fail (or succeed again)
    pub fn fail_upserts(&self, fail: bool) {
        self.failures.write().unwrap_or_else(PoisonError::into_inner).upserts = fail;
    }

    /// Make selects fail (or succeed again)
    pub fn fail_selects(&self, fail: bool) {
        self.failures.write().unwrap_or_else(PoisonError::into_inner).selects = fail;
    }

    /// Make deletes fail (or succeed again)
    pub fn fail_deletes(&self, fail: bool) {
        self.failures.write().unwrap_or_else(PoisonError::into_inner).deletes = fail;
    }

    /// Return rows outside `active_since` as well, like a lagging replica
    pub fn ignore_window(&self, ignore: bool) {
        self.failures.write().unwrap_or_else(PoisonError::into_inner).ignore_window = ignore;
    }

    /// Number of `upsert_session` calls, failed ones included
    #[must_use]
    pub fn upsert_calls(&self) -> usize {
        self.calls.upserts.load(Ordering::SeqCst)
    }

    /// Number of `select_sessions` calls, failed ones included
    #[must_use]
    pub fn select_calls(&self) -> usize {
        self.calls.selects.load(Ordering::SeqCst)
    }

    /// Number of `delete_sessions` calls, failed ones included
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.calls.deletes.load(Ordering::SeqCst)
    }

    fn publish(&self, kind: ChangeKind, store_id: &str, session_id: Option<String>) {
        if let Some(feed) = &self.feed {
            feed.publish(SessionChange::new(kind, store_id, session_id));
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn upsert_session(&self, record: SessionRecord) -> RemoteFuture<'_, ()> {
        Box::pin(async move {
            self.calls.upserts.fetch_add(1, Ordering::SeqCst);
            if self.failures.read().unwrap_or_else(PoisonError::into_inner).upserts {
                return Err(RemoteStoreError::operation("upsert", "injected failure"));
            }

            let key = (record.store_id.clone(), record.session_id.clone());
            let store_id = record.store_id.clone();
            let session_id = record.session_id.clone();
            let existed = self
                .rows
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, record)
                .is_some();

            let kind = if existed { ChangeKind::Update } else { ChangeKind::Insert };
            self.publish(kind, &store_id, Some(session_id));
            Ok(())
        })
    }

    fn select_sessions(&self, query: SessionQuery) -> RemoteFuture<'_, Vec<SessionRecord>> {
        Box::pin(async move {
            self.calls.selects.fetch_add(1, Ordering::SeqCst);
            let failures = *self.failures.read().unwrap_or_else(PoisonError::into_inner);
            if failures.selects {
                return Err(RemoteStoreError::operation("select", "injected failure"));
            }

            let mut rows: Vec<SessionRecord> = self
                .rows
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .filter(|row| row.store_id == query.store_id)
                .filter(|row| failures.ignore_window || row.last_activity >= query.active_since)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
            if let Some(limit) = query.limit {
                rows.truncate(limit);
            }
            Ok(rows)
        })
    }

    fn delete_sessions(
        &self,
        store_id: &str,
        inactive_before: DateTime<Utc>,
    ) -> RemoteFuture<'_, u64> {
        let store_id = store_id.to_string();
        Box::pin(async move {
            self.calls.deletes.fetch_add(1, Ordering::SeqCst);
            if self.failures.read().unwrap_or_else(PoisonError::into_inner).deletes {
                return Err(RemoteStoreError::operation("delete", "injected failure"));
            }

            let removed = {
                let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
                let before = rows.len();
                rows.retain(|_, row| {
                    !(row.store_id == store_id && row.last_activity < inactive_before)
                });
                before - rows.len()
            };

            if removed > 0 {
                self.publish(ChangeKind::Delete, &store_id, None);
            }
            Ok(removed as u64)
        })
    }
}

/// In-memory change feed backed by a tokio broadcast channel.
///
/// Subscribers only see changes of the store they subscribed to. Dropping a
/// subscription stream drops its receiver, which
/// [`subscriber_count`](Self::subscriber_count) reflects immediately.
#[derive(Clone, Debug)]
pub struct InMemoryChangeFeed {
    sender: broadcast::Sender<SessionChange>,
    fail: Arc<AtomicBool>,
}

impl InMemoryChangeFeed {
    /// Create a feed with room for 256 undelivered changes per subscriber
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            sender,
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Push a change to every subscriber; returns how many received it
    pub fn publish(&self, change: SessionChange) -> usize {
        self.sender.send(change).unwrap_or(0)
    }

    /// Number of open subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Make new subscriptions fail (or succeed again)
    pub fn fail_subscriptions(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for InMemoryChangeFeed {
    fn subscribe(
        &self,
        store_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeStream, RemoteStoreError>> + Send + '_>> {
        let store_id = store_id.to_string();
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(RemoteStoreError::SubscriptionFailed {
                    store_id,
                    reason: "injected failure".to_string(),
                });
            }

            let mut receiver = self.sender.subscribe();
            let changes = async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(change) if change.store_id == store_id => yield change,
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Change subscriber lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };
            Ok(Box::pin(changes) as ChangeStream)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests can unwrap

    use super::*;
    use crate::mocks::epoch;
    use chrono::TimeDelta;
    use futures::{FutureExt, StreamExt};

    fn record(session: &str, store: &str, seconds_ago: i64) -> SessionRecord {
        SessionRecord {
            session_id: session.to_string(),
            store_id: store.to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            address: "10.0.0.1".to_string(),
            last_activity: epoch() - TimeDelta::seconds(seconds_ago),
        }
    }

    #[tokio::test]
    async fn select_filters_orders_and_limits() {
        let store = InMemorySessionStore::new();
        store.insert(record("old", "s1", 600));
        store.insert(record("a", "s1", 30));
        store.insert(record("b", "s1", 10));
        store.insert(record("other", "s2", 5));

        let query = SessionQuery::new("s1", epoch() - TimeDelta::minutes(2));
        let rows = store.select_sessions(query.clone()).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let limited = store.select_sessions(query.with_limit(Some(1))).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(store.select_calls(), 2);
    }

    #[tokio::test]
    async fn upsert_overwrites_on_natural_key() {
        let store = InMemorySessionStore::new();
        store.upsert_session(record("a", "s1", 60)).await.unwrap();
        store.upsert_session(record("a", "s1", 0)).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("s1", "a").map(|r| r.last_activity), Some(epoch()));
    }

    #[tokio::test]
    async fn delete_only_touches_stale_rows_of_one_store() {
        let store = InMemorySessionStore::new();
        store.insert(record("stale", "s1", 300));
        store.insert(record("fresh", "s1", 10));
        store.insert(record("stale", "s2", 300));

        let removed = store.delete_sessions("s1", epoch() - TimeDelta::minutes(2)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_reported() {
        let store = InMemorySessionStore::new();
        store.fail_selects(true);
        let result = store.select_sessions(SessionQuery::new("s1", epoch())).await;
        assert!(matches!(result, Err(RemoteStoreError::OperationFailed { .. })));

        store.fail_selects(false);
        assert!(store.select_sessions(SessionQuery::new("s1", epoch())).await.is_ok());
    }

    #[tokio::test]
    async fn feed_delivers_only_matching_store_and_unsubscribes_on_drop() {
        let feed = InMemoryChangeFeed::new();
        let store = InMemorySessionStore::new().with_change_feed(feed.clone());

        let mut changes = feed.subscribe("s1").await.unwrap();
        assert_eq!(feed.subscriber_count(), 1);

        store.upsert_session(record("x", "s2", 0)).await.unwrap();
        store.upsert_session(record("a", "s1", 0)).await.unwrap();

        let change = changes.next().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.session_id.as_deref(), Some("a"));
        assert!(changes.next().now_or_never().is_none());

        drop(changes);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn failing_subscription() {
        let feed = InMemoryChangeFeed::new();
        feed.fail_subscriptions(true);
        assert!(matches!(
            feed.subscribe("s1").await,
            Err(RemoteStoreError::SubscriptionFailed { .. })
        ));
    }
}
