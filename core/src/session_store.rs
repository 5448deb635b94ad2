//! Session store trait and related types for visitor presence.
//!
//! The session store is the remote table of "who is on this storefront right
//! now". Pulse never owns it: rows are written by every visitor's tracker and
//! read by every tracker watching the same store.
//!
//! # Design
//!
//! The `SessionStore` trait mirrors the three table operations the presence
//! tracker needs:
//!
//! - Upsert a session row by its natural key `(store_id, session_id)`
//! - Select rows active since a cutoff, newest first
//! - Bulk delete rows that went quiet before a cutoff
//!
//! # Implementations
//!
//! - `InMemorySessionStore` (in `pulse-testing` crate): fast, deterministic testing
//!   with failure injection
//!
//! # Example
//!
//! ```no_run
//! use pulse_core::session_store::{SessionQuery, SessionStore, RemoteStoreError};
//! use chrono::{Duration, Utc};
//!
//! async fn example<S: SessionStore>(store: &S) -> Result<(), RemoteStoreError> {
//!     let query = SessionQuery::new("store-1", Utc::now() - Duration::minutes(2));
//!     let active = store.select_sessions(query).await?;
//!     println!("{} sessions active", active.len());
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by remote store operations
pub type RemoteFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, RemoteStoreError>> + Send + 'a>>;

/// Errors that can occur during remote store operations.
///
/// Every variant is treated as transient by Pulse: the failing cycle is
/// skipped and the next scheduled tick tries again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteStoreError {
    /// The store could not be reached
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The store rejected or failed an operation
    #[error("{operation} failed: {reason}")]
    OperationFailed {
        /// The operation that failed (e.g. "upsert", "select", "delete")
        operation: String,
        /// The reason for failure
        reason: String,
    },

    /// Subscribing to table changes failed
    #[error("Subscription failed for store '{store_id}': {reason}")]
    SubscriptionFailed {
        /// The store whose change feed could not be opened
        store_id: String,
        /// The reason for failure
        reason: String,
    },
}

impl RemoteStoreError {
    /// Convenience constructor for [`RemoteStoreError::OperationFailed`]
    #[must_use]
    pub fn operation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// A visitor-presence row.
///
/// `session_id` is a heuristic fingerprint (user agent + network address),
/// not a verified identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Fingerprint-derived session key
    pub session_id: String,
    /// Owning storefront
    pub store_id: String,
    /// Visitor user agent as reported by the client
    pub user_agent: String,
    /// Visitor network address
    pub address: String,
    /// Last observed interaction
    pub last_activity: DateTime<Utc>,
}

/// Filters for [`SessionStore::select_sessions`].
///
/// Rows are returned ordered by `last_activity`, newest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionQuery {
    /// Store whose sessions to read
    pub store_id: String,
    /// Only rows with `last_activity >= active_since`
    pub active_since: DateTime<Utc>,
    /// Optional cap on returned rows
    pub limit: Option<usize>,
}

impl SessionQuery {
    /// Query all rows for `store_id` active since `active_since`
    #[must_use]
    pub fn new(store_id: impl Into<String>, active_since: DateTime<Utc>) -> Self {
        Self {
            store_id: store_id.into(),
            active_since,
            limit: None,
        }
    }

    /// Cap the number of returned rows
    #[must_use]
    pub const fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

/// Remote session table abstraction.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; effects capture an
/// `Arc<dyn SessionStore>` and call it from spawned tasks.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn SessionStore>`).
pub trait SessionStore: Send + Sync {
    /// Insert or update a session row.
    ///
    /// Conflicts are resolved on `(store_id, session_id)`: an existing row has
    /// its `user_agent`, `address` and `last_activity` overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStoreError`] if the store is unreachable or rejects the write.
    fn upsert_session(&self, record: SessionRecord) -> RemoteFuture<'_, ()>;

    /// Select rows matching `query`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStoreError`] if the store is unreachable or the query fails.
    fn select_sessions(&self, query: SessionQuery) -> RemoteFuture<'_, Vec<SessionRecord>>;

    /// Delete every row of `store_id` whose `last_activity` is before `inactive_before`.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStoreError`] if the store is unreachable or the delete fails.
    fn delete_sessions(
        &self,
        store_id: &str,
        inactive_before: DateTime<Utc>,
    ) -> RemoteFuture<'_, u64>;
}
