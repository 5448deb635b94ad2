//! Change feed abstraction for realtime session notifications.
//!
//! The remote store pushes a notification whenever a session row of a store
//! is inserted, updated or deleted. Pulse does not care about the payload,
//! only that *something changed*, which is reason enough to re-check who is
//! online.
//!
//! Subscriptions are plain streams. Dropping the stream unsubscribes; the
//! runtime does that when the `Effect::Cancellable` wrapping the stream is
//! cancelled.
//!
//! # Implementations
//!
//! - `InMemoryChangeFeed` (in `pulse-testing` crate): broadcast-channel backed
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! let mut changes = feed.subscribe("store-1").await?;
//! while let Some(change) = changes.next().await {
//!     tracing::debug!(kind = ?change.kind, "session table changed");
//! }
//! ```

use crate::session_store::RemoteStoreError;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Kind of row change reported by the feed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A new session row
    Insert,
    /// An existing row was touched
    Update,
    /// Rows were removed
    Delete,
}

/// A single change notification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChange {
    /// What happened
    pub kind: ChangeKind,
    /// Store whose table changed
    pub store_id: String,
    /// Affected session, when the feed knows it
    pub session_id: Option<String>,
}

impl SessionChange {
    /// Create a change notification
    #[must_use]
    pub fn new(kind: ChangeKind, store_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            kind,
            store_id: store_id.into(),
            session_id,
        }
    }
}

/// Stream of change notifications for one store.
pub type ChangeStream = Pin<Box<dyn Stream<Item = SessionChange> + Send>>;

/// Trait for realtime change feeds.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the feed can be injected
/// as `Arc<dyn ChangeFeed>`.
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to session changes of `store_id`.
    ///
    /// The returned stream only yields changes for that store and ends when
    /// the feed shuts down.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteStoreError::SubscriptionFailed`] if the subscription cannot be opened.
    fn subscribe(
        &self,
        store_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeStream, RemoteStoreError>> + Send + '_>>;
}
