//! # Pulse Presence
//!
//! Adaptive polling of "who is on this storefront right now".
//!
//! A tracker sleeps, polling the remote session table once a minute, until
//! it sees a visitor. It then switches to fast re-checks, periodic cleanup,
//! heartbeats and a realtime change subscription, and falls back to sleep
//! 30 seconds after the last visitor left.
//!
//! ```text
//!            visitors >= threshold
//!   SLEEP ───────────────────────────▶ ACTIVE
//!     ▲                                  │ nobody seen
//!     │      deactivation fires          ▼
//!     └──────────────────────── (deactivation pending, 30 s)
//!                                        │ somebody seen
//!                                        ▼
//!                                  deactivation cancelled
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use pulse_presence::{PresenceEnvironment, PresenceTracker};
//! use pulse_core::environment::SystemClock;
//! use pulse_testing::{InMemoryChangeFeed, InMemorySessionStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let feed = InMemoryChangeFeed::new();
//! let sessions = InMemorySessionStore::new().with_change_feed(feed.clone());
//! let env = PresenceEnvironment::new(Arc::new(sessions), Arc::new(feed), Arc::new(SystemClock));
//!
//! let tracker = PresenceTracker::new("store-1", env);
//! tracker.start().await?;
//! tracker.track("Mozilla/5.0", "10.0.0.1").await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod reducer;
pub mod session;
pub mod tracker;
pub mod types;

pub use config::PresenceConfig;
pub use reducer::{PresenceEnvironment, PresenceReducer};
pub use session::{generate_session_id, ActiveVisitors, VisitorStats};
pub use tracker::PresenceTracker;
pub use types::{ids, CurrentVisitor, Phase, PresenceAction, PresenceState};
