//! Session fingerprints and visitor snapshots.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use pulse_core::session_store::SessionRecord;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Prefix of every generated session id
pub const SESSION_PREFIX: &str = "session_";

/// Derive a session id from a visitor's user agent and network address.
///
/// Pure and deterministic: the same pair always yields the same id, so a
/// returning visitor keeps updating the same row. This is a heuristic
/// fingerprint, not an identity; visitors behind one NAT with the same
/// browser share an id.
///
/// # Example
///
/// ```
/// use pulse_presence::generate_session_id;
///
/// let a = generate_session_id("Mozilla/5.0", "10.0.0.1");
/// assert_eq!(a, generate_session_id("Mozilla/5.0", "10.0.0.1"));
/// assert_ne!(a, generate_session_id("Mozilla/5.0", "10.0.0.2"));
/// assert!(a.starts_with("session_"));
/// ```
#[must_use]
pub fn generate_session_id(user_agent: &str, address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    // Length prefix keeps ("ab", "c") and ("a", "bc") apart
    hasher.update(b"|");
    hasher.update(user_agent.len().to_le_bytes());
    hasher.update(b"|");
    hasher.update(address.as_bytes());
    let digest = hasher.finalize();

    format!("{SESSION_PREFIX}{}", URL_SAFE_NO_PAD.encode(&digest[..16]))
}

/// Visitor counts of one activity check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VisitorStats {
    /// Distinct sessions
    pub total_visitors: usize,
    /// Distinct network addresses
    pub unique_visitors: usize,
}

impl VisitorStats {
    /// Count distinct sessions and addresses in `records`
    #[must_use]
    pub fn from_records(records: &[SessionRecord]) -> Self {
        let sessions: HashSet<&str> = records.iter().map(|r| r.session_id.as_str()).collect();
        let addresses: HashSet<&str> = records.iter().map(|r| r.address.as_str()).collect();
        Self {
            total_visitors: sessions.len(),
            unique_visitors: addresses.len(),
        }
    }
}

/// Result of
/// [`PresenceTracker::fetch_active_visitors`](crate::PresenceTracker::fetch_active_visitors)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActiveVisitors {
    /// Rows active inside the window, newest first
    pub visitors: Vec<SessionRecord>,
    /// Distinct counts over `visitors`
    pub stats: VisitorStats,
}

impl ActiveVisitors {
    /// Wrap `visitors` with their distinct counts
    #[must_use]
    pub fn from_records(visitors: Vec<SessionRecord>) -> Self {
        let stats = VisitorStats::from_records(&visitors);
        Self { visitors, stats }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(session: &str, address: &str) -> SessionRecord {
        SessionRecord {
            session_id: session.to_string(),
            store_id: "s".to_string(),
            user_agent: "ua".to_string(),
            address: address.to_string(),
            last_activity: Utc::now(),
        }
    }

    #[test]
    fn boundary_shift_changes_the_id() {
        assert_ne!(generate_session_id("ab", "c"), generate_session_id("a", "bc"));
    }

    #[test]
    fn stats_count_distinct_values() {
        let rows = vec![
            row("a", "1.1.1.1"),
            row("b", "1.1.1.1"),
            row("a", "1.1.1.1"),
            row("c", "2.2.2.2"),
        ];
        let stats = VisitorStats::from_records(&rows);
        assert_eq!(stats.total_visitors, 3);
        assert_eq!(stats.unique_visitors, 2);
    }

    #[test]
    fn empty_stats() {
        assert_eq!(VisitorStats::from_records(&[]), VisitorStats::default());
    }
}
