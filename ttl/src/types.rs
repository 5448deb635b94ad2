//! Data types, priorities and usage patterns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds in a minute
pub(crate) const MINUTE_MS: f64 = 60_000.0;

/// Volatility class of cached data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Rarely changes (catalog, theme)
    Static,
    /// Changes regularly (stock, prices)
    Dynamic,
    /// Per-user data (profile, preferences)
    User,
    /// Per-session data (cart)
    Session,
}

impl DataType {
    /// Every data type, in priority order
    pub const ALL: [Self; 4] = [Self::Static, Self::Dynamic, Self::User, Self::Session];

    /// Priority points contributed by the type alone
    #[must_use]
    pub const fn base_priority(self) -> u32 {
        match self {
            Self::Static => 1,
            Self::Dynamic => 2,
            Self::User => 3,
            Self::Session => 4,
        }
    }

    /// Lowercase label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::User => "user",
            Self::Session => "session",
        }
    }

    /// Parse a label from calling code; unknown labels fall back to `Dynamic`
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "static" => Self::Static,
            "dynamic" => Self::Dynamic,
            "user" => Self::User,
            "session" => Self::Session,
            _ => {
                tracing::debug!(label, "Unknown data type label, using dynamic");
                Self::Dynamic
            },
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Static => 0,
            Self::Dynamic => 1,
            Self::User => 2,
            Self::Session => 3,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority class derived from a usage pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Score below 2
    Low,
    /// Score 2 to 4
    Medium,
    /// Score 4 to 6
    High,
    /// Score 6 and above
    Critical,
}

impl Priority {
    /// Classify a priority score
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 6.0 {
            Self::Critical
        } else if score >= 4.0 {
            Self::High
        } else if score >= 2.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// TTL multiplier for the class
    #[must_use]
    pub const fn factor(self) -> f64 {
        match self {
            Self::Low => 0.7,
            Self::Medium => 1.0,
            Self::High => 1.5,
            Self::Critical => 2.0,
        }
    }

    /// Whether the class counts toward the hit-ratio proxy
    #[must_use]
    pub const fn is_elevated(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// Caller's expectation of how often a new key will be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedUsage {
    /// Halves the base TTL
    Low,
    /// Keeps the base TTL
    Medium,
    /// Adds half the base TTL
    High,
}

impl ExpectedUsage {
    /// Multiplier applied to the base TTL
    #[must_use]
    pub const fn factor(self) -> f64 {
        match self {
            Self::Low => 0.5,
            Self::Medium => 1.0,
            Self::High => 1.5,
        }
    }
}

/// Access statistics of one cache key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsagePattern {
    /// Cache key
    pub key: String,
    /// Accesses recorded
    pub access_count: u64,
    /// Most recent access
    pub last_access: DateTime<Utc>,
    /// Cumulative running mean of gaps between accesses, in milliseconds
    ///
    /// Zero until a second access is recorded.
    pub average_interval_ms: f64,
    /// Volatility class reported with the last access
    pub data_type: DataType,
    /// Payload size in bytes, last seen
    pub size: u64,
}

impl UsagePattern {
    /// Pattern of a key seen for the first time
    #[must_use]
    pub fn first_access(
        key: impl Into<String>,
        data_type: DataType,
        size: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            access_count: 1,
            last_access: now,
            average_interval_ms: 0.0,
            data_type,
            size,
        }
    }

    /// Fold one more access into the pattern
    ///
    /// `newAvg = (oldAvg * (n - 1) + gap) / n` where `n` is the count after
    /// this access. A clock that went backwards counts as a zero gap.
    #[allow(clippy::cast_precision_loss)] // Counts and gaps stay far below 2^52
    pub fn record(&mut self, data_type: DataType, size: u64, now: DateTime<Utc>) {
        let gap_ms = (now - self.last_access).num_milliseconds().max(0) as f64;
        self.access_count += 1;
        let n = self.access_count as f64;
        self.average_interval_ms = (self.average_interval_ms * (n - 1.0) + gap_ms) / n;
        self.last_access = now;
        self.data_type = data_type;
        self.size = size;
    }

    /// Whether a mean interval has been observed
    #[must_use]
    pub fn has_interval(&self) -> bool {
        self.average_interval_ms > 0.0
    }

    /// `base_priority + min(count / 10, 2) + max(0, 2 - interval_minutes)`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn priority_score(&self) -> f64 {
        let frequency = (self.access_count as f64 / 10.0).min(2.0);
        let recency = (2.0 - self.average_interval_ms / MINUTE_MS).max(0.0);
        f64::from(self.data_type.base_priority()) + frequency + recency
    }

    /// Priority class; derived, never stored
    #[must_use]
    pub fn priority(&self) -> Priority {
        Priority::from_score(self.priority_score())
    }
}
