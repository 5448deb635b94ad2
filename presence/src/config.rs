//! Presence tracker cadences and thresholds.

use std::time::Duration;

/// Timing and threshold configuration for one tracker
///
/// Defaults match a storefront with occasional traffic: a sleeping tracker
/// looks once a minute, an active one every 15 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Poll period while sleeping
    pub sleep_interval: Duration,
    /// Re-check period while active
    pub active_recheck_interval: Duration,
    /// Stale-row cleanup period while active
    pub cleanup_interval: Duration,
    /// Heartbeat period while active
    pub heartbeat_interval: Duration,
    /// Grace period between seeing nobody and going back to sleep
    pub deactivation_delay: Duration,
    /// Sessions with activity inside this window count as active
    pub active_window: Duration,
    /// Distinct sessions needed to wake up
    pub activation_threshold: usize,
    /// Optional cap on rows fetched per check
    pub fetch_limit: Option<usize>,
}

impl PresenceConfig {
    /// Set the sleeping poll period
    #[must_use]
    pub const fn with_sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    /// Set the active re-check period
    #[must_use]
    pub const fn with_active_recheck_interval(mut self, interval: Duration) -> Self {
        self.active_recheck_interval = interval;
        self
    }

    /// Set the cleanup period
    #[must_use]
    pub const fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the heartbeat period
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the deactivation grace period
    #[must_use]
    pub const fn with_deactivation_delay(mut self, delay: Duration) -> Self {
        self.deactivation_delay = delay;
        self
    }

    /// Set the active window
    #[must_use]
    pub const fn with_active_window(mut self, window: Duration) -> Self {
        self.active_window = window;
        self
    }

    /// Set the activation threshold (at least 1)
    #[must_use]
    pub const fn with_activation_threshold(mut self, threshold: usize) -> Self {
        self.activation_threshold = if threshold == 0 { 1 } else { threshold };
        self
    }

    /// Cap the rows fetched per check
    #[must_use]
    pub const fn with_fetch_limit(mut self, limit: Option<usize>) -> Self {
        self.fetch_limit = limit;
        self
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            sleep_interval: Duration::from_secs(60),
            active_recheck_interval: Duration::from_secs(15),
            cleanup_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            deactivation_delay: Duration::from_secs(30),
            active_window: Duration::from_secs(120),
            activation_threshold: 1,
            fetch_limit: None,
        }
    }
}
