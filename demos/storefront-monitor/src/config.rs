//! Configuration management for the storefront monitor.
//!
//! Loads configuration from `PULSE_*` environment variables with sensible
//! defaults. Unset variables keep the default; set but malformed ones are
//! an error.

use pulse_presence::PresenceConfig;
use pulse_ttl::TuningConfig;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
        /// Parser message
        reason: String,
    },
}

/// Monitor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Store whose visitors are tracked
    pub store_id: String,
    /// Tracker cadences
    pub presence: PresenceConfig,
    /// TTL optimizer cadence
    pub tuning: TuningConfig,
    /// Distinct simulated visitors
    pub simulated_visitors: usize,
    /// Period of the JSON status line
    pub report_interval: Duration,
    /// Advertised Prometheus scrape address
    pub metrics_addr: SocketAddr,
    /// Stop on its own after this long
    pub run_for: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            store_id: "demo-store".to_string(),
            presence: PresenceConfig::default(),
            tuning: TuningConfig::default(),
            simulated_visitors: 5,
            report_interval: Duration::from_secs(10),
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            run_for: None,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set but malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Lookup(lookup);

        let p = defaults.presence;
        let recheck = env.secs("PULSE_ACTIVE_RECHECK_SECS", p.active_recheck_interval)?;
        let heartbeat = env.secs("PULSE_HEARTBEAT_INTERVAL_SECS", p.heartbeat_interval)?;
        let delay = env.secs("PULSE_DEACTIVATION_DELAY_SECS", p.deactivation_delay)?;
        let threshold = env.parse("PULSE_ACTIVATION_THRESHOLD", p.activation_threshold)?;
        let presence = PresenceConfig::default()
            .with_sleep_interval(env.secs("PULSE_SLEEP_INTERVAL_SECS", p.sleep_interval)?)
            .with_active_recheck_interval(recheck)
            .with_cleanup_interval(env.secs("PULSE_CLEANUP_INTERVAL_SECS", p.cleanup_interval)?)
            .with_heartbeat_interval(heartbeat)
            .with_deactivation_delay(delay)
            .with_active_window(env.secs("PULSE_ACTIVE_WINDOW_SECS", p.active_window)?)
            .with_activation_threshold(threshold);

        let t = defaults.tuning;
        let tuning = TuningConfig::default()
            .with_optimize_interval(env.secs("PULSE_TTL_OPTIMIZE_SECS", t.optimize_interval)?)
            .with_stale_after(env.secs("PULSE_TTL_STALE_AFTER_SECS", t.stale_after)?);

        Ok(Self {
            store_id: env.get("PULSE_STORE_ID").unwrap_or(defaults.store_id),
            presence,
            tuning,
            simulated_visitors: env.parse("PULSE_SIMULATED_VISITORS", defaults.simulated_visitors)?,
            report_interval: env.secs("PULSE_REPORT_INTERVAL_SECS", defaults.report_interval)?,
            metrics_addr: env.parse("PULSE_METRICS_ADDR", defaults.metrics_addr)?,
            run_for: env
                .get("PULSE_RUN_FOR_SECS")
                .map(|raw| parse::<u64>("PULSE_RUN_FOR_SECS", raw).map(Duration::from_secs))
                .transpose()?,
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key).map_or(Ok(default), |raw| parse(key, raw))
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.parse(key, default.as_secs())?;
        if secs == 0 {
            return Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }
        Ok(Duration::from_secs(secs))
    }
}

fn parse<T>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.parse() {
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value: raw,
        }),
    }
}
