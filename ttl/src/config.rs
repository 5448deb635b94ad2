//! Per-type TTL bounds and self-tuning cadence.

use crate::types::DataType;
use std::time::Duration;

/// TTL bounds of one data type
///
/// `base` and `multiplier` drift through self-tuning; `min` and `max` never
/// change after construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlConfig {
    /// Starting lifetime before adjustments
    pub base: Duration,
    /// Lower clamp
    pub min: Duration,
    /// Upper clamp
    pub max: Duration,
    /// Applied to frequently read keys
    pub multiplier: f64,
}

impl TtlConfig {
    /// Create a config
    ///
    /// Inverted bounds are swapped, `base` is clamped between them and a
    /// multiplier that is not a positive finite number becomes 1.0.
    #[must_use]
    pub fn new(base: Duration, min: Duration, max: Duration, multiplier: f64) -> Self {
        Self::raw(base, min, max, multiplier).sanitized(1.0)
    }

    const fn raw(base: Duration, min: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            base,
            min,
            max,
            multiplier,
        }
    }

    fn sanitized(self, fallback_multiplier: f64) -> Self {
        let (min, max) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        let multiplier = if self.multiplier.is_finite() && self.multiplier > 0.0 {
            self.multiplier
        } else {
            tracing::debug!(multiplier = self.multiplier, "Invalid TTL multiplier replaced");
            fallback_multiplier
        };
        Self {
            base: self.base.clamp(min, max),
            min,
            max,
            multiplier,
        }
    }

    /// Built-in defaults for `data_type`
    #[must_use]
    pub const fn default_for(data_type: DataType) -> Self {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        match data_type {
            DataType::Static => Self::raw(
                Duration::from_secs(HOUR),
                Duration::from_secs(5 * MINUTE),
                Duration::from_secs(24 * HOUR),
                2.0,
            ),
            DataType::Dynamic => Self::raw(
                Duration::from_secs(5 * MINUTE),
                Duration::from_secs(30),
                Duration::from_secs(30 * MINUTE),
                1.5,
            ),
            DataType::User => Self::raw(
                Duration::from_secs(15 * MINUTE),
                Duration::from_secs(MINUTE),
                Duration::from_secs(HOUR),
                1.2,
            ),
            DataType::Session => Self::raw(
                Duration::from_secs(30 * MINUTE),
                Duration::from_secs(5 * MINUTE),
                Duration::from_secs(2 * HOUR),
                1.0,
            ),
        }
    }
}

/// One [`TtlConfig`] per data type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlConfigs {
    configs: [TtlConfig; 4],
}

impl TtlConfigs {
    /// Config of `data_type`
    #[must_use]
    pub const fn get(&self, data_type: DataType) -> &TtlConfig {
        &self.configs[data_type.index()]
    }

    /// Replace the config of `data_type`
    ///
    /// The config is sanitized like [`TtlConfig::new`]; an invalid multiplier
    /// falls back to the type's default.
    #[must_use]
    pub fn with(mut self, data_type: DataType, config: TtlConfig) -> Self {
        let fallback = TtlConfig::default_for(data_type).multiplier;
        self.configs[data_type.index()] = config.sanitized(fallback);
        self
    }

    pub(crate) fn get_mut(&mut self, data_type: DataType) -> &mut TtlConfig {
        &mut self.configs[data_type.index()]
    }
}

impl Default for TtlConfigs {
    fn default() -> Self {
        Self {
            configs: DataType::ALL.map(TtlConfig::default_for),
        }
    }
}

/// Self-tuning cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningConfig {
    /// Period of the optimizer loop
    pub optimize_interval: Duration,
    /// Patterns idle longer than this are swept
    pub stale_after: Duration,
}

impl TuningConfig {
    /// Set the optimizer period
    #[must_use]
    pub const fn with_optimize_interval(mut self, interval: Duration) -> Self {
        self.optimize_interval = interval;
        self
    }

    /// Set the sweep horizon
    #[must_use]
    pub const fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            optimize_interval: Duration::from_secs(5 * 60),
            stale_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}
