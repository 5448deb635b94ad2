//! Usage-pattern table, TTL computation and self-tuning.

use crate::config::{TtlConfigs, TuningConfig};
use crate::types::{DataType, ExpectedUsage, Priority, UsagePattern, MINUTE_MS};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

const MULTIPLIER_CAP: f64 = 3.0;
const MULTIPLIER_FLOOR: f64 = 0.5;
const LOW_HIT_RATIO: f64 = 0.7;
const HIGH_HIT_RATIO: f64 = 0.9;

/// Global counters kept in step with the pattern table
///
/// Every pattern's contribution is removed before it changes and added back
/// afterwards, so reading metrics never walks the table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Totals {
    accesses: u64,
    interval_sum_ms: f64,
    intervals_known: usize,
    elevated: usize,
}

impl Totals {
    fn add(&mut self, pattern: &UsagePattern) {
        self.accesses += pattern.access_count;
        if pattern.has_interval() {
            self.interval_sum_ms += pattern.average_interval_ms;
            self.intervals_known += 1;
        }
        if pattern.priority().is_elevated() {
            self.elevated += 1;
        }
    }

    fn remove(&mut self, pattern: &UsagePattern) {
        self.accesses = self.accesses.saturating_sub(pattern.access_count);
        if pattern.has_interval() {
            self.interval_sum_ms -= pattern.average_interval_ms;
            self.intervals_known = self.intervals_known.saturating_sub(1);
            if self.intervals_known == 0 {
                // Drop accumulated float error once nothing is left to average
                self.interval_sum_ms = 0.0;
            }
        }
        if pattern.priority().is_elevated() {
            self.elevated = self.elevated.saturating_sub(1);
        }
    }
}

/// Global usage metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TtlMetrics {
    /// Accesses summed over tracked keys
    pub total_accesses: u64,
    /// Mean interval over keys with a known interval, in milliseconds
    pub average_interval_ms: f64,
    /// Share of keys with high or critical priority (0 when nothing is tracked)
    ///
    /// A proxy, not a measured hit/miss ratio.
    pub hit_ratio: f64,
    /// Keys tracked
    pub tracked_keys: usize,
}

/// Snapshot for dashboards
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
    /// Keys tracked
    pub total_keys: usize,
    /// Keys per data type
    pub by_type: BTreeMap<DataType, usize>,
    /// Keys per priority class
    pub by_priority: BTreeMap<Priority, usize>,
    /// Mean computed TTL over tracked keys, in milliseconds
    pub average_ttl_ms: f64,
    /// Human-readable tuning suggestions
    pub recommendations: Vec<String>,
}

/// Tuning applied to one data type
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TypeAdjustment {
    /// Adjusted type
    pub data_type: DataType,
    /// Multiplier after the pass
    pub multiplier: f64,
    /// Base TTL after the pass, in milliseconds
    pub base_ms: u64,
}

/// Outcome of one self-tuning pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    /// When the pass ran
    pub ran_at: DateTime<Utc>,
    /// Hit-ratio proxy the pass acted on
    pub hit_ratio: f64,
    /// Types that had live patterns
    pub adjusted: Vec<TypeAdjustment>,
    /// Patterns removed for being idle too long
    pub swept: usize,
    /// Keys tracked after the sweep
    pub tracked_keys: usize,
}

#[derive(Default)]
struct Group {
    count_sum: f64,
    interval_sum_ms: f64,
    patterns: usize,
}

/// State of a TTL manager
#[derive(Debug, Clone, Default)]
pub struct TtlState {
    /// Usage patterns by key
    pub patterns: HashMap<String, UsagePattern>,
    /// Current per-type bounds
    pub configs: TtlConfigs,
    /// Whether the optimizer loop is armed
    pub optimizer_running: bool,
    /// Outcome of the most recent self-tuning pass
    pub last_report: Option<OptimizationReport>,
    pub(crate) totals: Totals,
}

impl TtlState {
    /// Empty state with custom bounds
    #[must_use]
    pub fn with_configs(configs: TtlConfigs) -> Self {
        Self {
            configs,
            ..Self::default()
        }
    }

    /// Fold one access into the pattern of `key`
    pub fn record_access(
        &mut self,
        key: &str,
        data_type: DataType,
        size: u64,
        now: DateTime<Utc>,
    ) {
        if let Some(pattern) = self.patterns.get_mut(key) {
            self.totals.remove(pattern);
            pattern.record(data_type, size, now);
            self.totals.add(pattern);
        } else {
            let pattern = UsagePattern::first_access(key, data_type, size, now);
            self.totals.add(&pattern);
            self.patterns.insert(key.to_string(), pattern);
        }
    }

    /// Lifetime for `key` given its observed pattern
    ///
    /// A key never seen gets the type's base unmodified. Otherwise the base
    /// is scaled by frequency, interval, priority and size, then clamped to
    /// the type's bounds.
    #[must_use]
    pub fn calculate_optimal_ttl(&self, key: &str, data_type: DataType) -> Duration {
        let config = self.configs.get(data_type);
        let Some(pattern) = self.patterns.get(key) else {
            return config.base;
        };

        let mut ttl = millis(config.base);

        if pattern.access_count > 10 {
            ttl *= config.multiplier;
        } else if pattern.access_count < 3 {
            ttl *= 0.5;
        }

        if pattern.has_interval() {
            if pattern.average_interval_ms < 5.0 * MINUTE_MS {
                ttl *= 1.5;
            } else if pattern.average_interval_ms > 60.0 * MINUTE_MS {
                ttl *= 0.7;
            }
        }

        ttl *= pattern.priority().factor();

        if pattern.size > MIB {
            ttl *= 0.8;
        } else if pattern.size < KIB {
            ttl *= 1.2;
        }

        clamp_ttl(ttl, config.min, config.max)
    }

    /// Lifetime for a key with no history yet
    #[must_use]
    pub fn recommended_ttl(
        &self,
        data_type: DataType,
        expected: Option<ExpectedUsage>,
    ) -> Duration {
        let base = self.configs.get(data_type).base;
        expected.map_or(base, |usage| scale(base, usage.factor()))
    }

    /// Global metrics, read from the running totals
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn metrics(&self) -> TtlMetrics {
        let tracked_keys = self.patterns.len();
        TtlMetrics {
            total_accesses: self.totals.accesses,
            average_interval_ms: if self.totals.intervals_known == 0 {
                0.0
            } else {
                self.totals.interval_sum_ms / self.totals.intervals_known as f64
            },
            hit_ratio: if tracked_keys == 0 {
                0.0
            } else {
                self.totals.elevated as f64 / tracked_keys as f64
            },
            tracked_keys,
        }
    }

    /// One self-tuning pass
    ///
    /// Nudges each type's multiplier by its live patterns' mean count and
    /// interval, nudges bases by the global hit-ratio proxy, then sweeps
    /// patterns idle longer than `tuning.stale_after`. Types with no live
    /// pattern are left alone.
    #[allow(clippy::cast_precision_loss)]
    pub fn optimize(&mut self, now: DateTime<Utc>, tuning: &TuningConfig) -> OptimizationReport {
        let horizon = TimeDelta::from_std(tuning.stale_after).unwrap_or(TimeDelta::MAX);
        let is_stale = |pattern: &UsagePattern| now - pattern.last_access > horizon;

        let mut groups: BTreeMap<DataType, Group> = BTreeMap::new();
        for pattern in self.patterns.values().filter(|p| !is_stale(p)) {
            let group = groups.entry(pattern.data_type).or_default();
            group.count_sum += pattern.access_count as f64;
            group.interval_sum_ms += pattern.average_interval_ms;
            group.patterns += 1;
        }

        let hit_ratio = self.metrics().hit_ratio;
        let mut adjusted = Vec::with_capacity(groups.len());

        for (data_type, group) in &groups {
            // Single-access keys count with a zero interval
            let mean_count = group.count_sum / group.patterns as f64;
            let mean_interval_ms = group.interval_sum_ms / group.patterns as f64;

            let config = self.configs.get_mut(*data_type);
            if mean_count > 5.0 && mean_interval_ms < 5.0 * MINUTE_MS {
                config.multiplier = (config.multiplier * 1.1).min(MULTIPLIER_CAP);
            } else if mean_count < 2.0 || mean_interval_ms > 30.0 * MINUTE_MS {
                config.multiplier = (config.multiplier * 0.9).max(MULTIPLIER_FLOOR);
            }

            if hit_ratio < LOW_HIT_RATIO {
                let grown = scale(config.base, 1.1).max(config.base);
                config.base = grown.min(config.max);
            } else if hit_ratio > HIGH_HIT_RATIO {
                let shrunk = scale(config.base, 0.95).min(config.base);
                config.base = shrunk.max(config.min);
            }

            adjusted.push(TypeAdjustment {
                data_type: *data_type,
                multiplier: config.multiplier,
                base_ms: u64::try_from(config.base.as_millis()).unwrap_or(u64::MAX),
            });
        }

        let swept = self.sweep(now, horizon);

        OptimizationReport {
            ran_at: now,
            hit_ratio,
            adjusted,
            swept,
            tracked_keys: self.patterns.len(),
        }
    }

    fn sweep(&mut self, now: DateTime<Utc>, horizon: TimeDelta) -> usize {
        let before = self.patterns.len();
        let totals = &mut self.totals;
        self.patterns.retain(|_, pattern| {
            let keep = now - pattern.last_access <= horizon;
            if !keep {
                totals.remove(pattern);
            }
            keep
        });
        before - self.patterns.len()
    }

    /// Dashboard snapshot with tuning suggestions
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn usage_stats(&self) -> UsageStats {
        let mut by_type = BTreeMap::new();
        let mut by_priority = BTreeMap::new();
        let mut ttl_sum_ms = 0.0;

        for (key, pattern) in &self.patterns {
            *by_type.entry(pattern.data_type).or_insert(0) += 1;
            *by_priority.entry(pattern.priority()).or_insert(0) += 1;
            ttl_sum_ms += millis(self.calculate_optimal_ttl(key, pattern.data_type));
        }

        let total_keys = self.patterns.len();
        let average_ttl_ms = if total_keys == 0 { 0.0 } else { ttl_sum_ms / total_keys as f64 };

        UsageStats {
            recommendations: self.recommendations(&by_priority),
            total_keys,
            by_type,
            by_priority,
            average_ttl_ms,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn recommendations(&self, by_priority: &BTreeMap<Priority, usize>) -> Vec<String> {
        let metrics = self.metrics();
        if metrics.tracked_keys == 0 {
            return vec!["No cache accesses recorded yet".to_string()];
        }

        let mut out = Vec::new();
        if metrics.hit_ratio < LOW_HIT_RATIO {
            out.push(format!(
                "Only {:.0}% of keys are high priority: longer base TTLs would keep warm data \
                cached",
                metrics.hit_ratio * 100.0
            ));
        } else if metrics.hit_ratio > HIGH_HIT_RATIO {
            out.push(format!(
                "{:.0}% of keys are high priority: shorter base TTLs would free memory",
                metrics.hit_ratio * 100.0
            ));
        }

        let low = by_priority.get(&Priority::Low).copied().unwrap_or(0);
        if low * 2 > metrics.tracked_keys {
            out.push(format!(
                "{low} of {} keys are low priority: consider not caching them",
                metrics.tracked_keys
            ));
        }

        let large = self.patterns.values().filter(|p| p.size > MIB).count();
        if large > 0 {
            out.push(format!("{large} keys exceed 1 MiB: consider compressing or splitting them"));
        }

        if metrics.average_interval_ms > 60.0 * MINUTE_MS {
            out.push(format!(
                "Keys are read every {:.0} minutes on average: most entries will expire \
                before reuse",
                metrics.average_interval_ms / MINUTE_MS
            ));
        }

        out
    }
}

#[allow(clippy::cast_precision_loss)]
fn millis(duration: Duration) -> f64 {
    duration.as_millis() as f64
}

// Float to int `as` saturates and maps NaN to 0
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn from_millis(ms: f64) -> Duration {
    Duration::from_millis(ms.round().max(0.0) as u64)
}

fn scale(duration: Duration, factor: f64) -> Duration {
    from_millis(millis(duration) * factor)
}

/// Round `ms` into `[min, max]`; NaN lands on `min`
fn clamp_ttl(ms: f64, min: Duration, max: Duration) -> Duration {
    let (min, max) = if min <= max { (min, max) } else { (max, min) };
    if ms.is_nan() {
        return min;
    }
    from_millis(ms).clamp(min, max)
}
