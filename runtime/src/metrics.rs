//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for all Pulse components:
//! - Store action processing and effect execution
//! - Presence tracking (phase transitions, visitor counts, remote failures)
//! - Dynamic TTL tuning (accesses, hit-ratio proxy, optimization passes)
//!
//! # Example
//!
//! ```rust,no_run
//! use pulse_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(rendered) = server.render() {
//!     println!("{rendered}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and keeps the handle used to render the
/// scrape output.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the scrape endpoint is advertised on
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// The address the scrape endpoint is advertised on
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Store Metrics
    describe_counter!("store.commands.total", "Total number of actions processed by stores");
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time taken to execute reducers"
    );
    describe_counter!("store.effects.executed", "Effects executed, labelled by type");

    // Presence Metrics
    describe_counter!(
        "presence_transitions_total",
        "Phase transitions of presence trackers, labelled by target phase"
    );
    describe_gauge!(
        "presence_active_visitors",
        "Distinct sessions seen by the last activity check"
    );
    describe_counter!(
        "presence_remote_failures_total",
        "Failed remote store operations, labelled by operation"
    );
    describe_counter!(
        "presence_sessions_removed_total",
        "Stale session rows deleted by cleanup"
    );

    // TTL Metrics
    describe_counter!("ttl_accesses_recorded_total", "Cache accesses recorded");
    describe_gauge!("ttl_hit_ratio_proxy", "Share of tracked keys with high or critical priority");
    describe_gauge!("ttl_tracked_keys", "Usage patterns currently tracked");
    describe_counter!("ttl_optimizations_total", "Self-tuning passes executed");
    describe_counter!("ttl_patterns_swept_total", "Usage patterns removed for inactivity");
}

/// Store runtime metrics recorder.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record one reduced action and how long the reducer took.
    pub fn record_command(duration: Duration) {
        counter!("store.commands.total").increment(1);
        histogram!("store.reducer.duration_seconds").record(duration.as_secs_f64());
    }

    /// Record the execution of an effect of the given kind.
    pub fn record_effect(kind: &'static str) {
        counter!("store.effects.executed", "type" => kind).increment(1);
    }
}

/// Presence tracker metrics recorder.
pub struct PresenceMetrics;

impl PresenceMetrics {
    /// Record a completed phase transition.
    pub fn record_transition(to: &'static str) {
        counter!("presence_transitions_total", "to" => to).increment(1);
    }

    /// Record the distinct session count of an activity check.
    #[allow(clippy::cast_precision_loss)] // Visitor counts stay far below 2^52
    pub fn record_active_visitors(count: usize) {
        gauge!("presence_active_visitors").set(count as f64);
    }

    /// Record a failed remote operation.
    pub fn record_remote_failure(operation: &'static str) {
        counter!("presence_remote_failures_total", "operation" => operation).increment(1);
    }

    /// Record rows removed by cleanup.
    pub fn record_sessions_removed(count: u64) {
        counter!("presence_sessions_removed_total").increment(count);
    }
}

/// Dynamic TTL metrics recorder.
pub struct TtlMetricsRecorder;

impl TtlMetricsRecorder {
    /// Record one cache access and the resulting global proxies.
    #[allow(clippy::cast_precision_loss)] // Key counts stay far below 2^52
    pub fn record_access(hit_ratio: f64, tracked_keys: usize) {
        counter!("ttl_accesses_recorded_total").increment(1);
        gauge!("ttl_hit_ratio_proxy").set(hit_ratio);
        gauge!("ttl_tracked_keys").set(tracked_keys as f64);
    }

    /// Record a self-tuning pass.
    pub fn record_optimization(swept: usize) {
        counter!("ttl_optimizations_total").increment(1);
        counter!("ttl_patterns_swept_total").increment(swept as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert_eq!(server.addr(), addr);
    }

    #[test]
    fn test_metrics_server_render() {
        let mut server = MetricsServer::new(SocketAddr::from(([127, 0, 0, 1], 0)));
        assert!(server.start().is_ok());

        StoreMetrics::record_command(Duration::from_micros(40));
        StoreMetrics::record_effect("timer");
        PresenceMetrics::record_transition("active");
        PresenceMetrics::record_remote_failure("select");
        TtlMetricsRecorder::record_access(0.5, 3);

        // If another test installed the recorder first, handle is None.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("presence_transitions_total"));
            assert!(rendered.contains("store_commands_total"));
            assert!(rendered.contains("ttl_accesses_recorded_total"));
        }
    }
}
