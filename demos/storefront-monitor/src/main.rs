//! Storefront monitor
//!
//! Runs a presence tracker and a TTL manager side by side over simulated
//! traffic, backed by the in-memory session table and change feed:
//! - the tracker sleeps between bursts and wakes when visitors show up
//! - the TTL manager learns per-key lifetimes from the cache reads
//! - a JSON status line is logged every `PULSE_REPORT_INTERVAL_SECS`
//!
//! Run with: `cargo run --bin storefront-monitor`
//! Log level: `RUST_LOG=storefront_monitor=debug,pulse_presence=debug`

mod config;
mod simulation;

use anyhow::Context;
use config::MonitorConfig;
use pulse_core::environment::SystemClock;
use pulse_presence::{PresenceEnvironment, PresenceTracker, VisitorStats};
use pulse_runtime::metrics::MetricsServer;
use pulse_testing::{InMemoryChangeFeed, InMemorySessionStore};
use pulse_ttl::{TtlEnvironment, TtlManager, TtlMetrics};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_LOG_FILTER: &str = "storefront_monitor=info,pulse_presence=info,pulse_ttl=info";

/// Status line logged on every report tick
#[derive(Debug, Serialize)]
struct StatusReport {
    store_id: String,
    phase: &'static str,
    visitors: VisitorStats,
    session_rows: usize,
    ttl: TtlMetrics,
    average_ttl_ms: f64,
    recommendations: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = MonitorConfig::from_env().context("invalid PULSE_* configuration")?;
    info!(
        store_id = %config.store_id,
        visitors = config.simulated_visitors,
        "Starting storefront monitor"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr);
    metrics.start().context("metrics recorder")?;

    let feed = InMemoryChangeFeed::new();
    let sessions = InMemorySessionStore::new().with_change_feed(feed.clone());

    let presence_env = PresenceEnvironment::new(
        Arc::new(sessions.clone()),
        Arc::new(feed),
        Arc::new(SystemClock),
    )
    .with_config(config.presence);
    let tracker = PresenceTracker::new(config.store_id.clone(), presence_env);

    let ttl_env = TtlEnvironment::new(Arc::new(SystemClock)).with_tuning(config.tuning);
    let ttl = TtlManager::new(ttl_env);

    tracker.start().await.context("start presence tracking")?;
    ttl.start().await.context("start TTL optimizer")?;

    let traffic = tokio::spawn(simulation::run(
        tracker.clone(),
        ttl.clone(),
        simulation::visitors(config.simulated_visitors),
    ));

    let mut ticker = tokio::time::interval(config.report_interval);
    let deadline = async {
        match config.run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    info!("Press Ctrl+C to shut down gracefully...");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = status(&config.store_id, &tracker, &ttl, &sessions).await;
                match serde_json::to_string(&report) {
                    Ok(line) => info!(target: "storefront_monitor::status", "{line}"),
                    Err(e) => error!("Status not serializable: {e}"),
                }
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Unable to listen for shutdown signal: {e}");
                }
                info!("Shutdown signal received");
                break;
            }
            () = &mut deadline => {
                info!("Run time elapsed");
                break;
            }
        }
    }

    traffic.abort();
    tracker.shutdown(SHUTDOWN_TIMEOUT).await.context("presence shutdown")?;
    ttl.shutdown(SHUTDOWN_TIMEOUT).await.context("TTL shutdown")?;

    if let Some(rendered) = metrics.render() {
        info!("Final metrics:\n{rendered}");
    }
    info!("Storefront monitor stopped");
    Ok(())
}

async fn status(
    store_id: &str,
    tracker: &PresenceTracker,
    ttl: &TtlManager,
    sessions: &InMemorySessionStore,
) -> StatusReport {
    let usage = ttl.usage_stats().await;
    StatusReport {
        store_id: store_id.to_string(),
        phase: tracker.phase().await.as_str(),
        visitors: tracker.stats().await,
        session_rows: sessions.len(),
        ttl: ttl.metrics().await,
        average_ttl_ms: usage.average_ttl_ms,
        recommendations: usage.recommendations,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
