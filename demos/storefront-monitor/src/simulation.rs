//! Simulated storefront traffic.
//!
//! Visitors arrive in bursts separated by quiet spells long enough for the
//! tracker to fall back asleep. Every page view reads a few cache keys so
//! the TTL manager has patterns to learn from.

use pulse_presence::PresenceTracker;
use pulse_ttl::{DataType, TtlManager};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// One simulated visitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visitor {
    /// Browser string
    pub user_agent: String,
    /// Network address
    pub address: String,
}

/// Fixed visitor pool, one distinct fingerprint each
#[must_use]
pub fn visitors(count: usize) -> Vec<Visitor> {
    (0..count)
        .map(|i| Visitor {
            user_agent: format!("Mozilla/5.0 (Pulse demo; visitor {i})"),
            address: format!("192.0.2.{}", i % 254 + 1),
        })
        .collect()
}

/// Cache reads behind one page view
#[must_use]
pub fn page_reads(visitor: usize, product: u32) -> [(String, DataType, u64); 4] {
    [
        ("catalog:index".to_string(), DataType::Static, 48 * 1024),
        (format!("product:{product}"), DataType::Dynamic, 2 * 1024),
        (format!("profile:{visitor}"), DataType::User, 512),
        (format!("cart:{visitor}"), DataType::Session, 256),
    ]
}

/// Drive traffic until the task is aborted
pub async fn run(tracker: PresenceTracker, ttl: TtlManager, pool: Vec<Visitor>) {
    if pool.is_empty() {
        tracing::warn!("No simulated visitors configured");
        return;
    }
    let mut rng = StdRng::from_entropy();

    loop {
        let burst = rng.gen_range(5..20);
        tracing::info!(page_views = burst, "Traffic burst");

        for _ in 0..burst {
            let index = rng.gen_range(0..pool.len());
            let visitor = &pool[index];
            tracker.track(&visitor.user_agent, &visitor.address).await;
            tracker.record_interaction().await;

            for (key, data_type, size) in page_reads(index, rng.gen_range(1..50)) {
                if let Err(error) = ttl.record_access(key, data_type, size).await {
                    tracing::warn!(%error, "Cache access not recorded");
                    return;
                }
            }

            tokio::time::sleep(Duration::from_millis(rng.gen_range(500..3_000))).await;
        }

        let quiet = Duration::from_secs(rng.gen_range(60..240));
        tracing::info!(?quiet, "Quiet spell");
        tokio::time::sleep(quiet).await;
    }
}
