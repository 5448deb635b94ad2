//! # Pulse TTL
//!
//! Cache lifetimes computed from how each key is actually used.
//!
//! Every cache read reports its key, [`DataType`] and payload size. The
//! manager keeps a [`UsagePattern`] per key and derives a TTL from the
//! type's base, scaled by access frequency, mean interval, priority class
//! and size, then clamped to the type's `[min, max]`.
//!
//! A periodic optimizer (every 5 minutes by default) nudges each type's
//! multiplier and base from what it observed, and sweeps keys untouched for
//! a day.
//!
//! ## Example
//!
//! ```no_run
//! use pulse_core::environment::SystemClock;
//! use pulse_ttl::{DataType, TtlEnvironment, TtlManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = TtlManager::new(TtlEnvironment::new(Arc::new(SystemClock)));
//! manager.start().await?;
//!
//! manager.record_access("cart:abc", DataType::Session, 512).await?;
//! let ttl = manager.calculate_optimal_ttl("cart:abc", DataType::Session).await;
//! println!("cache for {ttl:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod reducer;
pub mod state;
pub mod types;

pub use config::{TtlConfig, TtlConfigs, TuningConfig};
pub use manager::TtlManager;
pub use reducer::{TtlAction, TtlEnvironment, TtlReducer, OPTIMIZER};
pub use state::{OptimizationReport, TtlMetrics, TtlState, TypeAdjustment, UsageStats};
pub use types::{DataType, ExpectedUsage, Priority, UsagePattern};
