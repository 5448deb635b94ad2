//! `TtlManager`: async facade over a TTL [`Store`].

use crate::config::TtlConfigs;
use crate::reducer::{TtlAction, TtlEnvironment, TtlReducer};
use crate::state::{OptimizationReport, TtlMetrics, TtlState, UsageStats};
use crate::types::{DataType, ExpectedUsage, UsagePattern};
use pulse_runtime::{Store, StoreError};
use std::time::Duration;

type TtlStore = Store<TtlState, TtlAction, TtlEnvironment, TtlReducer>;

/// Dynamic TTL manager.
///
/// Cloning is cheap; clones share the pattern table.
///
/// # Example
///
/// ```ignore
/// let manager = TtlManager::new(TtlEnvironment::new(Arc::new(SystemClock)));
/// manager.start().await?;
///
/// manager.record_access("product:42", DataType::Dynamic, 2048).await?;
/// let ttl = manager.calculate_optimal_ttl("product:42", DataType::Dynamic).await;
/// ```
#[derive(Clone)]
pub struct TtlManager {
    store: TtlStore,
}

impl TtlManager {
    /// Manager with default per-type bounds
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(environment: TtlEnvironment) -> Self {
        Self::with_configs(TtlConfigs::default(), environment)
    }

    /// Manager with custom per-type bounds
    #[must_use]
    pub fn with_configs(configs: TtlConfigs, environment: TtlEnvironment) -> Self {
        Self {
            store: Store::new(TtlState::with_configs(configs), TtlReducer::new(), environment),
        }
    }

    /// Start periodic self-tuning
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> Result<(), StoreError> {
        self.store.send(TtlAction::StartOptimizer).await.map(drop)
    }

    /// Stop periodic self-tuning
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`shutdown`](Self::shutdown).
    pub async fn stop(&self) -> Result<(), StoreError> {
        self.store.send(TtlAction::StopOptimizer).await.map(drop)
    }

    /// Record one cache access
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`shutdown`](Self::shutdown).
    pub async fn record_access(
        &self,
        key: impl Into<String>,
        data_type: DataType,
        size: u64,
    ) -> Result<(), StoreError> {
        let action = TtlAction::RecordAccess {
            key: key.into(),
            data_type,
            size,
        };
        self.store.send(action).await.map(drop)
    }

    /// Lifetime for `key` given its observed pattern
    pub async fn calculate_optimal_ttl(&self, key: &str, data_type: DataType) -> Duration {
        self.store.state(|s| s.calculate_optimal_ttl(key, data_type)).await
    }

    /// Lifetime for a key with no history yet
    pub async fn recommended_ttl(
        &self,
        data_type: DataType,
        expected: Option<ExpectedUsage>,
    ) -> Duration {
        self.store.state(|s| s.recommended_ttl(data_type, expected)).await
    }

    /// Run a self-tuning pass now
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`shutdown`](Self::shutdown).
    pub async fn optimize_now(&self) -> Result<OptimizationReport, StoreError> {
        self.store.send(TtlAction::Optimize).await?;
        self.store
            .state(|s| s.last_report.clone())
            .await
            .ok_or(StoreError::ChannelClosed)
    }

    /// Pattern of `key`, if tracked
    pub async fn pattern(&self, key: &str) -> Option<UsagePattern> {
        self.store.state(|s| s.patterns.get(key).cloned()).await
    }

    /// Dashboard snapshot
    pub async fn usage_stats(&self) -> UsageStats {
        self.store.state(TtlState::usage_stats).await
    }

    /// Global metrics
    pub async fn metrics(&self) -> TtlMetrics {
        self.store.state(TtlState::metrics).await
    }

    /// Current per-type bounds
    pub async fn configs(&self) -> TtlConfigs {
        self.store.state(|s| s.configs).await
    }

    /// Whether self-tuning is running
    pub async fn is_running(&self) -> bool {
        self.store.state(|s| s.optimizer_running).await
    }

    /// Stop self-tuning and shut the underlying store down
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if the store does not drain
    /// within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        let _ = self.stop().await;
        self.store.shutdown(timeout).await
    }
}
