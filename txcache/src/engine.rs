//! Wiring for a process-wide cache
//!
//! Builds the store, coordinator, policy and registries from a
//! `TxCacheConfig` and hands out caching executors that share them.

use crate::config::TxCacheConfig;
use crate::core::{
    CachingExecutor, CommandExecutor, DefaultCachingPolicy, InMemoryCache, QueryRegistries,
    Result, TransactionCoordinator, TransactionHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Clone)]
pub struct TxCache {
    cache: Arc<InMemoryCache>,
    coordinator: TransactionCoordinator,
    policy: Arc<DefaultCachingPolicy>,
    registries: Arc<QueryRegistries>,
    config: TxCacheConfig,
}

impl TxCache {
    pub fn new(config: TxCacheConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing txcache (purge_interval={}ms, abandoned_timeout={:?}s)",
            config.store.purge_interval_ms, config.store.abandoned_transaction_timeout_secs
        );

        let cache = Arc::new(InMemoryCache::new());
        let coordinator = TransactionCoordinator::new(cache.clone());

        Ok(Self {
            cache,
            coordinator,
            policy: Arc::new(DefaultCachingPolicy::new(config.policy.clone())),
            registries: Arc::new(QueryRegistries::new()),
            config,
        })
    }

    /// Spawn the purge and abandoned-transaction tasks that are enabled
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(interval) = self.config.purge_interval() {
            handles.push(self.cache.start_purge_task(interval));
        }

        if let Some(max_age) = self.config.abandoned_transaction_timeout() {
            // Sweep a few times per timeout window
            let interval = (max_age / 4).max(Duration::from_secs(1));
            handles.push(self.coordinator.start_abandoned_sweep(interval, max_age));
        }

        handles
    }

    /// Wrap `executor` so its commands go through this cache
    pub fn executor<X: CommandExecutor>(&self, executor: X) -> CachingExecutor<X> {
        CachingExecutor::new(
            executor,
            self.coordinator.clone(),
            self.policy.clone(),
            self.registries.clone(),
        )
    }

    /// Transaction outcome notification: commit
    pub fn committed(&self, transaction: &TransactionHandle, scope: &str) -> Result<()> {
        self.coordinator.committed(transaction, scope)
    }

    /// Transaction outcome notification: rollback
    pub fn rolled_back(&self, transaction: &TransactionHandle) {
        self.coordinator.rolled_back(transaction)
    }

    pub fn cache(&self) -> &Arc<InMemoryCache> {
        &self.cache
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn registries(&self) -> &Arc<QueryRegistries> {
        &self.registries
    }

    pub fn config(&self) -> &TxCacheConfig {
        &self.config
    }
}

impl std::fmt::Debug for TxCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxCache")
            .field("entries", &self.cache.count())
            .field("pending_transactions", &self.coordinator.pending_transactions())
            .finish()
    }
}
