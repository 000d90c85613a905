//! Caching executor
//!
//! Sits between the data-access adapter and a `CommandExecutor`:
//! - reads consult the cache first and store eligible results on a miss
//! - writes invalidate the entity sets they touched
//!
//! All cache traffic goes through the `TransactionCoordinator`, so commands
//! carrying a transaction handle never read from, write to, or immediately
//! invalidate the shared cache.

use super::command::{Command, CommandFacts};
use super::error::{ExecutionError, Result};
use super::executor::{CachedRowReader, CommandExecutor, Rows, materialize};
use super::key::{CacheKey, ResultKind};
use super::policy::CachingPolicy;
use super::registry::QueryRegistries;
use super::transaction::TransactionCoordinator;
use super::types::CachedValue;
use crate::metrics;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub struct CachingExecutor<X> {
    executor: X,
    coordinator: TransactionCoordinator,
    policy: Arc<dyn CachingPolicy>,
    registries: Arc<QueryRegistries>,
}

impl<X: CommandExecutor> CachingExecutor<X> {
    pub fn new(
        executor: X,
        coordinator: TransactionCoordinator,
        policy: Arc<dyn CachingPolicy>,
        registries: Arc<QueryRegistries>,
    ) -> Self {
        Self {
            executor,
            coordinator,
            policy,
            registries,
        }
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn registries(&self) -> &Arc<QueryRegistries> {
        &self.registries
    }

    /// Read on the always-cached list
    pub fn is_always_cached(&self, facts: &CommandFacts) -> bool {
        facts.is_query
            && self
                .registries
                .is_query_cached(&facts.workspace, &facts.command_text)
    }

    /// Whether a result for `facts` may be served from or stored in the cache
    pub fn is_cacheable(&self, facts: &CommandFacts) -> bool {
        if !facts.is_query {
            return false;
        }
        if self.is_always_cached(facts) {
            return true;
        }

        !facts.uses_non_deterministic_functions
            && !self
                .registries
                .is_query_blacklisted(&facts.workspace, &facts.command_text)
            && self.policy.can_be_cached(
                &facts.affected_tags,
                &facts.command_text,
                &facts.parameters,
            )
    }

    /// Cache lookup; a failing cache reads as a miss
    fn lookup(&self, command: &Command, key: &CacheKey) -> Option<CachedValue> {
        match self
            .coordinator
            .get_item(command.transaction.as_ref(), key.as_str())
        {
            Ok(value) => value,
            Err(e) => {
                warn!("Cache lookup failed for key={}, executing: {}", key, e);
                None
            }
        }
    }

    /// Store a result; failures are logged and the result is still returned
    fn store(&self, command: &Command, key: &CacheKey, value: CachedValue) {
        let facts = &command.facts;
        let expiration = self.policy.expiration(&facts.affected_tags);

        if let Err(e) = self.coordinator.put_item(
            command.transaction.as_ref(),
            key.as_str(),
            value,
            &facts.affected_tags,
            expiration,
            Some(&facts.scope),
        ) {
            warn!("Failed to cache result for key={}: {}", key, e);
        }
    }

    fn invalidate(&self, command: &Command) -> Result<()> {
        let facts = &command.facts;
        self.coordinator.invalidate_sets(
            command.transaction.as_ref(),
            &facts.affected_tags,
            Some(&facts.scope),
        )
    }

    /// Execute a reader command.
    ///
    /// Cacheable reads come back as `Rows::Cached`. On a miss the driver's
    /// reader is drained first and only a complete snapshot is stored; a
    /// failure or cancellation while draining leaves the cache untouched.
    pub async fn execute_reader(
        &self,
        command: &Command,
    ) -> std::result::Result<Rows<X::Reader>, ExecutionError<X::Error>> {
        let facts = &command.facts;
        facts.validate()?;
        let started = Instant::now();

        if !self.is_cacheable(facts) {
            let reader = self
                .executor
                .execute_reader(command)
                .await
                .map_err(ExecutionError::Executor)?;

            // Writes issued through a reader, e.g. INSERT ... RETURNING
            if !facts.is_query && !facts.affected_tags.is_empty() {
                self.invalidate(command)?;
            }

            metrics::record_execute("reader", "executor", started.elapsed().as_secs_f64());
            return Ok(Rows::Live(reader));
        }

        let key = facts.cache_key();
        match self.lookup(command, &key) {
            Some(CachedValue::Results(results)) => {
                debug!("Reader served from cache key={}", key);
                metrics::record_execute("reader", "cache", started.elapsed().as_secs_f64());
                return Ok(Rows::Cached(CachedRowReader::new(results)));
            }
            Some(CachedValue::Scalar(_)) => {
                debug!("Scalar cached under reader key={}, re-executing", key);
            }
            None => {}
        }

        let mut reader = self
            .executor
            .execute_reader(command)
            .await
            .map_err(ExecutionError::Executor)?;
        let results = Arc::new(
            materialize(&mut reader)
                .await
                .map_err(ExecutionError::Executor)?,
        );

        let rows = self.policy.cacheable_rows(&facts.affected_tags);
        if self.is_always_cached(facts) || rows.contains(results.row_count()) {
            self.store(command, &key, CachedValue::Results(Arc::clone(&results)));
        } else {
            debug!(
                "Not caching key={}: {} rows outside [{}, {}]",
                key,
                results.row_count(),
                rows.min,
                rows.max
            );
        }

        metrics::record_execute("reader", "executor", started.elapsed().as_secs_f64());
        Ok(Rows::Cached(CachedRowReader::new(results)))
    }

    /// Execute a scalar command; row bounds do not apply to scalars
    pub async fn execute_scalar(
        &self,
        command: &Command,
    ) -> std::result::Result<Value, ExecutionError<X::Error>> {
        let facts = &command.facts;
        facts.validate()?;
        let started = Instant::now();

        if !self.is_cacheable(facts) {
            let value = self
                .executor
                .execute_scalar(command)
                .await
                .map_err(ExecutionError::Executor)?;
            metrics::record_execute("scalar", "executor", started.elapsed().as_secs_f64());
            return Ok(value);
        }

        let key = facts.cache_key_for(ResultKind::Scalar);
        if let Some(CachedValue::Scalar(value)) = self.lookup(command, &key) {
            debug!("Scalar served from cache key={}", key);
            metrics::record_execute("scalar", "cache", started.elapsed().as_secs_f64());
            return Ok(value);
        }

        let value = self
            .executor
            .execute_scalar(command)
            .await
            .map_err(ExecutionError::Executor)?;
        self.store(command, &key, CachedValue::Scalar(value.clone()));

        metrics::record_execute("scalar", "executor", started.elapsed().as_secs_f64());
        Ok(value)
    }

    /// Execute a command for effect, invalidating what it touched
    pub async fn execute_non_query(
        &self,
        command: &Command,
    ) -> std::result::Result<u64, ExecutionError<X::Error>> {
        let facts = &command.facts;
        facts.validate()?;
        let started = Instant::now();

        let affected = self
            .executor
            .execute_non_query(command)
            .await
            .map_err(ExecutionError::Executor)?;

        if affected > 0 && !facts.affected_tags.is_empty() {
            self.invalidate(command)?;
        } else {
            debug!(
                "No invalidation: affected={}, tags={:?}",
                affected, facts.affected_tags
            );
        }

        metrics::record_execute("non_query", "executor", started.elapsed().as_secs_f64());
        Ok(affected)
    }
}

impl<X> std::fmt::Debug for CachingExecutor<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingExecutor")
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
