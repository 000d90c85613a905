//! Transaction-scoped invalidation
//!
//! Wraps a `Cache` so that work done under an open transaction never touches
//! the shared cache directly:
//! - reads inside a transaction always miss
//! - puts inside a transaction are dropped
//! - invalidations inside a transaction are buffered until commit
//!
//! Each transaction moves through `NoBuffer -> Buffering -> Flushed | Discarded`.
//! The buffer is created on the first deferred invalidation and removed on
//! either outcome.

use super::error::Result;
use super::store::{Cache, validate_key, validate_tags};
use super::types::{CachedValue, Expiration};
use crate::metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque identity of a transaction, compared only for equality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHandle(Uuid);

impl TransactionHandle {
    /// Allocate a fresh handle
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TransactionHandle {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Invalidations buffered for one open transaction
#[derive(Debug)]
struct PendingInvalidation {
    tags: Vec<String>,
    opened_at: Instant,
}

impl PendingInvalidation {
    fn new() -> Self {
        Self {
            tags: Vec::new(),
            opened_at: Instant::now(),
        }
    }

    /// Buffered tags with duplicates removed, first occurrence wins
    fn into_distinct_tags(self) -> Vec<String> {
        let mut distinct: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in self.tags {
            if !distinct.contains(&tag) {
                distinct.push(tag);
            }
        }
        distinct
    }
}

/// Open buffers of one coordinator. Each buffer counts once in the
/// process-wide pending gauge until it is removed or the map is dropped.
#[derive(Default)]
struct PendingBuffers(HashMap<TransactionHandle, PendingInvalidation>);

impl Drop for PendingBuffers {
    fn drop(&mut self) {
        metrics::pending_transactions_closed(self.0.len());
    }
}

/// Routes cache traffic according to the caller's transaction
#[derive(Clone)]
pub struct TransactionCoordinator {
    cache: Arc<dyn Cache>,
    pending: Arc<Mutex<PendingBuffers>>,
}

impl TransactionCoordinator {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            pending: Arc::new(Mutex::new(PendingBuffers::default())),
        }
    }

    /// The underlying cache
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Look up `key`. Always a miss inside a transaction.
    pub fn get_item(
        &self,
        transaction: Option<&TransactionHandle>,
        key: &str,
    ) -> Result<Option<CachedValue>> {
        validate_key(key)?;

        match transaction {
            None => self.cache.get_item(key),
            Some(tx) => {
                debug!("GET bypassed key={}, transaction={}", key, tx);
                metrics::record_lookup("bypass");
                Ok(None)
            }
        }
    }

    /// Store a result. Silently skipped inside a transaction.
    pub fn put_item(
        &self,
        transaction: Option<&TransactionHandle>,
        key: &str,
        value: CachedValue,
        tags: &[String],
        expiration: Expiration,
        scope: Option<&str>,
    ) -> Result<()> {
        validate_key(key)?;
        validate_tags(tags)?;

        match transaction {
            None => self.cache.put_item(key, value, tags, expiration, scope),
            Some(tx) => {
                debug!("PUT skipped key={}, transaction={}", key, tx);
                Ok(())
            }
        }
    }

    /// Invalidate now, or defer until `transaction` commits
    pub fn invalidate_sets(
        &self,
        transaction: Option<&TransactionHandle>,
        tags: &[String],
        scope: Option<&str>,
    ) -> Result<()> {
        validate_tags(tags)?;

        let Some(tx) = transaction else {
            metrics::record_invalidation("immediate", tags.len());
            return self.cache.invalidate_sets(tags, scope);
        };

        debug!("INVALIDATE deferred tags={:?}, transaction={}", tags, tx);
        let mut pending = self.pending.lock();
        let buffer = match pending.0.entry(*tx) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                metrics::pending_transaction_opened();
                entry.insert(PendingInvalidation::new())
            }
        };
        buffer.tags.extend(tags.iter().cloned());
        metrics::record_invalidation("deferred", tags.len());

        Ok(())
    }

    /// Apply everything buffered for `transaction`, scoped to `scope`.
    ///
    /// The buffer leaves the map before the cache is touched, and the flush
    /// completes before this returns.
    pub fn committed(&self, transaction: &TransactionHandle, scope: &str) -> Result<()> {
        let Some(buffer) = self.take(transaction) else {
            debug!("COMMIT transaction={} (nothing buffered)", transaction);
            return Ok(());
        };

        let tags = buffer.into_distinct_tags();
        debug!(
            "COMMIT transaction={}, flushing tags={:?}, scope={}",
            transaction, tags, scope
        );
        metrics::record_invalidation("flushed", tags.len());
        self.cache.invalidate_sets(&tags, Some(scope))
    }

    /// Discard everything buffered for `transaction`
    pub fn rolled_back(&self, transaction: &TransactionHandle) {
        if let Some(buffer) = self.take(transaction) {
            debug!(
                "ROLLBACK transaction={}, discarding {} tags",
                transaction,
                buffer.tags.len()
            );
            metrics::record_invalidation("discarded", buffer.tags.len());
        }
    }

    fn take(&self, transaction: &TransactionHandle) -> Option<PendingInvalidation> {
        let buffer = self.pending.lock().0.remove(transaction);
        if buffer.is_some() {
            metrics::pending_transactions_closed(1);
        }
        buffer
    }

    /// Tags currently buffered for `transaction`, in arrival order
    pub fn pending_tags(&self, transaction: &TransactionHandle) -> Option<Vec<String>> {
        self.pending
            .lock()
            .0
            .get(transaction)
            .map(|buffer| buffer.tags.clone())
    }

    /// Number of transactions holding a buffer
    pub fn pending_transactions(&self) -> usize {
        self.pending.lock().0.len()
    }

    /// Drop buffers that have waited longer than `max_age` for an outcome.
    ///
    /// A transaction that is never committed nor rolled back would otherwise
    /// keep its buffer forever. Discarding is the rollback outcome: if such a
    /// transaction does commit later, its invalidations are lost, so pick a
    /// timeout well above the longest legitimate transaction.
    pub fn discard_abandoned(&self, max_age: Duration) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.0.len();

        pending.0.retain(|tx, buffer| {
            let keep = buffer.opened_at.elapsed() < max_age;
            if !keep {
                warn!(
                    "Discarding invalidations of abandoned transaction={} ({} tags)",
                    tx,
                    buffer.tags.len()
                );
                metrics::record_invalidation("discarded", buffer.tags.len());
            }
            keep
        });

        let discarded = before - pending.0.len();
        metrics::pending_transactions_closed(discarded);
        discarded
    }

    /// Start background sweep of abandoned transaction buffers
    pub fn start_abandoned_sweep(
        &self,
        interval: Duration,
        max_age: Duration,
    ) -> tokio::task::JoinHandle<()> {
        info!(
            "Starting abandoned transaction sweep (interval={}ms, max_age={}s)",
            interval.as_millis(),
            max_age.as_secs()
        );

        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                coordinator.discard_abandoned(max_age);
            }
        })
    }
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("pending_transactions", &self.pending_transactions())
            .finish()
    }
}
