//! In-memory cache store
//!
//! Entries are keyed by opaque strings and carry the dependency tags (entity
//! sets) they were computed from. A reverse index from tag to keys keeps tag
//! invalidation proportional to the number of affected entries.
//!
//! Two independent passes remove stale entries:
//! - lazy expiry inside `get_item`
//! - active expiry in `purge`, optionally driven by a background task
//!
//! Both take the same write lock and only ever remove, so they can run in any
//! order without coordinating.

use super::error::{CacheError, Result};
use super::types::{CacheEntry, CacheStats, CachedValue, Expiration};
use crate::metrics;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Storage seam used by the transaction coordinator
pub trait Cache: Send + Sync {
    /// Look up a visible entry, refreshing its sliding clock
    fn get_item(&self, key: &str) -> Result<Option<CachedValue>>;

    /// Insert or replace an entry
    fn put_item(
        &self,
        key: &str,
        value: CachedValue,
        tags: &[String],
        expiration: Expiration,
        scope: Option<&str>,
    ) -> Result<()>;

    /// Remove every entry depending on any of `tags`
    fn invalidate_sets(&self, tags: &[String], scope: Option<&str>) -> Result<()>;

    /// Remove a single entry
    fn invalidate_item(&self, key: &str) -> Result<()>;
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CacheError::missing("key"));
    }
    Ok(())
}

pub(crate) fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.iter().any(|tag| tag.is_empty()) {
        return Err(CacheError::InvalidArgument {
            param: "tags",
            reason: "dependency tags must not be empty strings",
        });
    }
    Ok(())
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, CacheEntry>,
    /// tag -> keys of entries depending on it
    tag_index: HashMap<String, HashSet<String>>,
}

impl StoreState {
    fn insert(&mut self, key: String, entry: CacheEntry) {
        self.remove(&key);
        for tag in &entry.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        Some(entry)
    }
}

/// Thread-safe in-memory cache store
#[derive(Clone)]
pub struct InMemoryCache {
    state: Arc<RwLock<StoreState>>,
    stats: Arc<RwLock<CacheStats>>,
}

impl InMemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        info!("Initializing in-memory result cache");

        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    /// Start background purge task
    pub fn start_purge_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        info!("Starting cache purge task (interval={}ms)", interval.as_millis());

        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                cache.purge();
            }
        })
    }

    /// Look up `key`, removing it if either clock has run out
    pub fn get_item(&self, key: &str) -> Result<Option<CachedValue>> {
        self.get_item_at(key, Utc::now())
    }

    fn get_item_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CachedValue>> {
        validate_key(key)?;
        debug!("GET key={}", key);

        let mut state = self.state.write();
        let mut stats = self.stats.write();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                entry.touch(now);
                stats.hits += 1;
                metrics::record_lookup("hit");
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            debug!("Key expired: {}", key);
            state.remove(key);
            stats.expired += 1;
            stats.entries = state.entries.len();
        }

        stats.misses += 1;
        metrics::record_lookup("miss");
        Ok(None)
    }

    /// Insert or replace `key`
    pub fn put_item(
        &self,
        key: &str,
        value: CachedValue,
        tags: &[String],
        expiration: Expiration,
        scope: Option<&str>,
    ) -> Result<()> {
        validate_key(key)?;
        validate_tags(tags)?;
        debug!("PUT key={}, tags={:?}, scope={:?}", key, tags, scope);

        let mut deduped: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !deduped.contains(tag) {
                deduped.push(tag.clone());
            }
        }

        let entry = CacheEntry::new(
            value,
            deduped,
            scope.map(str::to_string),
            expiration,
            Utc::now(),
        );

        let mut state = self.state.write();
        state.insert(key.to_string(), entry);

        let mut stats = self.stats.write();
        stats.puts += 1;
        stats.entries = state.entries.len();
        metrics::record_put();

        Ok(())
    }

    /// Remove a single entry; no-op when absent
    pub fn invalidate_item(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        debug!("INVALIDATE key={}", key);

        let mut state = self.state.write();
        if state.remove(key).is_some() {
            let mut stats = self.stats.write();
            stats.invalidated += 1;
            stats.entries = state.entries.len();
        }

        Ok(())
    }

    /// Remove every entry whose tags intersect `tags`.
    ///
    /// With a scope, only entries stored under that scope (or without any
    /// scope) are touched.
    pub fn invalidate_sets(&self, tags: &[String], scope: Option<&str>) -> Result<()> {
        validate_tags(tags)?;
        debug!("INVALIDATE SETS tags={:?}, scope={:?}", tags, scope);

        let mut state = self.state.write();

        let mut doomed: HashSet<String> = HashSet::new();
        for tag in tags {
            if let Some(keys) = state.tag_index.get(tag) {
                doomed.extend(
                    keys.iter()
                        .filter(|key| {
                            state
                                .entries
                                .get(key.as_str())
                                .is_some_and(|entry| entry.in_scope(scope))
                        })
                        .cloned(),
                );
            }
        }

        let removed = doomed.len();
        for key in doomed {
            state.remove(&key);
        }

        if removed > 0 {
            debug!("Invalidated {} entries", removed);
            let mut stats = self.stats.write();
            stats.invalidated += removed as u64;
            stats.entries = state.entries.len();
        }

        Ok(())
    }

    /// Remove every entry that is no longer visible. Returns the number removed.
    pub fn purge(&self) -> usize {
        self.purge_at(Utc::now())
    }

    fn purge_at(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write();

        let expired_keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        let count = expired_keys.len();
        if count > 0 {
            debug!("Purging {} expired entries", count);
            for key in expired_keys {
                state.remove(&key);
            }

            let mut stats = self.stats.write();
            stats.expired += count as u64;
            stats.entries = state.entries.len();
            metrics::record_purged(count);
        }

        count
    }

    /// Number of entries not yet lazily or actively removed
    pub fn count(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Dependency tags recorded for `key`, if present
    pub fn entry_tags(&self, key: &str) -> Option<Vec<String>> {
        self.state
            .read()
            .entries
            .get(key)
            .map(|entry| entry.tags.clone())
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut state = self.state.write();
        let removed = state.entries.len();
        state.entries.clear();
        state.tag_index.clear();

        let mut stats = self.stats.write();
        stats.invalidated += removed as u64;
        stats.entries = 0;
    }

    /// Get statistics
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().clone();
        stats.entries = self.count();
        stats
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for InMemoryCache {
    fn get_item(&self, key: &str) -> Result<Option<CachedValue>> {
        InMemoryCache::get_item(self, key)
    }

    fn put_item(
        &self,
        key: &str,
        value: CachedValue,
        tags: &[String],
        expiration: Expiration,
        scope: Option<&str>,
    ) -> Result<()> {
        InMemoryCache::put_item(self, key, value, tags, expiration, scope)
    }

    fn invalidate_sets(&self, tags: &[String], scope: Option<&str>) -> Result<()> {
        InMemoryCache::invalidate_sets(self, tags, scope)
    }

    fn invalidate_item(&self, key: &str) -> Result<()> {
        InMemoryCache::invalidate_item(self, key)
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("entries", &self.count())
            .finish()
    }
}
