//! Caching policy
//!
//! Decides whether a query result may be cached, for how long, and which
//! result sizes are worth keeping. Every method has a permissive default so a
//! custom policy only overrides what it cares about.

use super::error::{CacheError, Result};
use super::types::Expiration;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Inclusive bounds on the number of rows worth caching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub min: usize,
    pub max: usize,
}

impl RowRange {
    pub const UNBOUNDED: Self = Self {
        min: 0,
        max: usize::MAX,
    };

    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, rows: usize) -> bool {
        rows >= self.min && rows <= self.max
    }
}

impl Default for RowRange {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

pub trait CachingPolicy: Send + Sync {
    /// General cacheability predicate for a read command
    fn can_be_cached(
        &self,
        _tags: &[String],
        _command_text: &str,
        _parameters: &[(String, Value)],
    ) -> bool {
        true
    }

    /// Expiration assigned to a result depending on `tags`
    fn expiration(&self, _tags: &[String]) -> Expiration {
        Expiration::NEVER
    }

    /// Row counts eligible for caching
    fn cacheable_rows(&self, _tags: &[String]) -> RowRange {
        RowRange::UNBOUNDED
    }
}

/// Overrides for a single entity set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySetPolicy {
    /// Results touching this set are never cached
    pub cacheable: bool,
    pub sliding_expiration_secs: Option<u64>,
    pub absolute_expiration_secs: Option<u64>,
}

impl Default for EntitySetPolicy {
    fn default() -> Self {
        Self {
            cacheable: true,
            sliding_expiration_secs: None,
            absolute_expiration_secs: None,
        }
    }
}

/// Configuration for the default policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Sliding window in seconds (None = no sliding expiration)
    pub sliding_expiration_secs: Option<u64>,
    /// Absolute lifetime from insertion in seconds (None = no deadline)
    pub absolute_expiration_secs: Option<u64>,
    pub min_cacheable_rows: usize,
    /// Upper row bound (None = unbounded)
    pub max_cacheable_rows: Option<usize>,
    /// Per entity set overrides
    pub entity_sets: HashMap<String, EntitySetPolicy>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            sliding_expiration_secs: Some(600), // 10 minutes
            absolute_expiration_secs: Some(3600), // 1 hour
            min_cacheable_rows: 0,
            max_cacheable_rows: None,
            entity_sets: HashMap::new(),
        }
    }
}

impl PolicyConfig {
    /// Cache everything forever, the same as the trait defaults
    pub fn unbounded() -> Self {
        Self {
            sliding_expiration_secs: None,
            absolute_expiration_secs: None,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.max_cacheable_rows {
            Some(max) if max < self.min_cacheable_rows => Err(CacheError::InvalidConfig(format!(
                "max_cacheable_rows ({}) is below min_cacheable_rows ({})",
                max, self.min_cacheable_rows
            ))),
            _ => Ok(()),
        }
    }
}

/// Policy driven by `PolicyConfig`.
///
/// When several tags carry overrides the shortest window and earliest
/// deadline win.
#[derive(Debug, Clone, Default)]
pub struct DefaultCachingPolicy {
    config: PolicyConfig,
}

impl DefaultCachingPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    fn overrides<'a>(&'a self, tags: &'a [String]) -> impl Iterator<Item = &'a EntitySetPolicy> {
        tags.iter().filter_map(|tag| self.config.entity_sets.get(tag))
    }

    fn expiration_at(&self, tags: &[String], now: DateTime<Utc>) -> Expiration {
        let sliding = self
            .overrides(tags)
            .filter_map(|set| set.sliding_expiration_secs)
            .chain(self.config.sliding_expiration_secs)
            .min()
            .map(Duration::from_secs)
            .unwrap_or(Duration::MAX);

        let absolute = self
            .overrides(tags)
            .filter_map(|set| set.absolute_expiration_secs)
            .chain(self.config.absolute_expiration_secs)
            .min()
            .and_then(|secs| TimeDelta::try_seconds(i64::try_from(secs).ok()?))
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Expiration::new(sliding, absolute)
    }
}

impl CachingPolicy for DefaultCachingPolicy {
    fn can_be_cached(
        &self,
        tags: &[String],
        _command_text: &str,
        _parameters: &[(String, Value)],
    ) -> bool {
        self.overrides(tags).all(|set| set.cacheable)
    }

    fn expiration(&self, tags: &[String]) -> Expiration {
        self.expiration_at(tags, Utc::now())
    }

    fn cacheable_rows(&self, _tags: &[String]) -> RowRange {
        RowRange::new(
            self.config.min_cacheable_rows,
            self.config.max_cacheable_rows.unwrap_or(usize::MAX),
        )
    }
}
