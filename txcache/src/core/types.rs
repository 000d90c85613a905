use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A single materialized row
pub type Row = Vec<Value>;

/// Column name and type information captured from a reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name as reported by the driver
    pub name: String,
    /// Driver-specific type name (e.g. `int4`, `nvarchar`)
    pub data_type: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Fully materialized result of a reader command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResults {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Row>,
    pub records_affected: i64,
}

impl CachedResults {
    pub fn new(columns: Vec<ColumnMetadata>, rows: Vec<Row>, records_affected: i64) -> Self {
        Self {
            columns,
            rows,
            records_affected,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Payload held by a cache entry.
///
/// Cloning is cheap: tabular results are shared behind an `Arc`, so a hit
/// hands back the very snapshot that was stored.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Results(Arc<CachedResults>),
    Scalar(Value),
}

impl CachedValue {
    pub fn results(results: CachedResults) -> Self {
        Self::Results(Arc::new(results))
    }

    pub fn as_results(&self) -> Option<&Arc<CachedResults>> {
        match self {
            Self::Results(results) => Some(results),
            Self::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            Self::Results(_) => None,
        }
    }
}

impl From<CachedResults> for CachedValue {
    fn from(results: CachedResults) -> Self {
        Self::results(results)
    }
}

impl From<Value> for CachedValue {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

/// Sliding window plus absolute deadline assigned to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    /// Reset on every successful read
    pub sliding: Duration,
    /// Fixed at insertion, never extended
    pub absolute: DateTime<Utc>,
}

impl Expiration {
    /// Never expires on either clock
    pub const NEVER: Self = Self {
        sliding: Duration::MAX,
        absolute: DateTime::<Utc>::MAX_UTC,
    };

    pub fn new(sliding: Duration, absolute: DateTime<Utc>) -> Self {
        Self { sliding, absolute }
    }

    /// Sliding window only
    pub fn sliding(sliding: Duration) -> Self {
        Self {
            sliding,
            absolute: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Absolute deadline only
    pub fn absolute(absolute: DateTime<Utc>) -> Self {
        Self {
            sliding: Duration::MAX,
            absolute,
        }
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Self::NEVER
    }
}

/// Stored entry with expiration metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CachedValue,
    /// Deduplicated dependency tags
    pub tags: Vec<String>,
    /// Scope the entry was stored under, if any
    pub scope: Option<String>,
    pub expiration: Expiration,
    pub last_access: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        value: CachedValue,
        tags: Vec<String>,
        scope: Option<String>,
        expiration: Expiration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            value,
            tags,
            scope,
            expiration,
            last_access: now,
        }
    }

    /// Check whether either clock has run out at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if now >= self.expiration.absolute {
            return true;
        }

        // A window too large to represent never runs out
        match TimeDelta::from_std(self.expiration.sliding)
            .ok()
            .and_then(|window| self.last_access.checked_add_signed(window))
        {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Refresh the sliding clock
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access = now;
    }

    /// Whether an invalidation scoped to `scope` reaches this entry
    pub fn in_scope(&self, scope: Option<&str>) -> bool {
        match (scope, self.scope.as_deref()) {
            (None, _) | (_, None) => true,
            (Some(wanted), Some(own)) => wanted == own,
        }
    }
}

/// Statistics for the cache store
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    /// Entries currently held (not yet lazily or actively removed)
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    /// Entries removed by key or tag invalidation
    pub invalidated: u64,
    /// Entries removed because a clock ran out
    pub expired: u64,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
