//! Transaction-aware second-level result cache.
//!
//! Sits in front of a data-access layer and caches query results keyed by
//! scope, command text and parameters. Writes invalidate cached results by
//! the entity sets they touch; inside an open transaction reads bypass the
//! cache and invalidations wait for the commit.

pub mod config;
pub mod core;
pub mod engine;
pub mod logging;
pub mod metrics;

// Re-export commonly used types
pub use config::{LoggingConfig, StoreConfig, TxCacheConfig};
pub use core::{
    Cache, CacheError, CacheKey, CacheStats, CachedResults, CachedRowReader, CachedValue,
    CachingExecutor, CachingPolicy, ColumnMetadata, Command, CommandExecutor, CommandFacts,
    DefaultCachingPolicy, EntitySetPolicy, ExecutionError, Expiration, InMemoryCache,
    PolicyConfig, QueryRegistries, QueryRegistry, ResultKind, Row, RowRange, RowReader, Rows,
    TransactionCoordinator, TransactionHandle,
};
pub use engine::TxCache;
