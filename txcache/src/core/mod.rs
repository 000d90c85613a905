pub mod caching_executor;
pub mod command;
pub mod error;
pub mod executor;
pub mod key;
pub mod policy;
pub mod registry;
pub mod store;
pub mod transaction;
pub mod types;

pub use caching_executor::CachingExecutor;
pub use command::{Command, CommandFacts};
pub use error::{CacheError, ExecutionError, Result};
pub use executor::{CachedRowReader, CommandExecutor, RowReader, Rows, materialize};
pub use key::{CacheKey, ResultKind, normalize_command_text, query_fingerprint};
pub use policy::{CachingPolicy, DefaultCachingPolicy, EntitySetPolicy, PolicyConfig, RowRange};
pub use registry::{QueryRegistries, QueryRegistry};
pub use store::{Cache, InMemoryCache};
pub use transaction::{TransactionCoordinator, TransactionHandle};
pub use types::{
    CacheEntry, CacheStats, CachedResults, CachedValue, ColumnMetadata, Expiration, Row,
};
