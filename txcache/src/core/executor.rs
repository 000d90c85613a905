//! Execution seam
//!
//! The cache never talks to a database itself. Callers plug in a
//! `CommandExecutor` that runs commands against the real store; the caching
//! executor decides when to call it and what to keep from the result.

use super::command::Command;
use super::types::{CachedResults, ColumnMetadata, Row};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Forward-only access to the rows produced by a reader command
#[async_trait]
pub trait RowReader: Send {
    type Error: Send;

    fn columns(&self) -> &[ColumnMetadata];

    /// Next row, or `None` once the reader is exhausted
    async fn next_row(&mut self) -> Result<Option<Row>, Self::Error>;

    /// Rows affected as reported by the driver (`-1` for plain selects)
    fn records_affected(&self) -> i64;
}

/// Runs commands against the underlying store
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Reader: RowReader<Error = Self::Error>;

    async fn execute_reader(&self, command: &Command) -> Result<Self::Reader, Self::Error>;

    async fn execute_scalar(&self, command: &Command) -> Result<Value, Self::Error>;

    /// Run for effect; returns the affected row count
    async fn execute_non_query(&self, command: &Command) -> Result<u64, Self::Error>;
}

/// Drain `reader` into a snapshot.
///
/// Any error aborts the whole read; nothing partial is returned.
pub async fn materialize<R: RowReader>(reader: &mut R) -> Result<CachedResults, R::Error> {
    let mut rows = Vec::new();
    while let Some(row) = reader.next_row().await? {
        rows.push(row);
    }

    Ok(CachedResults::new(
        reader.columns().to_vec(),
        rows,
        reader.records_affected(),
    ))
}

/// Replays a cached snapshot with the same surface as a live reader
#[derive(Debug, Clone)]
pub struct CachedRowReader {
    results: Arc<CachedResults>,
    position: usize,
}

impl CachedRowReader {
    pub fn new(results: Arc<CachedResults>) -> Self {
        Self {
            results,
            position: 0,
        }
    }

    pub fn results(&self) -> &Arc<CachedResults> {
        &self.results
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.results.columns
    }

    pub fn next_row(&mut self) -> Option<Row> {
        let row = self.results.rows.get(self.position).cloned();
        if row.is_some() {
            self.position += 1;
        }
        row
    }

    pub fn records_affected(&self) -> i64 {
        self.results.records_affected
    }
}

/// Rows handed back by the caching executor
#[derive(Debug)]
pub enum Rows<R> {
    /// Straight from the driver (command was not cacheable)
    Live(R),
    /// Served from, or materialized into, a snapshot
    Cached(CachedRowReader),
}

impl<R> Rows<R> {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    /// The snapshot, when rows were served from one
    pub fn snapshot(&self) -> Option<&Arc<CachedResults>> {
        match self {
            Self::Cached(reader) => Some(reader.results()),
            Self::Live(_) => None,
        }
    }
}

#[async_trait]
impl<R: RowReader> RowReader for Rows<R> {
    type Error = R::Error;

    fn columns(&self) -> &[ColumnMetadata] {
        match self {
            Self::Live(reader) => reader.columns(),
            Self::Cached(reader) => reader.columns(),
        }
    }

    async fn next_row(&mut self) -> Result<Option<Row>, Self::Error> {
        match self {
            Self::Live(reader) => reader.next_row().await,
            Self::Cached(reader) => Ok(reader.next_row()),
        }
    }

    fn records_affected(&self) -> i64 {
        match self {
            Self::Live(reader) => reader.records_affected(),
            Self::Cached(reader) => reader.records_affected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;

    #[derive(Debug, PartialEq)]
    struct Interrupted;

    struct VecReader {
        columns: Vec<ColumnMetadata>,
        rows: VecDeque<Row>,
        fail_after: Option<usize>,
        served: usize,
    }

    #[async_trait]
    impl RowReader for VecReader {
        type Error = Interrupted;

        fn columns(&self) -> &[ColumnMetadata] {
            &self.columns
        }

        async fn next_row(&mut self) -> Result<Option<Row>, Interrupted> {
            if self.fail_after == Some(self.served) {
                return Err(Interrupted);
            }
            self.served += 1;
            Ok(self.rows.pop_front())
        }

        fn records_affected(&self) -> i64 {
            -1
        }
    }

    fn reader(fail_after: Option<usize>) -> VecReader {
        VecReader {
            columns: vec![ColumnMetadata::new("id", "int4")],
            rows: VecDeque::from(vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]),
            fail_after,
            served: 0,
        }
    }

    #[tokio::test]
    async fn test_materialize() {
        let results = materialize(&mut reader(None)).await.unwrap();

        assert_eq!(results.row_count(), 3);
        assert_eq!(results.columns[0].name, "id");
        assert_eq!(results.records_affected, -1);
    }

    #[tokio::test]
    async fn test_materialize_interrupted() {
        let result = materialize(&mut reader(Some(2))).await;
        assert_eq!(result.unwrap_err(), Interrupted);
    }

    #[tokio::test]
    async fn test_cached_reader_replays_snapshot() {
        let results = Arc::new(materialize(&mut reader(None)).await.unwrap());
        let mut rows: Rows<VecReader> = Rows::Cached(CachedRowReader::new(results.clone()));

        assert!(rows.is_cached());
        assert!(Arc::ptr_eq(rows.snapshot().unwrap(), &results));

        let replayed = materialize(&mut rows).await.unwrap();
        assert_eq!(replayed, *results);
        assert_eq!(rows.next_row().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_live_rows_delegate() {
        let mut rows = Rows::Live(reader(None));
        assert!(!rows.is_cached());
        assert_eq!(rows.next_row().await.unwrap(), Some(vec![json!(1)]));
        assert_eq!(rows.columns().len(), 1);
    }
}
