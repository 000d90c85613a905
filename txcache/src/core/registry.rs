//! Always-cached and blacklisted query registries
//!
//! Both registries are keyed by workspace identity and a fingerprint of the
//! normalized command text. They only change through explicit register,
//! unregister and clear calls; share one `QueryRegistries` instance between
//! executors that should see the same overrides.

use super::error::{CacheError, Result};
use super::key::query_fingerprint;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Set of query fingerprints grouped by workspace
#[derive(Debug)]
pub struct QueryRegistry {
    name: &'static str,
    queries: RwLock<HashMap<String, HashSet<String>>>,
}

impl QueryRegistry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            queries: RwLock::new(HashMap::new()),
        }
    }

    fn validate(workspace: &str, command_text: &str) -> Result<()> {
        if workspace.is_empty() {
            return Err(CacheError::missing("workspace"));
        }
        if command_text.trim().is_empty() {
            return Err(CacheError::missing("command_text"));
        }
        Ok(())
    }

    /// Add a query. Returns `false` if it was already registered.
    pub fn register(&self, workspace: &str, command_text: &str) -> Result<bool> {
        Self::validate(workspace, command_text)?;
        debug!("{} REGISTER workspace={}", self.name, workspace);

        Ok(self
            .queries
            .write()
            .entry(workspace.to_string())
            .or_default()
            .insert(query_fingerprint(command_text)))
    }

    /// Remove a query. Returns `true` if it was registered.
    pub fn unregister(&self, workspace: &str, command_text: &str) -> Result<bool> {
        Self::validate(workspace, command_text)?;
        debug!("{} UNREGISTER workspace={}", self.name, workspace);

        let mut queries = self.queries.write();
        let Some(set) = queries.get_mut(workspace) else {
            return Ok(false);
        };

        let removed = set.remove(&query_fingerprint(command_text));
        if set.is_empty() {
            queries.remove(workspace);
        }
        Ok(removed)
    }

    pub fn contains(&self, workspace: &str, command_text: &str) -> bool {
        let queries = self.queries.read();
        queries
            .get(workspace)
            .is_some_and(|set| set.contains(&query_fingerprint(command_text)))
    }

    /// Forget every query registered for `workspace`
    pub fn clear_workspace(&self, workspace: &str) {
        debug!("{} CLEAR workspace={}", self.name, workspace);
        self.queries.write().remove(workspace);
    }

    pub fn clear(&self) {
        debug!("{} CLEAR", self.name);
        self.queries.write().clear();
    }

    /// Total registered queries across workspaces
    pub fn len(&self) -> usize {
        self.queries.read().values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The allow-list and deny-list consulted by the caching executor
#[derive(Debug)]
pub struct QueryRegistries {
    always_cached: QueryRegistry,
    blacklisted: QueryRegistry,
}

impl QueryRegistries {
    pub fn new() -> Self {
        Self {
            always_cached: QueryRegistry::new("ALWAYS_CACHED"),
            blacklisted: QueryRegistry::new("BLACKLISTED"),
        }
    }

    pub fn always_cached(&self) -> &QueryRegistry {
        &self.always_cached
    }

    pub fn blacklisted(&self) -> &QueryRegistry {
        &self.blacklisted
    }

    pub fn add_cached_query(&self, workspace: &str, command_text: &str) -> Result<bool> {
        self.always_cached.register(workspace, command_text)
    }

    pub fn remove_cached_query(&self, workspace: &str, command_text: &str) -> Result<bool> {
        self.always_cached.unregister(workspace, command_text)
    }

    pub fn is_query_cached(&self, workspace: &str, command_text: &str) -> bool {
        self.always_cached.contains(workspace, command_text)
    }

    pub fn add_blacklisted_query(&self, workspace: &str, command_text: &str) -> Result<bool> {
        self.blacklisted.register(workspace, command_text)
    }

    pub fn remove_blacklisted_query(&self, workspace: &str, command_text: &str) -> Result<bool> {
        self.blacklisted.unregister(workspace, command_text)
    }

    pub fn is_query_blacklisted(&self, workspace: &str, command_text: &str) -> bool {
        self.blacklisted.contains(workspace, command_text)
    }
}

impl Default for QueryRegistries {
    fn default() -> Self {
        Self::new()
    }
}
