use super::error::{CacheError, Result};
use super::key::{CacheKey, ResultKind};
use super::store::validate_tags;
use super::transaction::TransactionHandle;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the data-access adapter knows about a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFacts {
    /// Pure read (no mutation)
    pub is_query: bool,
    /// Uses functions such as `NOW()` or `NEWID()`
    pub uses_non_deterministic_functions: bool,
    /// Entity sets read or written by the command
    pub affected_tags: Vec<String>,
    pub command_text: String,
    /// Target database or store name
    pub scope: String,
    /// Model/workspace identity used by the query registries. Defaults to
    /// the scope.
    pub workspace: String,
    /// Ordered parameter name/value pairs
    pub parameters: Vec<(String, Value)>,
}

impl CommandFacts {
    /// A read command
    pub fn query(scope: impl Into<String>, command_text: impl Into<String>) -> Self {
        let scope = scope.into();
        Self {
            is_query: true,
            uses_non_deterministic_functions: false,
            affected_tags: Vec::new(),
            command_text: command_text.into(),
            workspace: scope.clone(),
            scope,
            parameters: Vec::new(),
        }
    }

    /// A mutating command
    pub fn write(scope: impl Into<String>, command_text: impl Into<String>) -> Self {
        Self {
            is_query: false,
            ..Self::query(scope, command_text)
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    /// Registry lookups use this workspace instead of the scope
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn non_deterministic(mut self) -> Self {
        self.uses_non_deterministic_functions = true;
        self
    }

    /// Key under which this command's rows are cached
    pub fn cache_key(&self) -> CacheKey {
        self.cache_key_for(ResultKind::Rows)
    }

    pub fn cache_key_for(&self, kind: ResultKind) -> CacheKey {
        CacheKey::for_kind(kind, &self.scope, &self.command_text, &self.parameters)
    }

    /// Check the facts before anything is executed
    pub fn validate(&self) -> Result<()> {
        if self.command_text.trim().is_empty() {
            return Err(CacheError::missing("command_text"));
        }
        validate_tags(&self.affected_tags)
    }
}

/// A command plus the transaction it runs under, if any
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub facts: CommandFacts,
    pub transaction: Option<TransactionHandle>,
}

impl Command {
    pub fn new(facts: CommandFacts) -> Self {
        Self {
            facts,
            transaction: None,
        }
    }

    pub fn in_transaction(mut self, transaction: TransactionHandle) -> Self {
        self.transaction = Some(transaction);
        self
    }
}

impl From<CommandFacts> for Command {
    fn from(facts: CommandFacts) -> Self {
        Self::new(facts)
    }
}
