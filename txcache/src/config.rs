use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::{CacheError, PolicyConfig};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TxCacheConfig {
    pub store: StoreConfig,
    pub policy: PolicyConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Active purge interval in milliseconds (0 disables the purge task)
    pub purge_interval_ms: u64,
    /// Buffers of transactions with no outcome after this long are discarded
    /// (None disables the sweep)
    pub abandoned_transaction_timeout_secs: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            purge_interval_ms: 60_000,                      // 1 minute
            abandoned_transaction_timeout_secs: Some(3600), // 1 hour
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl TxCacheConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: TxCacheConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        self.policy.validate()?;

        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(CacheError::InvalidConfig(format!(
                    "unknown logging format: {}",
                    other
                )));
            }
        }

        if self.store.abandoned_transaction_timeout_secs == Some(0) {
            return Err(CacheError::InvalidConfig(
                "abandoned_transaction_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Purge interval, if the purge task is enabled
    pub fn purge_interval(&self) -> Option<Duration> {
        let ms = self.store.purge_interval_ms;
        (ms > 0).then(|| Duration::from_millis(ms))
    }

    pub fn abandoned_transaction_timeout(&self) -> Option<Duration> {
        self.store
            .abandoned_transaction_timeout_secs
            .map(Duration::from_secs)
    }
}
