//! FieldOps Configuration

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FieldOpsError, FieldOpsResult};

/// Environment variable naming the JSON config file
pub const CONFIG_ENV: &str = "FIELDOPS_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOpsConfig {
    /// Statistics engine
    pub stats: StatsConfig,
    /// Platform usage counters
    pub usage: UsageConfig,
}

/// Statistics engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Company partition collection
    pub company_collection: String,
    /// Company+client partition collection
    pub client_collection: String,
    /// Company+server partition collection
    pub server_collection: String,
    /// Bounded queue between the access layer and the stats worker
    pub dispatcher_queue_size: usize,
    /// Upper bound on top-N analytics queries
    pub top_limit_cap: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            company_collection: "company_stats".into(),
            client_collection: "client_stats".into(),
            server_collection: "server_stats".into(),
            dispatcher_queue_size: 1024,
            top_limit_cap: 100,
        }
    }
}

/// Platform usage counter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    pub collection: String,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            collection: "usage_stats".into(),
        }
    }
}

impl FieldOpsConfig {
    /// Read and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> FieldOpsResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| FieldOpsError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| FieldOpsError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> FieldOpsResult<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| FieldOpsError::Config(e.to_string()))?;
        fs::write(path, content)
            .map_err(|e| FieldOpsError::Config(format!("{}: {e}", path.display())))
    }

    /// Reject settings the dispatcher and analytics cannot run with
    pub fn validate(&self) -> FieldOpsResult<()> {
        if self.stats.dispatcher_queue_size == 0 {
            return Err(FieldOpsError::Config(
                "stats.dispatcher_queue_size must be at least 1".into(),
            ));
        }
        if self.stats.top_limit_cap == 0 {
            return Err(FieldOpsError::Config("stats.top_limit_cap must be at least 1".into()));
        }
        let collections = [
            &self.stats.company_collection,
            &self.stats.client_collection,
            &self.stats.server_collection,
            &self.usage.collection,
        ];
        if collections.iter().any(|c| c.trim().is_empty()) {
            return Err(FieldOpsError::Config("collection names must not be empty".into()));
        }
        Ok(())
    }

    /// Load from the file named by `FIELDOPS_CONFIG`, falling back to defaults
    pub fn from_env() -> Self {
        let Some(path) = std::env::var_os(CONFIG_ENV).map(PathBuf::from) else {
            return Self::default();
        };
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "config not loaded, using defaults");
            Self::default()
        })
    }
}
