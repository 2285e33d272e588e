//! Engine configuration stored in `.tabclean/config.json`

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunables shared by every component of the engine.
///
/// Missing fields fall back to the defaults, so older config files keep
/// loading after new settings are introduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub format_version: String,
    /// Rows per parquet shard. One value for the whole workspace.
    pub shard_size: usize,
    /// Above this many affected rows no per-cell audit detail is kept.
    pub audit_row_cap: u64,
    /// Detail rows per INSERT statement.
    pub audit_batch_size: usize,
    /// Change-log entries that trigger a compaction.
    pub compaction_threshold: usize,
    /// Snapshots kept per table before old history is pruned.
    pub max_snapshots: usize,
    /// DuckDB memory limit, e.g. "4GB".
    pub memory_limit: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            format_version: crate::FORMAT_VERSION.to_string(),
            shard_size: crate::DEFAULT_SHARD_SIZE,
            audit_row_cap: crate::DEFAULT_AUDIT_ROW_CAP,
            audit_batch_size: crate::DEFAULT_AUDIT_BATCH_SIZE,
            compaction_threshold: crate::DEFAULT_COMPACTION_THRESHOLD,
            max_snapshots: crate::DEFAULT_MAX_SNAPSHOTS,
            memory_limit: "4GB".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load the config file, or defaults when it does not exist yet
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.shard_size == 0 {
            return Err(crate::error::TabcleanError::config("shard_size must be greater than 0"));
        }
        if self.audit_batch_size == 0 {
            return Err(crate::error::TabcleanError::config(
                "audit_batch_size must be greater than 0",
            ));
        }
        if self.max_snapshots == 0 {
            return Err(crate::error::TabcleanError::config("max_snapshots must be at least 1"));
        }
        Ok(())
    }
}
