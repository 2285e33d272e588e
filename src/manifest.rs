//! Shard manifests
//!
//! One manifest per persisted table (and per snapshot), written after every
//! shard it lists. It always reflects exactly the shard files on disk.

use crate::error::{Result, TabcleanError};
use crate::substrate::ColumnInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One parquet shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub file_name: String,
    pub row_count: u64,
    pub byte_size: u64,
    /// blake3 of the file contents, hex
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: String,
    pub table_name: String,
    pub total_rows: u64,
    pub shard_size: usize,
    pub columns: Vec<String>,
    pub column_types: Vec<String>,
    pub shards: Vec<ShardInfo>,
    pub created: DateTime<Utc>,
}

impl Manifest {
    pub fn new(table_name: &str, shard_size: usize, columns: &[ColumnInfo]) -> Self {
        Self {
            format_version: crate::FORMAT_VERSION.to_string(),
            table_name: table_name.to_string(),
            total_rows: 0,
            shard_size,
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            column_types: columns.iter().map(|c| c.data_type.clone()).collect(),
            shards: Vec::new(),
            created: Utc::now(),
        }
    }

    pub fn push_shard(&mut self, shard: ShardInfo) {
        self.total_rows += shard.row_count;
        self.shards.push(shard);
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&content).map_err(|e| {
            log::warn!("Unreadable manifest {}: {}", path.display(), e);
            TabcleanError::InvalidManifest {
                path: path.to_path_buf(),
            }
        })?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    /// Write to `<path>.tmp`, then rename over `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Internal consistency: counts add up and column lists line up
    pub fn validate(&self, path: &Path) -> Result<()> {
        let shard_total: u64 = self.shards.iter().map(|s| s.row_count).sum();
        if shard_total != self.total_rows
            || self.columns.len() != self.column_types.len()
            || self.shards.is_empty()
        {
            return Err(TabcleanError::InvalidManifest {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    pub fn total_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.byte_size).sum()
    }
}
