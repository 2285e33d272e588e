//! Append-only change-log of single-cell edits
//!
//! Cell edits are appended as JSON lines to
//! `changelog/<key>__changelog.jsonl` without fsync, and append failures are
//! only logged. This path is deliberately weaker than the shard writes: a
//! crash may lose the tail of the log, never the shards. Thaw replays the log
//! over the shards; freeze and compaction truncate it.

use crate::error::Result;
use crate::lock::WriteGuard;
use crate::substrate::{quote_ident, text_value, Substrate};
use crate::table::ORIGIN_ID;
use chrono::{DateTime, Utc};
use duckdb::types::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Origin id of the edited row
    pub row_id: String,
    pub column_name: String,
    pub new_value: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeLogEntry {
    pub fn new(row_id: &str, column_name: &str, new_value: Option<&str>) -> Self {
        Self {
            row_id: row_id.to_string(),
            column_name: column_name.to_string(),
            new_value: new_value.map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeLog {
    path: PathBuf,
}

impl ChangeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append entries. Best-effort: failures are logged, never returned.
    pub fn append(&self, entries: &[ChangeLogEntry]) {
        if entries.is_empty() {
            return;
        }
        if let Err(e) = self.try_append(entries) {
            log::warn!(
                "Change-log append to {} failed, {} edit(s) not logged: {}",
                self.path.display(),
                entries.len(),
                e
            );
        }
    }

    fn try_append(&self, entries: &[ChangeLogEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut buffer = String::new();
        for entry in entries {
            buffer.push_str(&serde_json::to_string(entry)?);
            buffer.push('\n');
        }
        file.write_all(buffer.as_bytes())?;
        Ok(())
    }

    /// All readable entries in append order; a torn final line is skipped
    pub fn read(&self) -> Result<Vec<ChangeLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut entries = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!(
                    "Skipping unreadable change-log line {} in {}: {}",
                    number + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn truncate(&self) -> Result<()> {
        if self.path.exists() {
            fs::write(&self.path, "")?;
        }
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Latest value per (row, column), keyed in first-seen order
pub fn latest_values(entries: &[ChangeLogEntry]) -> IndexMap<(String, String), Option<String>> {
    let mut latest = IndexMap::new();
    for entry in entries {
        latest.insert(
            (entry.row_id.clone(), entry.column_name.clone()),
            entry.new_value.clone(),
        );
    }
    latest
}

/// Apply the latest logged value of every cell to `table`.
///
/// Entries for columns the table no longer has are skipped.
pub fn replay(
    db: &Substrate,
    _guard: &WriteGuard,
    table: &str,
    entries: &[ChangeLogEntry],
) -> Result<usize> {
    if entries.is_empty() {
        return Ok(0);
    }
    let columns = db.columns(table)?;
    let mut applied = 0;

    for ((row_id, column), value) in latest_values(entries) {
        let Some(info) = columns.iter().find(|c| c.name == column) else {
            log::warn!(
                "Change-log entry for missing column '{}' in '{}' skipped",
                column,
                table
            );
            continue;
        };
        applied += db.execute_params(
            &format!(
                "UPDATE {} SET {} = CAST(CAST(? AS VARCHAR) AS {}) WHERE {} = ?",
                quote_ident(table),
                quote_ident(&info.name),
                info.data_type,
                quote_ident(ORIGIN_ID)
            ),
            &[text_value(value.as_deref()), Value::Text(row_id)],
        )?;
    }

    log::debug!("Replayed {} change-log cell(s) into '{}'", applied, table);
    Ok(applied)
}
