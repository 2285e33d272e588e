//! Workspace management for tabclean operations

use crate::config::EngineConfig;
use crate::error::{Result, TabcleanError};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const STATE_DIR: &str = ".tabclean";

/// Manages the .tabclean workspace directory
#[derive(Debug, Clone)]
pub struct TabcleanWorkspace {
    /// Project root directory (where .tabclean/ lives)
    pub root: PathBuf,
    /// .tabclean/ directory path
    pub state_dir: PathBuf,
    /// .tabclean/shards/ holds parquet shards and manifests
    pub shards_dir: PathBuf,
    pub changelog_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub timelines_dir: PathBuf,
}

impl TabcleanWorkspace {
    /// Find existing workspace or create a new one
    pub fn find_or_create(start_dir: Option<&Path>) -> Result<Self> {
        let current_dir = std::env::current_dir()?;
        let start = start_dir.unwrap_or(&current_dir);

        if let Some(workspace) = Self::find_existing(start)? {
            return Ok(workspace);
        }

        Self::create_new(start.to_path_buf())
    }

    /// Find existing .tabclean workspace by walking up directory tree
    pub fn find_existing(start_dir: &Path) -> Result<Option<Self>> {
        let mut current = start_dir;

        loop {
            let state_dir = current.join(STATE_DIR);
            if state_dir.is_dir() {
                return Ok(Some(Self::from_root(current.to_path_buf())?));
            }

            // A git root without a workspace is where a new one would go
            if current.join(".git").exists() {
                break;
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        Ok(None)
    }

    /// Create a new workspace in the specified root directory
    pub fn create_new(root: PathBuf) -> Result<Self> {
        let workspace = Self::from_root(root)?;

        for dir in workspace.dirs() {
            fs::create_dir_all(dir)?;
        }

        if !workspace.config_path().exists() {
            EngineConfig::default().save(&workspace.config_path())?;
        }
        if !workspace.index_path().exists() {
            TableIndex::default().save(&workspace.index_path())?;
        }

        workspace.ensure_gitignore()?;

        log::info!("Created tabclean workspace at: {}", workspace.root.display());

        Ok(workspace)
    }

    /// Create workspace from root directory path
    pub fn from_root(root: PathBuf) -> Result<Self> {
        let state_dir = root.join(STATE_DIR);

        Ok(Self {
            shards_dir: state_dir.join("shards"),
            changelog_dir: state_dir.join("changelog"),
            snapshots_dir: state_dir.join("snapshots"),
            timelines_dir: state_dir.join("timelines"),
            state_dir,
            root,
        })
    }

    fn dirs(&self) -> [&PathBuf; 5] {
        [
            &self.state_dir,
            &self.shards_dir,
            &self.changelog_dir,
            &self.snapshots_dir,
            &self.timelines_dir,
        ]
    }

    pub fn exists(&self) -> bool {
        self.state_dir.is_dir()
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.json")
    }

    pub fn index_path(&self) -> PathBuf {
        self.state_dir.join("index.json")
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("engine.duckdb")
    }

    pub fn load_config(&self) -> Result<EngineConfig> {
        EngineConfig::load(&self.config_path())
    }

    pub fn load_index(&self) -> Result<TableIndex> {
        TableIndex::load(&self.index_path())
    }

    pub fn save_index(&self, index: &TableIndex) -> Result<()> {
        index.save(&self.index_path())
    }

    pub fn manifest_path(&self, key: &str) -> PathBuf {
        self.shards_dir.join(format!("{}__manifest.json", key))
    }

    pub fn shard_file_name(key: &str, index: usize) -> String {
        format!("{}__shard_{:05}.parquet", key, index)
    }

    pub fn changelog_path(&self, key: &str) -> PathBuf {
        self.changelog_dir.join(format!("{}__changelog.jsonl", key))
    }

    /// Directory holding every snapshot of one table
    pub fn snapshot_root(&self, key: &str) -> PathBuf {
        self.snapshots_dir.join(key)
    }

    /// Shard directory of a single snapshot
    pub fn snapshot_dir(&self, key: &str, snapshot_id: &str) -> PathBuf {
        self.snapshot_root(key).join(snapshot_id)
    }

    pub fn timeline_path(&self, key: &str) -> PathBuf {
        self.timelines_dir.join(format!("{}.json", key))
    }

    /// Every file in the shard directory that belongs to `key`, found by
    /// prefix rather than through the manifest
    pub fn files_with_key_prefix(&self, key: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}__", key);
        let mut files = Vec::new();
        if !self.shards_dir.exists() {
            return Ok(files);
        }
        for entry in fs::read_dir(&self.shards_dir)? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with(&prefix) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Ensure .gitignore keeps the binary workspace state out of commits
    pub fn ensure_gitignore(&self) -> Result<()> {
        let gitignore_path = self.root.join(".gitignore");
        let marker = ".tabclean/shards/";
        let block = "# tabclean binary state\n.tabclean/shards/\n.tabclean/snapshots/\n.tabclean/engine.duckdb*\n";

        if gitignore_path.exists() {
            let content = fs::read_to_string(&gitignore_path)?;
            if !content.contains(marker) {
                let new_content = if content.ends_with('\n') {
                    format!("{}\n{}", content, block)
                } else {
                    format!("{}\n\n{}", content, block)
                };
                fs::write(gitignore_path, new_content)?;
                log::info!("Updated .gitignore with tabclean entries");
            }
        } else {
            fs::write(gitignore_path, block)?;
            log::info!("Created .gitignore with tabclean entries");
        }

        Ok(())
    }

    /// Remove files whose table no longer appears in the index, plus any
    /// `.tmp` leftovers from interrupted writes
    pub fn sweep_orphans(&self, index: &TableIndex) -> Result<CleanupStats> {
        let known: HashSet<&str> = index.tables.iter().map(|t| t.key.as_str()).collect();
        let mut stats = CleanupStats::default();

        for dir in [&self.shards_dir, &self.changelog_dir, &self.timelines_dir] {
            if !dir.exists() {
                continue;
            }
            for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                let key = file_key(&name);
                if name.ends_with(".tmp") || !known.contains(key) {
                    stats.bytes_freed += entry.metadata()?.len();
                    fs::remove_file(entry.path())?;
                    stats.files_removed += 1;
                    log::info!("Removed orphaned file: {}", entry.path().display());
                }
            }
        }

        if self.snapshots_dir.exists() {
            for entry in WalkDir::new(&self.snapshots_dir).min_depth(1).max_depth(1) {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if entry.file_type().is_dir() && !known.contains(name.as_str()) {
                    stats.bytes_freed += dir_size(entry.path())?;
                    fs::remove_dir_all(entry.path())?;
                    stats.files_removed += 1;
                    log::info!("Removed orphaned snapshots: {}", entry.path().display());
                }
            }
        }

        Ok(stats)
    }

    /// Get workspace statistics
    pub fn stats(&self) -> Result<WorkspaceStats> {
        let index = self.load_index()?;
        let mut stats = WorkspaceStats {
            table_count: index.tables.len(),
            frozen_count: index.tables.iter().filter(|t| t.frozen).count(),
            ..Default::default()
        };

        if self.shards_dir.exists() {
            for entry in WalkDir::new(&self.shards_dir) {
                let entry = entry?;
                if entry.file_type().is_file() && entry.path().extension().map_or(false, |e| e == "parquet") {
                    stats.shard_count += 1;
                    stats.total_shard_size += entry.metadata()?.len();
                }
            }
        }
        stats.total_snapshot_size = dir_size(&self.snapshots_dir)?;
        stats.total_changelog_size = dir_size(&self.changelog_dir)?;

        Ok(stats)
    }
}

/// Key part of a workspace file name: everything before `__` or the first dot
fn file_key(file_name: &str) -> &str {
    if let Some(pos) = file_name.find("__") {
        &file_name[..pos]
    } else {
        file_name.split('.').next().unwrap_or(file_name)
    }
}

fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    if !path.exists() {
        return Ok(0);
    }
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

static NAME_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^a-z0-9]+").expect("separator pattern is valid"));

/// Normalize a display name into the key used for files and the live table.
///
/// Lowercase, every run of non-alphanumeric characters becomes one `_`,
/// leading and trailing `_` are trimmed. A key therefore never contains
/// `__`, which separates the key from the suffix in file names.
pub fn normalize_table_name(name: &str) -> Result<String> {
    let lowered = name.to_lowercase();
    let key = NAME_SEPARATORS
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string();
    if key.is_empty() {
        return Err(TabcleanError::validation(format!(
            "Table name '{}' has no letters or digits",
            name
        )));
    }
    Ok(key)
}

/// One table known to the workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub id: String,
    pub name: String,
    pub key: String,
    pub frozen: bool,
    pub row_count: u64,
    pub column_count: usize,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// The saved-state index, `.tabclean/index.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableIndex {
    pub tables: Vec<TableEntry>,
    pub active: Option<String>,
}

impl TableIndex {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write through a temporary file and rename, so a crash leaves either
    /// the old or the new index
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Look a table up by id, display name or key
    pub fn find(&self, reference: &str) -> Option<&TableEntry> {
        self.tables
            .iter()
            .find(|t| t.id == reference)
            .or_else(|| self.tables.iter().find(|t| t.name == reference))
            .or_else(|| {
                let key = normalize_table_name(reference).ok()?;
                self.tables.iter().find(|t| t.key == key)
            })
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut TableEntry> {
        self.tables.iter_mut().find(|t| t.id == id)
    }

    pub fn get(&self, reference: &str) -> Result<&TableEntry> {
        self.find(reference)
            .ok_or_else(|| TabcleanError::table_not_found(reference))
    }

    /// Add a new table, rejecting names whose key collides with an existing one
    pub fn register(&mut self, name: &str) -> Result<TableEntry> {
        let key = normalize_table_name(name)?;
        if let Some(existing) = self.tables.iter().find(|t| t.key == key) {
            return Err(TabcleanError::validation(format!(
                "Table name '{}' collides with existing table '{}'",
                name, existing.name
            )));
        }
        let now = Utc::now();
        let entry = TableEntry {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            key,
            frozen: false,
            row_count: 0,
            column_count: 0,
            created: now,
            updated: now,
        };
        self.tables.push(entry.clone());
        Ok(entry)
    }

    pub fn remove(&mut self, id: &str) -> Option<TableEntry> {
        let pos = self.tables.iter().position(|t| t.id == id)?;
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        Some(self.tables.remove(pos))
    }
}

/// Statistics about the workspace
#[derive(Debug, Default, Serialize)]
pub struct WorkspaceStats {
    pub table_count: usize,
    pub frozen_count: usize,
    pub shard_count: usize,
    pub total_shard_size: u64,
    pub total_snapshot_size: u64,
    pub total_changelog_size: u64,
}

/// Statistics about cleanup operations
#[derive(Debug, Default, Serialize)]
pub struct CleanupStats {
    pub files_removed: usize,
    pub bytes_freed: u64,
}
