//! Parquet shard persistence
//!
//! A table is written as `max(1, ceil(rows / shard_size))` parquet files plus
//! a manifest. Every shard goes to a `.tmp` name first. Once all of them are
//! written and verified, the new manifest is saved as a pending manifest,
//! the shards are renamed into place and the pending manifest replaces the
//! old one. A write that fails before the pending manifest exists leaves the
//! previous shards and manifest untouched; one interrupted after it is rolled
//! forward by [`complete_pending`].

use crate::error::{Result, TabcleanError};
use crate::fingerprint::file_checksum;
use crate::lock::WriteGuard;
use crate::manifest::{Manifest, ShardInfo};
use crate::progress::ShardProgress;
use crate::substrate::{quote_ident, quote_literal, Substrate};
use crate::table::ROW_ID;
use crate::workspace::TabcleanWorkspace;
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Where a set of shards lives: a directory and the key prefixing its files
#[derive(Debug, Clone)]
pub struct ShardLocation {
    pub dir: PathBuf,
    pub key: String,
}

impl ShardLocation {
    pub fn new(dir: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            key: key.into(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(format!("{}__manifest.json", self.key))
    }

    /// Manifest of a write whose shards may not all be in place yet
    pub fn pending_manifest_path(&self) -> PathBuf {
        self.dir.join(format!("{}__manifest.pending", self.key))
    }

    pub fn shard_path(&self, index: usize) -> PathBuf {
        self.dir.join(TabcleanWorkspace::shard_file_name(&self.key, index))
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest_path().exists()
    }

    /// Shard files on disk for this key, whether or not a manifest lists them
    pub fn existing_shards(&self) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}__shard_", self.key);
        let mut files = Vec::new();
        if !self.dir.exists() {
            return Ok(files);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with(&prefix));
            if matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Row count recorded in a parquet file's footer
pub fn footer_row_count(path: &Path) -> Result<u64> {
    let file = File::open(path)?;
    let reader = SerializedFileReader::new(file)?;
    Ok(reader.metadata().file_metadata().num_rows().max(0) as u64)
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Write `table` as shards plus manifest at `location`.
///
/// Stale shards beyond the new count are removed after the manifest is in
/// place. The live table is left untouched.
pub fn write_shards(
    db: &Substrate,
    _guard: &WriteGuard,
    table: &str,
    location: &ShardLocation,
    shard_size: usize,
    progress: &mut ShardProgress,
) -> Result<Manifest> {
    fs::create_dir_all(&location.dir)?;
    let columns = db.columns(table)?;
    let total = db.row_count(table)?;
    let shard_size = shard_size.max(1);
    let shard_count = std::cmp::max(1, (total as usize + shard_size - 1) / shard_size);
    progress.set_total(shard_count as u64);

    let order = if columns.iter().any(|c| c.name == ROW_ID) {
        format!(" ORDER BY {}", quote_ident(ROW_ID))
    } else {
        String::new()
    };

    let mut manifest = Manifest::new(table, shard_size, &columns);
    let mut written: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(shard_count);
    let mut committed = false;

    let result = (|| -> Result<()> {
        for index in 0..shard_count {
            let final_path = location.shard_path(index);
            let tmp = tmp_path(&final_path);
            written.push((tmp.clone(), final_path.clone()));

            let expected = std::cmp::min(
                shard_size as u64,
                total.saturating_sub((index * shard_size) as u64),
            );
            db.execute(&format!(
                "COPY (SELECT * FROM {}{} LIMIT {} OFFSET {}) TO {} (FORMAT PARQUET)",
                quote_ident(table),
                order,
                shard_size,
                index * shard_size,
                quote_literal(&tmp.to_string_lossy())
            ))?;

            let footer_rows = footer_row_count(&tmp)?;
            if footer_rows != expected {
                return Err(TabcleanError::persistence(format!(
                    "shard {} has {} rows, expected {}",
                    final_path.display(),
                    footer_rows,
                    expected
                )));
            }

            let file_name = TabcleanWorkspace::shard_file_name(&location.key, index);
            manifest.push_shard(ShardInfo {
                file_name: file_name.clone(),
                row_count: footer_rows,
                byte_size: fs::metadata(&tmp)?.len(),
                checksum: file_checksum(&tmp)?,
            });
            log::debug!("Wrote shard {} ({} rows)", file_name, footer_rows);
            progress.shard_done(&file_name);
        }

        manifest.save(&location.pending_manifest_path())?;
        committed = true;
        for (tmp, final_path) in &written {
            fs::rename(tmp, final_path)?;
        }
        fs::rename(location.pending_manifest_path(), location.manifest_path())?;
        Ok(())
    })();

    if let Err(e) = result {
        if committed {
            log::warn!(
                "Shard write of '{}' interrupted after commit; it is finished on next load",
                table
            );
        } else {
            for (tmp, _) in &written {
                remove_quietly(tmp);
            }
            remove_quietly(&location.pending_manifest_path().with_extension("json.tmp"));
        }
        return Err(TabcleanError::persistence(format!(
            "writing shards for '{}' failed: {}",
            table, e
        )));
    }

    for stale in location.existing_shards()? {
        let listed = manifest
            .shards
            .iter()
            .any(|s| stale.file_name().and_then(|n| n.to_str()) == Some(s.file_name.as_str()));
        if !listed {
            log::debug!("Removing stale shard {}", stale.display());
            remove_quietly(&stale);
        }
    }

    log::info!(
        "Persisted '{}' as {} shard(s), {} rows",
        table,
        manifest.shards.len(),
        manifest.total_rows
    );
    Ok(manifest)
}

/// Finish a shard write that stopped after its pending manifest was saved:
/// move the remaining `.tmp` shards into place and promote the manifest.
///
/// Returns whether there was anything to finish.
pub fn complete_pending(location: &ShardLocation) -> Result<bool> {
    let pending = location.pending_manifest_path();
    if !pending.exists() {
        return Ok(false);
    }
    let manifest = Manifest::load(&pending)?;
    for shard in &manifest.shards {
        let final_path = location.dir.join(&shard.file_name);
        let tmp = tmp_path(&final_path);
        if tmp.exists() {
            fs::rename(&tmp, &final_path)?;
        }
    }
    verify_shards(location, &manifest)?;
    fs::rename(&pending, location.manifest_path())?;
    log::info!(
        "Finished interrupted shard write of '{}' ({} shard(s))",
        location.key,
        manifest.shards.len()
    );
    Ok(true)
}

/// Verify every shard against the manifest: presence, footer row count and
/// checksum
pub fn verify_shards(location: &ShardLocation, manifest: &Manifest) -> Result<()> {
    for shard in &manifest.shards {
        let path = location.dir.join(&shard.file_name);
        if !path.exists() {
            return Err(TabcleanError::persistence(format!(
                "missing shard {}",
                path.display()
            )));
        }
        let footer_rows = footer_row_count(&path)?;
        if footer_rows != shard.row_count {
            return Err(TabcleanError::persistence(format!(
                "shard {} footer reports {} rows, manifest says {}",
                shard.file_name, footer_rows, shard.row_count
            )));
        }
        let checksum = file_checksum(&path)?;
        if checksum != shard.checksum {
            return Err(TabcleanError::persistence(format!(
                "checksum mismatch for shard {}",
                shard.file_name
            )));
        }
    }
    Ok(())
}

/// Load the shards at `location` into a new table named `target`.
///
/// Fails without leaving `target` behind when any check does not hold.
pub fn load_shards(
    db: &Substrate,
    _guard: &WriteGuard,
    location: &ShardLocation,
    target: &str,
    progress: &mut ShardProgress,
) -> Result<Manifest> {
    complete_pending(location)?;
    let manifest_path = location.manifest_path();
    if !manifest_path.exists() {
        return Err(TabcleanError::persistence(format!(
            "no manifest at {}",
            manifest_path.display()
        )));
    }
    let manifest = Manifest::load(&manifest_path)?;
    progress.set_total(manifest.shards.len() as u64);
    verify_shards(location, &manifest)?;

    let files = manifest
        .shards
        .iter()
        .map(|s| quote_literal(&location.dir.join(&s.file_name).to_string_lossy()))
        .collect::<Vec<_>>()
        .join(", ");
    let order = if manifest.columns.iter().any(|c| c == ROW_ID) {
        format!(" ORDER BY {}", quote_ident(ROW_ID))
    } else {
        String::new()
    };

    db.drop_table(target)?;
    db.execute(&format!(
        "CREATE TABLE {} AS SELECT * FROM read_parquet([{}]){}",
        quote_ident(target),
        files,
        order
    ))?;
    for shard in &manifest.shards {
        progress.shard_done(&shard.file_name);
    }

    let loaded_rows = db.row_count(target)?;
    let loaded_columns = db.columns(target)?;
    let names: Vec<&str> = loaded_columns.iter().map(|c| c.name.as_str()).collect();
    let expected: Vec<&str> = manifest.columns.iter().map(|c| c.as_str()).collect();
    if loaded_rows != manifest.total_rows || names != expected {
        db.drop_table(target)?;
        return Err(TabcleanError::persistence(format!(
            "'{}' reconstructed with {} rows and {} columns, manifest lists {} and {}",
            manifest.table_name,
            loaded_rows,
            names.len(),
            manifest.total_rows,
            expected.len()
        )));
    }
    for (loaded, listed) in loaded_columns.iter().zip(&manifest.column_types) {
        if &loaded.data_type != listed {
            log::warn!(
                "Column '{}' reloaded as {} but was persisted as {}",
                loaded.name,
                loaded.data_type,
                listed
            );
        }
    }

    log::debug!(
        "Loaded {} shard(s) into '{}' ({} rows)",
        manifest.shards.len(),
        target,
        loaded_rows
    );
    Ok(manifest)
}

/// Remove the manifest and every shard of a location: those the manifest
/// lists plus anything found by prefix
pub fn remove_shards(location: &ShardLocation) -> Result<usize> {
    let mut removed = 0;
    let manifest_path = location.manifest_path();
    if manifest_path.exists() {
        if let Ok(manifest) = Manifest::load(&manifest_path) {
            for shard in &manifest.shards {
                let path = location.dir.join(&shard.file_name);
                if path.exists() {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
        fs::remove_file(&manifest_path)?;
        removed += 1;
    }
    let pending = location.pending_manifest_path();
    if pending.exists() {
        fs::remove_file(&pending)?;
        removed += 1;
    }
    for path in location.existing_shards()? {
        fs::remove_file(&path)?;
        removed += 1;
    }
    Ok(removed)
}
