//! Post-state snapshots of live tables
//!
//! A snapshot is a full shard set written under
//! `snapshots/<key>/<snapshot-id>/`. Timelines reference snapshots by id:
//! one base snapshot per table plus one per expensive command.

use crate::error::Result;
use crate::lock::WriteGuard;
use crate::progress::ShardProgress;
use crate::shards::{self, ShardLocation};
use crate::substrate::Substrate;
use crate::workspace::TabcleanWorkspace;
use std::fs;

pub struct SnapshotStore<'a> {
    workspace: &'a TabcleanWorkspace,
    shard_size: usize,
}

impl<'a> SnapshotStore<'a> {
    pub fn new(workspace: &'a TabcleanWorkspace, shard_size: usize) -> Self {
        Self {
            workspace,
            shard_size,
        }
    }

    fn location(&self, key: &str, snapshot_id: &str) -> ShardLocation {
        ShardLocation::new(self.workspace.snapshot_dir(key, snapshot_id), key)
    }

    pub fn exists(&self, key: &str, snapshot_id: &str) -> bool {
        self.location(key, snapshot_id).has_manifest()
    }

    /// Persist the current state of `table` and return the new snapshot id
    pub fn take(&self, db: &Substrate, guard: &WriteGuard, key: &str, table: &str) -> Result<String> {
        let snapshot_id = uuid::Uuid::new_v4().to_string();
        let location = self.location(key, &snapshot_id);
        let result = shards::write_shards(
            db,
            guard,
            table,
            &location,
            self.shard_size,
            &mut ShardProgress::new_minimal(),
        );
        match result {
            Ok(manifest) => {
                log::debug!(
                    "Snapshot {} of '{}' taken ({} rows)",
                    snapshot_id,
                    table,
                    manifest.total_rows
                );
                Ok(snapshot_id)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&location.dir);
                Err(e)
            }
        }
    }

    /// Load a snapshot into a fresh table named `target`, replacing any
    /// table of that name
    pub fn load_into(
        &self,
        db: &Substrate,
        guard: &WriteGuard,
        key: &str,
        snapshot_id: &str,
        target: &str,
    ) -> Result<()> {
        shards::load_shards(
            db,
            guard,
            &self.location(key, snapshot_id),
            target,
            &mut ShardProgress::new_minimal(),
        )?;
        Ok(())
    }

    /// Replace the live `table` with a snapshot. The live table is only
    /// touched once the snapshot loaded and verified.
    pub fn restore(
        &self,
        db: &Substrate,
        guard: &WriteGuard,
        key: &str,
        snapshot_id: &str,
        table: &str,
    ) -> Result<()> {
        let staging = format!("_cs_restore_{}", table);
        self.load_into(db, guard, key, snapshot_id, &staging)?;
        db.swap_table(table, &staging, "restore")?;
        log::debug!("Restored '{}' from snapshot {}", table, snapshot_id);
        Ok(())
    }

    pub fn delete(&self, key: &str, snapshot_id: &str) -> Result<()> {
        let dir = self.workspace.snapshot_dir(key, snapshot_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Best-effort removal of several snapshots
    pub fn delete_many<I>(&self, key: &str, snapshot_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        for id in snapshot_ids {
            if let Err(e) = self.delete(key, &id) {
                log::warn!("Failed to remove snapshot {} of '{}': {}", id, key, e);
            }
        }
    }

    /// Remove every snapshot of a table. Returns how many were removed.
    pub fn delete_all(&self, key: &str) -> Result<usize> {
        let ids = self.list(key)?;
        let root = self.workspace.snapshot_root(key);
        if root.exists() {
            fs::remove_dir_all(&root)?;
        }
        Ok(ids.len())
    }

    /// Snapshot ids stored for a table
    pub fn list(&self, key: &str) -> Result<Vec<String>> {
        let root = self.workspace.snapshot_root(key);
        let mut ids = Vec::new();
        if !root.exists() {
            return Ok(ids);
        }
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
