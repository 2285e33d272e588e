//! Engine facade over the workspace, the substrate and the per-table
//! timelines
//!
//! Every public mutation takes the write lock exactly once and hands the
//! guard down. Mutations address a table through a [`TableContext`] and
//! fail with `TableNotActive` when that table is frozen.

use crate::audit::{self, AuditSettings, RowDetail, RowDetailsPage};
use crate::changelog::{self, ChangeLog, ChangeLogEntry};
use crate::combine::{self, JoinKind};
use crate::config::EngineConfig;
use crate::diff::{self, DiffKey, DiffResult};
use crate::duckdb_config::DuckDbSettings;
use crate::error::{Result, TabcleanError};
use crate::executor::{self, TransformResult};
use crate::history;
use crate::lock::{self, WriteGuard};
use crate::manifest::Manifest;
use crate::progress::ShardProgress;
use crate::resolver::StateRef;
use crate::shards::{self, ShardLocation};
use crate::snapshot::SnapshotStore;
use crate::substrate::{Substrate, TextRow};
use crate::table;
use crate::timeline::{AuditEntry, AuditView, CellChange, Command, CommandParams, Timeline};
use crate::transform::Transform;
use crate::workspace::{TableEntry, TableIndex, TabcleanWorkspace};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Explicit handle on one table. Obtained from imports, combiners,
/// [`Engine::context`] and [`Engine::switch_table`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableContext {
    pub table_id: String,
    pub key: String,
    pub name: String,
}

impl TableContext {
    fn from_entry(entry: &TableEntry) -> Self {
        Self {
            table_id: entry.id.clone(),
            key: entry.key.clone(),
            name: entry.name.clone(),
        }
    }
}

/// One manual cell edit; `row` is the 1-based position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellEdit {
    pub row: u64,
    pub column: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditResult {
    pub cells_changed: usize,
    pub rows_affected: u64,
    /// None when every edit left its cell unchanged
    pub audit_entry_id: Option<String>,
    pub has_row_details: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowChangeResult {
    pub position: u64,
    pub origin_id: String,
    pub row_count: u64,
    pub audit_entry_id: String,
}

pub struct Engine {
    workspace: TabcleanWorkspace,
    config: EngineConfig,
    db: Substrate,
    index: TableIndex,
    timelines: HashMap<String, Timeline>,
    show_progress: bool,
}

impl Engine {
    /// Open the workspace with its file-backed database
    pub fn open(workspace: TabcleanWorkspace) -> Result<Self> {
        let config = workspace.load_config()?;
        let settings = DuckDbSettings::new(config.memory_limit.clone());
        let db = Substrate::open(&workspace.database_path(), &settings)?;
        Self::with_substrate(workspace, config, db)
    }

    /// Open the workspace with a throwaway in-memory database. Tables that
    /// were never frozen do not survive.
    pub fn open_in_memory(workspace: TabcleanWorkspace) -> Result<Self> {
        let config = workspace.load_config()?;
        let settings = DuckDbSettings::new(config.memory_limit.clone());
        let db = Substrate::open_in_memory(&settings)?;
        Self::with_substrate(workspace, config, db)
    }

    fn with_substrate(workspace: TabcleanWorkspace, config: EngineConfig, db: Substrate) -> Result<Self> {
        audit::ensure_store(&db)?;
        let index = workspace.load_index()?;
        let mut engine = Self {
            workspace,
            config,
            db,
            index,
            timelines: HashMap::new(),
            show_progress: false,
        };
        engine.recover()?;
        Ok(engine)
    }

    /// Reconcile the index with the database: live tables that went
    /// missing are reloaded from their shards on the next thaw, tables with
    /// neither live data nor shards are dropped. Orphaned files are swept.
    fn recover(&mut self) -> Result<()> {
        let _guard = lock::acquire();
        let mut changed = false;
        let mut lost = Vec::new();

        for entry in &self.index.tables {
            let location = ShardLocation::new(&self.workspace.shards_dir, &entry.key);
            if let Err(e) = shards::complete_pending(&location) {
                log::warn!("Could not finish the interrupted shard write of '{}': {}", entry.name, e);
            }
        }

        for entry in self.index.tables.iter_mut() {
            if entry.frozen || self.db.table_exists(&entry.key)? {
                continue;
            }
            let location = ShardLocation::new(&self.workspace.shards_dir, &entry.key);
            if location.has_manifest() {
                log::warn!(
                    "Live data of '{}' is missing; it will be reloaded from its shards",
                    entry.name
                );
                entry.frozen = true;
            } else {
                log::warn!(
                    "Table '{}' has neither live data nor shards; removing it",
                    entry.name
                );
                lost.push(entry.id.clone());
            }
            changed = true;
        }
        for id in lost {
            self.index.remove(&id);
        }
        if changed {
            self.save_index()?;
        }

        let stats = self.workspace.sweep_orphans(&self.index)?;
        if stats.files_removed > 0 {
            log::info!(
                "Removed {} orphaned file(s), {} bytes",
                stats.files_removed,
                stats.bytes_freed
            );
        }
        Ok(())
    }

    pub fn set_show_progress(&mut self, show: bool) {
        self.show_progress = show;
    }

    pub fn workspace(&self) -> &TabcleanWorkspace {
        &self.workspace
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn substrate(&self) -> &Substrate {
        &self.db
    }

    pub fn tables(&self) -> &[TableEntry] {
        &self.index.tables
    }

    /// Context for a table given by id, display name or key
    pub fn context(&self, reference: &str) -> Result<TableContext> {
        self.index.get(reference).map(TableContext::from_entry)
    }

    pub fn active_context(&self) -> Option<TableContext> {
        let id = self.index.active.as_deref()?;
        self.index.find(id).map(TableContext::from_entry)
    }

    pub fn is_live(&self, ctx: &TableContext) -> Result<bool> {
        let entry = self.entry(ctx)?;
        Ok(!entry.frozen && self.db.table_exists(&entry.key)?)
    }

    /// Rows in the table; the recorded count for a frozen table
    pub fn row_count(&self, ctx: &TableContext) -> Result<u64> {
        if self.is_live(ctx)? {
            self.db.row_count(&ctx.key)
        } else {
            Ok(self.entry(ctx)?.row_count)
        }
    }

    fn entry(&self, ctx: &TableContext) -> Result<&TableEntry> {
        self.index
            .tables
            .iter()
            .find(|t| t.id == ctx.table_id)
            .ok_or_else(|| TabcleanError::table_not_found(&ctx.name))
    }

    fn require_live(&self, ctx: &TableContext) -> Result<()> {
        if self.is_live(ctx)? {
            Ok(())
        } else {
            Err(TabcleanError::TableNotActive {
                name: ctx.name.clone(),
            })
        }
    }

    fn save_index(&self) -> Result<()> {
        self.workspace.save_index(&self.index)
    }

    fn snapshots(&self) -> SnapshotStore<'_> {
        SnapshotStore::new(&self.workspace, self.config.shard_size)
    }

    fn shard_location(&self, key: &str) -> ShardLocation {
        ShardLocation::new(&self.workspace.shards_dir, key)
    }

    fn changelog(&self, key: &str) -> ChangeLog {
        ChangeLog::new(self.workspace.changelog_path(key))
    }

    fn audit_settings(&self) -> AuditSettings {
        AuditSettings {
            row_cap: self.config.audit_row_cap,
            batch_size: self.config.audit_batch_size,
        }
    }

    fn progress(&self, message: &str) -> ShardProgress {
        if self.show_progress {
            ShardProgress::new_visible(0, message)
        } else {
            ShardProgress::new_minimal()
        }
    }

    fn take_timeline(&mut self, ctx: &TableContext) -> Result<Timeline> {
        if let Some(timeline) = self.timelines.remove(&ctx.key) {
            return Ok(timeline);
        }
        let path = self.workspace.timeline_path(&ctx.key);
        if path.exists() {
            Timeline::load(&path)
        } else {
            Ok(Timeline::new(&ctx.table_id, &ctx.name, None))
        }
    }

    fn put_timeline(&mut self, ctx: &TableContext, timeline: Timeline) -> Result<()> {
        let saved = timeline.save(&self.workspace.timeline_path(&ctx.key));
        self.timelines.insert(ctx.key.clone(), timeline);
        saved
    }

    /// The table's timeline, loaded on first use
    pub fn timeline(&mut self, ctx: &TableContext) -> Result<&Timeline> {
        if !self.timelines.contains_key(&ctx.key) {
            let timeline = self.take_timeline(ctx)?;
            self.timelines.insert(ctx.key.clone(), timeline);
        }
        self.timelines
            .get(&ctx.key)
            .ok_or_else(|| TabcleanError::table_not_found(&ctx.name))
    }

    fn refresh_entry(&mut self, ctx: &TableContext) -> Result<()> {
        let rows = self.db.row_count(&ctx.key)?;
        let columns = table::user_column_names(&self.db, &ctx.key)?.len();
        if let Some(entry) = self.index.find_mut(&ctx.table_id) {
            entry.row_count = rows;
            entry.column_count = columns;
            entry.updated = Utc::now();
        }
        self.save_index()
    }

    // ----- table creation -------------------------------------------------

    fn create_table<F>(&mut self, guard: &WriteGuard, name: &str, build: F) -> Result<TableContext>
    where
        F: FnOnce(&Substrate, &WriteGuard, &str) -> Result<u64>,
    {
        let mut index = self.index.clone();
        let entry = index.register(name)?;
        let ctx = TableContext::from_entry(&entry);

        let rows = build(&self.db, guard, &ctx.key)?;
        let base = match self.snapshots().take(&self.db, guard, &ctx.key, &ctx.key) {
            Ok(id) => id,
            Err(e) => {
                let _ = self.db.drop_table(&ctx.key);
                return Err(e);
            }
        };
        if let Err(e) = self.changelog(&ctx.key).remove() {
            log::warn!("Could not clear stale change-log of '{}': {}", ctx.key, e);
        }

        self.index = index;
        if self.index.active.is_none() {
            self.index.active = Some(ctx.table_id.clone());
        }
        self.put_timeline(&ctx, Timeline::new(&ctx.table_id, &ctx.name, Some(base)))?;
        self.refresh_entry(&ctx)?;
        log::info!("Created table '{}' ({} rows)", ctx.name, rows);
        Ok(ctx)
    }

    pub fn import_csv(&mut self, path: &Path, name: &str) -> Result<TableContext> {
        let guard = lock::acquire();
        self.create_table(&guard, name, |db, guard, key| table::import_csv(db, guard, path, key))
    }

    pub fn import_rows(&mut self, name: &str, columns: &[String], rows: &[TextRow]) -> Result<TableContext> {
        let guard = lock::acquire();
        self.create_table(&guard, name, |db, guard, key| {
            table::create_from_rows(db, guard, key, columns, rows)
        })
    }

    // ----- commands -------------------------------------------------------

    /// Append a command and release what it supersedes: the redo tail and,
    /// past `max_snapshots`, the oldest history
    fn record(&mut self, guard: &WriteGuard, ctx: &TableContext, command: Command) -> Result<()> {
        let mut timeline = self.take_timeline(ctx)?;
        let discarded = timeline.append(command);
        self.release(guard, &ctx.key, discarded);
        self.prune(ctx, &mut timeline);
        self.put_timeline(ctx, timeline)?;
        self.refresh_entry(ctx)
    }

    fn release(&self, guard: &WriteGuard, key: &str, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }
        let audit_ids: Vec<String> = commands.iter().map(|c| c.audit_entry_id.clone()).collect();
        if let Err(e) = audit::delete_entries(&self.db, guard, &audit_ids) {
            log::warn!("Failed to remove audit detail of discarded commands: {}", e);
        }
        self.snapshots()
            .delete_many(key, commands.into_iter().filter_map(|c| c.snapshot_id));
    }

    fn prune(&self, ctx: &TableContext, timeline: &mut Timeline) {
        while timeline.snapshot_count() > self.config.max_snapshots {
            let Some(index) = timeline.oldest_active_snapshot() else {
                break;
            };
            match timeline.prune_before(index) {
                Ok((removed, old_base)) => {
                    log::info!(
                        "Pruned {} command(s) from the history of '{}'",
                        removed.len(),
                        ctx.name
                    );
                    // Audit detail outlives the undo history
                    self.snapshots().delete_many(
                        &ctx.key,
                        old_base.into_iter().chain(removed.into_iter().filter_map(|c| c.snapshot_id)),
                    );
                }
                Err(e) => {
                    log::warn!("Could not prune history of '{}': {}", ctx.name, e);
                    break;
                }
            }
        }
    }

    fn record_details(&self, guard: &WriteGuard, details: &[RowDetail]) -> bool {
        if details.is_empty() || details.len() as u64 > self.config.audit_row_cap {
            return false;
        }
        match audit::record(&self.db, guard, details, self.config.audit_batch_size) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Audit capture failed: {}", e);
                false
            }
        }
    }

    pub fn apply_transformation(&mut self, ctx: &TableContext, step: &Transform) -> Result<TransformResult> {
        let guard = lock::acquire();
        self.require_live(ctx)?;
        let result = executor::apply(&self.db, &guard, &ctx.key, step, self.audit_settings())?;

        let mut command = Command::new(
            step.label(),
            CommandParams::Transform(step.clone()),
            result.audit_entry_id.clone(),
        );
        command.rows_affected = result.affected;
        command.has_row_details = result.has_row_details;
        if step.needs_snapshot() {
            command.snapshot_id = match self.snapshots().take(&self.db, &guard, &ctx.key, &ctx.key) {
                Ok(id) => Some(id),
                Err(e) => {
                    log::warn!(
                        "Snapshot after {} on '{}' failed, undo will replay instead: {}",
                        step.type_name(),
                        ctx.name,
                        e
                    );
                    None
                }
            };
        }
        self.record(&guard, ctx, command)?;
        Ok(result)
    }

    pub fn edit_cell(
        &mut self,
        ctx: &TableContext,
        row: u64,
        column: &str,
        value: Option<&str>,
    ) -> Result<EditResult> {
        self.edit_cells(
            ctx,
            &[CellEdit {
                row,
                column: column.to_string(),
                value: value.map(str::to_string),
            }],
        )
    }

    /// Apply several cell edits as one command
    pub fn edit_cells(&mut self, ctx: &TableContext, edits: &[CellEdit]) -> Result<EditResult> {
        let guard = lock::acquire();
        self.require_live(ctx)?;
        if edits.is_empty() {
            return Err(TabcleanError::validation("No cells to edit"));
        }

        // One change per cell: a later edit of the same cell replaces the
        // pending value and keeps the value read before the batch.
        let mut pending: Vec<(CellChange, u64)> = Vec::new();
        for edit in edits {
            table::check_value(&self.db, &ctx.key, &edit.column, edit.value.as_deref())?;
            let record = table::row_at(&self.db, &ctx.key, edit.row)?;
            let existing = pending
                .iter_mut()
                .find(|(c, _)| c.row_id == record.origin_id && c.column == edit.column);
            match existing {
                Some((change, _)) => change.value = edit.value.clone(),
                None => {
                    let previous = record.values.get(&edit.column).cloned().flatten();
                    pending.push((
                        CellChange {
                            row_id: record.origin_id,
                            column: edit.column.clone(),
                            previous,
                            value: edit.value.clone(),
                        },
                        edit.row,
                    ));
                }
            }
        }
        let (changes, positions): (Vec<CellChange>, Vec<u64>) = pending
            .into_iter()
            .filter(|(c, _)| c.previous != c.value)
            .unzip();
        if changes.is_empty() {
            return Ok(EditResult {
                cells_changed: 0,
                rows_affected: 0,
                audit_entry_id: None,
                has_row_details: false,
            });
        }

        for (i, change) in changes.iter().enumerate() {
            table::set_cell(
                &self.db,
                &guard,
                &ctx.key,
                &change.row_id,
                &change.column,
                change.value.as_deref(),
            )
            .map_err(|e| {
                if i == 0 {
                    e
                } else {
                    TabcleanError::partial_mutation("edit cells", e.to_string())
                }
            })?;
        }
        self.changelog(&ctx.key).append(
            &changes
                .iter()
                .map(|c| ChangeLogEntry::new(&c.row_id, &c.column, c.value.as_deref()))
                .collect::<Vec<_>>(),
        );

        let audit_entry_id = uuid::Uuid::new_v4().to_string();
        let details: Vec<RowDetail> = changes
            .iter()
            .zip(&positions)
            .map(|(c, position)| RowDetail {
                audit_entry_id: audit_entry_id.clone(),
                row_index: *position as i64,
                row_id: c.row_id.clone(),
                column_name: c.column.clone(),
                previous_value: c.previous.clone(),
                new_value: c.value.clone(),
            })
            .collect();
        let has_row_details = self.record_details(&guard, &details);
        let rows_affected = changes.iter().map(|c| &c.row_id).collect::<HashSet<_>>().len() as u64;

        let (label, params) = if changes.len() == 1 {
            (
                format!("Edit row {}, column {}", positions[0], changes[0].column),
                CommandParams::EditCell,
            )
        } else {
            (format!("Batch edit: {} cells", changes.len()), CommandParams::BatchEdit)
        };
        let cells_changed = changes.len();
        let mut command = Command::new(label, params, audit_entry_id.clone());
        command.cell_changes = Some(changes);
        command.rows_affected = rows_affected;
        command.has_row_details = has_row_details;
        self.record(&guard, ctx, command)?;
        self.maybe_compact(&guard, ctx);

        Ok(EditResult {
            cells_changed,
            rows_affected,
            audit_entry_id: Some(audit_entry_id),
            has_row_details,
        })
    }

    /// Insert a row at 1-based `position`; one past the last row appends
    pub fn insert_row(
        &mut self,
        ctx: &TableContext,
        position: u64,
        values: IndexMap<String, Option<String>>,
    ) -> Result<RowChangeResult> {
        let guard = lock::acquire();
        self.require_live(ctx)?;
        for (column, value) in &values {
            table::check_value(&self.db, &ctx.key, column, value.as_deref())?;
        }

        let row_id = table::row_id_for_position(&self.db, &ctx.key, position)?;
        let origin_id = uuid::Uuid::new_v4().to_string();
        table::insert_row(&self.db, &guard, &ctx.key, row_id, &origin_id, &values)?;

        let audit_entry_id = uuid::Uuid::new_v4().to_string();
        let details: Vec<RowDetail> = values
            .iter()
            .map(|(column, value)| RowDetail {
                audit_entry_id: audit_entry_id.clone(),
                row_index: position as i64,
                row_id: origin_id.clone(),
                column_name: column.clone(),
                previous_value: None,
                new_value: value.clone(),
            })
            .collect();
        let has_row_details = self.record_details(&guard, &details);

        let mut command = Command::new(
            format!("Insert row at {}", position),
            CommandParams::InsertRow {
                row_id,
                origin_id: origin_id.clone(),
                values,
            },
            audit_entry_id.clone(),
        );
        command.rows_affected = 1;
        command.has_row_details = has_row_details;
        self.record(&guard, ctx, command)?;

        Ok(RowChangeResult {
            position,
            origin_id,
            row_count: self.db.row_count(&ctx.key)?,
            audit_entry_id,
        })
    }

    /// Delete the row at 1-based `position`
    pub fn delete_row(&mut self, ctx: &TableContext, position: u64) -> Result<RowChangeResult> {
        let guard = lock::acquire();
        self.require_live(ctx)?;
        let record = table::row_at(&self.db, &ctx.key, position)?;
        table::delete_row(&self.db, &guard, &ctx.key, record.row_id, &record.origin_id)?;

        let audit_entry_id = uuid::Uuid::new_v4().to_string();
        let details: Vec<RowDetail> = record
            .values
            .iter()
            .map(|(column, value)| RowDetail {
                audit_entry_id: audit_entry_id.clone(),
                row_index: position as i64,
                row_id: record.origin_id.clone(),
                column_name: column.clone(),
                previous_value: value.clone(),
                new_value: None,
            })
            .collect();
        let has_row_details = self.record_details(&guard, &details);

        let origin_id = record.origin_id.clone();
        let mut command = Command::new(
            format!("Delete row {}", position),
            CommandParams::DeleteRow {
                row_id: record.row_id,
                origin_id: record.origin_id,
                values: record.values,
            },
            audit_entry_id.clone(),
        );
        command.rows_affected = 1;
        command.has_row_details = has_row_details;
        self.record(&guard, ctx, command)?;

        Ok(RowChangeResult {
            position,
            origin_id,
            row_count: self.db.row_count(&ctx.key)?,
            audit_entry_id,
        })
    }

    // ----- history --------------------------------------------------------

    pub fn can_undo(&mut self, ctx: &TableContext) -> Result<bool> {
        Ok(self.timeline(ctx)?.can_undo())
    }

    pub fn can_redo(&mut self, ctx: &TableContext) -> Result<bool> {
        Ok(self.timeline(ctx)?.can_redo())
    }

    pub fn undo(&mut self, ctx: &TableContext) -> Result<Command> {
        let guard = lock::acquire();
        self.require_live(ctx)?;
        let mut timeline = self.take_timeline(ctx)?;
        let result = history::undo(&self.db, &guard, &self.snapshots(), &ctx.key, &mut timeline);
        self.put_timeline(ctx, timeline)?;
        let command = result?;
        self.log_cell_writes(&ctx.key, &command, true);
        self.refresh_entry(ctx)?;
        Ok(command)
    }

    pub fn redo(&mut self, ctx: &TableContext) -> Result<Command> {
        let guard = lock::acquire();
        self.require_live(ctx)?;
        let mut timeline = self.take_timeline(ctx)?;
        let result = history::redo(&self.db, &guard, &self.snapshots(), &ctx.key, &mut timeline);
        self.put_timeline(ctx, timeline)?;
        let command = result?;
        self.log_cell_writes(&ctx.key, &command, false);
        self.refresh_entry(ctx)?;
        Ok(command)
    }

    /// Keep the change-log in step when undo or redo rewrites edited cells
    fn log_cell_writes(&self, key: &str, command: &Command, undone: bool) {
        let Some(changes) = &command.cell_changes else {
            return;
        };
        let entries: Vec<ChangeLogEntry> = if undone {
            changes
                .iter()
                .rev()
                .map(|c| ChangeLogEntry::new(&c.row_id, &c.column, c.previous.as_deref()))
                .collect()
        } else {
            changes
                .iter()
                .map(|c| ChangeLogEntry::new(&c.row_id, &c.column, c.value.as_deref()))
                .collect()
        };
        self.changelog(key).append(&entries);
    }

    // ----- audit ----------------------------------------------------------

    pub fn audit_row_details(&self, audit_entry_id: &str, limit: usize, offset: usize) -> Result<RowDetailsPage> {
        audit::row_details(&self.db, audit_entry_id, limit, offset)
    }

    pub fn audit_entries_for_table(&mut self, ctx: &TableContext, view: AuditView) -> Result<Vec<AuditEntry>> {
        Ok(self.timeline(ctx)?.entries(view))
    }

    /// Audit entries of every table, newest first
    pub fn all_audit_entries(&mut self, view: AuditView) -> Result<Vec<AuditEntry>> {
        let contexts: Vec<TableContext> = self.index.tables.iter().map(TableContext::from_entry).collect();
        let mut entries = Vec::new();
        for ctx in &contexts {
            entries.extend(self.audit_entries_for_table(ctx, view)?);
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    // ----- diff -----------------------------------------------------------

    /// Reconstruct a frozen table into `target` without thawing it
    fn thaw_copy(&self, guard: &WriteGuard, ctx: &TableContext, target: &str) -> Result<()> {
        shards::load_shards(
            &self.db,
            guard,
            &self.shard_location(&ctx.key),
            target,
            &mut ShardProgress::new_minimal(),
        )?;
        changelog::replay(&self.db, guard, target, &self.changelog(&ctx.key).read()?)?;
        Ok(())
    }

    /// Name of a readable table holding the current state of `ctx`
    fn source_table(
        &self,
        guard: Option<&WriteGuard>,
        ctx: &TableContext,
        temps: &mut Vec<String>,
    ) -> Result<String> {
        if self.is_live(ctx)? {
            return Ok(ctx.key.clone());
        }
        let guard = guard.ok_or_else(|| TabcleanError::TableNotActive {
            name: ctx.name.clone(),
        })?;
        let name = format!("_cs_read_{}_{}", temps.len(), ctx.key);
        temps.push(name.clone());
        self.thaw_copy(guard, ctx, &name)?;
        Ok(name)
    }

    fn drop_temps(&self, temps: &[String]) {
        for name in temps {
            if let Err(e) = self.db.drop_table(name) {
                log::warn!("Failed to drop temporary table '{}': {}", name, e);
            }
        }
    }

    /// Diff the current states of two tables
    pub fn run_diff(&self, a: &str, b: &str, key: &DiffKey) -> Result<DiffResult> {
        let a = self.context(a)?;
        let b = self.context(b)?;
        // Reads only lock when a frozen side has to be materialized
        let guard = if self.is_live(&a)? && self.is_live(&b)? {
            None
        } else {
            Some(lock::acquire())
        };

        let mut temps = Vec::new();
        let result = self
            .source_table(guard.as_ref(), &a, &mut temps)
            .and_then(|left| {
                let right = self.source_table(guard.as_ref(), &b, &mut temps)?;
                diff::compare(&self.db, &left, &right, key)
            });
        self.drop_temps(&temps);
        result
    }

    /// Diff an earlier state of a table (`original`, `@N`, `~N`, a date)
    /// against its current state, matching rows by origin id
    pub fn diff_against(&mut self, ctx: &TableContext, reference: &str) -> Result<DiffResult> {
        let state = StateRef::parse(reference)?;
        let timeline = self.timeline(ctx)?.clone();
        let position = state.resolve(&timeline)?;
        let guard = lock::acquire();

        let past = format!("_cs_state_{}", ctx.key);
        let mut temps = vec![past.clone()];
        let result = history::materialize(
            &self.db,
            &guard,
            &self.snapshots(),
            &ctx.key,
            &timeline,
            position,
            &past,
        )
        .and_then(|_| {
            let current = self.source_table(Some(&guard), ctx, &mut temps)?;
            diff::compare(&self.db, &past, &current, &DiffKey::RowIdentity)
        });
        self.drop_temps(&temps);
        log::debug!("Diffed '{}' against {} (position {})", ctx.name, state, position);
        result
    }

    // ----- persistence ----------------------------------------------------

    fn freeze_inner(&mut self, guard: &WriteGuard, ctx: &TableContext) -> Result<Option<Manifest>> {
        if self.entry(ctx)?.frozen {
            return Ok(None);
        }
        self.require_live(ctx)?;

        let mut progress = self.progress(&format!("Freezing {}", ctx.name));
        let manifest = shards::write_shards(
            &self.db,
            guard,
            &ctx.key,
            &self.shard_location(&ctx.key),
            self.config.shard_size,
            &mut progress,
        )?;
        progress.finish(&format!("Froze '{}'", ctx.name));

        self.truncate_changelog(ctx)?;
        self.db.drop_table(&ctx.key)?;
        if let Some(entry) = self.index.find_mut(&ctx.table_id) {
            entry.frozen = true;
            entry.row_count = manifest.total_rows;
            entry.updated = Utc::now();
        }
        self.save_index()?;
        log::info!("Froze '{}' into {} shard(s)", ctx.name, manifest.shards.len());
        Ok(Some(manifest))
    }

    fn thaw_inner(&mut self, guard: &WriteGuard, ctx: &TableContext) -> Result<()> {
        if self.is_live(ctx)? {
            return Ok(());
        }

        let mut progress = self.progress(&format!("Thawing {}", ctx.name));
        shards::load_shards(
            &self.db,
            guard,
            &self.shard_location(&ctx.key),
            &ctx.key,
            &mut progress,
        )?;
        let entries = self.changelog(&ctx.key).read()?;
        progress.start_replay(entries.len() as u64);
        changelog::replay(&self.db, guard, &ctx.key, &entries)?;
        progress.finish(&format!("Thawed '{}'", ctx.name));

        if let Some(entry) = self.index.find_mut(&ctx.table_id) {
            entry.frozen = false;
        }
        self.refresh_entry(ctx)?;
        log::info!("Thawed '{}'", ctx.name);
        Ok(())
    }

    /// Persist a live table as shards and evict it from the database.
    /// Returns `None` when the table was already frozen.
    pub fn freeze(&mut self, ctx: &TableContext) -> Result<Option<Manifest>> {
        let guard = lock::acquire();
        self.freeze_inner(&guard, ctx)
    }

    pub fn thaw(&mut self, ctx: &TableContext) -> Result<()> {
        let guard = lock::acquire();
        self.thaw_inner(&guard, ctx)
    }

    fn compact_inner(&self, guard: &WriteGuard, ctx: &TableContext) -> Result<Manifest> {
        let manifest = shards::write_shards(
            &self.db,
            guard,
            &ctx.key,
            &self.shard_location(&ctx.key),
            self.config.shard_size,
            &mut self.progress(&format!("Compacting {}", ctx.name)),
        )?;
        self.truncate_changelog(ctx)?;
        log::info!("Compacted '{}' ({} rows)", ctx.name, manifest.total_rows);
        Ok(manifest)
    }

    /// Entries left behind would replay over shards that already hold them
    fn truncate_changelog(&self, ctx: &TableContext) -> Result<()> {
        self.changelog(&ctx.key).truncate().map_err(|e| {
            TabcleanError::persistence(format!(
                "could not truncate change-log of '{}' after writing shards: {}",
                ctx.name, e
            ))
        })
    }

    fn maybe_compact(&self, guard: &WriteGuard, ctx: &TableContext) {
        match self.changelog(&ctx.key).len() {
            Ok(len) if len >= self.config.compaction_threshold => {
                if let Err(e) = self.compact_inner(guard, ctx) {
                    log::warn!("Compaction of '{}' failed: {}", ctx.name, e);
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("Could not read change-log of '{}': {}", ctx.name, e),
        }
    }

    /// Write fresh shards for a live table and truncate its change-log
    pub fn compact(&mut self, ctx: &TableContext) -> Result<Manifest> {
        let guard = lock::acquire();
        self.require_live(ctx)?;
        self.compact_inner(&guard, ctx)
    }

    /// Remove every trace of a table: live data, shards, manifest,
    /// change-log, snapshots, timeline, audit detail and the index entry
    pub fn delete_table(&mut self, ctx: &TableContext) -> Result<()> {
        let guard = lock::acquire();
        self.entry(ctx)?;

        if let Ok(timeline) = self.take_timeline(ctx) {
            let ids = timeline.audit_entry_ids();
            if let Err(e) = audit::delete_entries(&self.db, &guard, &ids) {
                log::warn!("Failed to remove audit detail of '{}': {}", ctx.name, e);
            }
        }
        self.db.drop_table(&ctx.key)?;
        shards::remove_shards(&self.shard_location(&ctx.key))?;
        for path in self.workspace.files_with_key_prefix(&ctx.key)? {
            fs::remove_file(&path)?;
        }
        self.changelog(&ctx.key).remove()?;
        self.snapshots().delete_all(&ctx.key)?;
        let timeline_path = self.workspace.timeline_path(&ctx.key);
        if timeline_path.exists() {
            fs::remove_file(&timeline_path)?;
        }

        self.timelines.remove(&ctx.key);
        self.index.remove(&ctx.table_id);
        self.save_index()?;
        log::info!("Deleted table '{}'", ctx.name);
        Ok(())
    }

    // ----- combiners ------------------------------------------------------

    fn combine_into<F>(&mut self, sources: &[TableContext], name: &str, build: F) -> Result<TableContext>
    where
        F: FnOnce(&Substrate, &WriteGuard, &[String], &str) -> Result<u64>,
    {
        let guard = lock::acquire();
        let mut temps = Vec::new();
        let names: Result<Vec<String>> = sources
            .iter()
            .map(|ctx| self.source_table(Some(&guard), ctx, &mut temps))
            .collect();
        let result = names.and_then(|names| {
            self.create_table(&guard, name, |db, guard, key| build(db, guard, &names, key))
        });
        self.drop_temps(&temps);
        result
    }

    /// Stack tables into a new one; columns are the union in first-seen
    /// order
    pub fn stack_tables(&mut self, sources: &[&str], name: &str) -> Result<TableContext> {
        let contexts = sources
            .iter()
            .map(|s| self.context(s))
            .collect::<Result<Vec<_>>>()?;
        self.combine_into(&contexts, name, |db, guard, names, key| {
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            combine::stack(db, guard, &refs, key)
        })
    }

    pub fn join_tables(
        &mut self,
        left: &str,
        right: &str,
        on: &[String],
        kind: JoinKind,
        name: &str,
    ) -> Result<TableContext> {
        let contexts = vec![self.context(left)?, self.context(right)?];
        self.combine_into(&contexts, name, |db, guard, names, key| {
            combine::join(db, guard, &names[0], &names[1], on, kind, key)
        })
    }

    // ----- activation -----------------------------------------------------

    /// Make `target` the active table: freeze `current` (when given and
    /// different) and thaw `target`, under one lock
    pub fn switch_table(&mut self, current: Option<&TableContext>, target: &str) -> Result<TableContext> {
        let guard = lock::acquire();
        let next = self.context(target)?;
        if let Some(current) = current {
            if current.table_id != next.table_id {
                self.freeze_inner(&guard, current)?;
            }
        }
        self.thaw_inner(&guard, &next)?;
        self.index.active = Some(next.table_id.clone());
        self.save_index()?;
        log::info!("Active table is now '{}'", next.name);
        Ok(next)
    }

    /// A page of user rows; frozen tables are read without thawing them
    pub fn table_rows(
        &self,
        ctx: &TableContext,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<String>, Vec<TextRow>)> {
        let guard = if self.is_live(ctx)? {
            None
        } else {
            Some(lock::acquire())
        };
        let mut temps = Vec::new();
        let result = self
            .source_table(guard.as_ref(), ctx, &mut temps)
            .and_then(|name| table::read_page(&self.db, &name, limit, offset));
        self.drop_temps(&temps);
        result
    }
}
