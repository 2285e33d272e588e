//! Per-table undo/redo timeline
//!
//! The timeline is an arena of immutable commands plus the length of its
//! active prefix. Undo and redo only move that boundary; appending after an
//! undo drops the redoable tail in the same call that pushes the new command.

use crate::error::{Result, TabcleanError};
use crate::transform::Transform;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One cell written by a manual edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellChange {
    /// Origin id of the row
    pub row_id: String,
    pub column: String,
    pub previous: Option<String>,
    pub value: Option<String>,
}

/// What a command did, with everything needed to redo it exactly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CommandParams {
    Transform(Transform),
    /// Cell data lives in [`Command::cell_changes`]
    EditCell,
    BatchEdit,
    InsertRow {
        /// `_cs_id` given to the new row
        row_id: i64,
        origin_id: String,
        values: IndexMap<String, Option<String>>,
    },
    DeleteRow {
        row_id: i64,
        origin_id: String,
        values: IndexMap<String, Option<String>>,
    },
}

/// Category used when rendering audit listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Transform,
    Scrub,
    ManualEdit,
    BatchEdit,
    RowInsert,
    RowDelete,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandKind::Transform => "transform",
            CommandKind::Scrub => "scrub",
            CommandKind::ManualEdit => "manual edit",
            CommandKind::BatchEdit => "batch edit",
            CommandKind::RowInsert => "row insert",
            CommandKind::RowDelete => "row delete",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub params: CommandParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_changes: Option<Vec<CellChange>>,
    pub rows_affected: u64,
    pub has_row_details: bool,
    pub audit_entry_id: String,
    /// Post-state snapshot, for commands that are expensive to replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

impl Command {
    pub fn new(label: impl Into<String>, params: CommandParams, audit_entry_id: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            label: label.into(),
            params,
            cell_changes: None,
            rows_affected: 0,
            has_row_details: false,
            audit_entry_id,
            snapshot_id: None,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match &self.params {
            CommandParams::Transform(step) if step.is_scrub() => CommandKind::Scrub,
            CommandParams::Transform(_) => CommandKind::Transform,
            CommandParams::EditCell => CommandKind::ManualEdit,
            CommandParams::BatchEdit => CommandKind::BatchEdit,
            CommandParams::InsertRow { .. } => CommandKind::RowInsert,
            CommandParams::DeleteRow { .. } => CommandKind::RowDelete,
        }
    }

    /// Commands whose effect can be reversed exactly without a snapshot
    pub fn has_exact_inverse(&self) -> bool {
        match &self.params {
            CommandParams::Transform(Transform::RenameColumn { .. }) => true,
            CommandParams::Transform(_) => false,
            _ => true,
        }
    }
}

/// Which commands an audit listing covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditView {
    ActiveOnly,
    All,
}

/// One row of an audit listing, derived from a command and the position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_entry_id: String,
    pub command_id: String,
    pub table_id: String,
    pub table_name: String,
    /// 0-based index of the command in the timeline
    pub position: usize,
    pub timestamp: DateTime<Utc>,
    pub kind: CommandKind,
    pub label: String,
    pub rows_affected: u64,
    pub has_row_details: bool,
    pub undone: bool,
    /// The command left the undo history through pruning
    #[serde(default)]
    pub pruned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub format_version: String,
    pub table_id: String,
    pub table_name: String,
    pub created_at: DateTime<Utc>,
    pub commands: Vec<Command>,
    pub active_length: usize,
    /// State at position -1
    pub base_snapshot: Option<String>,
    /// Audit entries of pruned commands, oldest first
    #[serde(default)]
    pub pruned: Vec<AuditEntry>,
}

impl Timeline {
    pub fn new(table_id: &str, table_name: &str, base_snapshot: Option<String>) -> Self {
        Self {
            format_version: crate::FORMAT_VERSION.to_string(),
            table_id: table_id.to_string(),
            table_name: table_name.to_string(),
            created_at: Utc::now(),
            commands: Vec::new(),
            active_length: 0,
            base_snapshot,
            pruned: Vec::new(),
        }
    }

    /// Index of the last active command; -1 when nothing is active
    pub fn current_position(&self) -> i64 {
        self.active_length as i64 - 1
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        self.current_position() >= 0
    }

    pub fn can_redo(&self) -> bool {
        self.current_position() < self.commands.len() as i64 - 1
    }

    pub fn active(&self) -> &[Command] {
        &self.commands[..self.active_length]
    }

    pub fn command(&self, index: usize) -> Option<&Command> {
        self.commands.get(index)
    }

    /// Push a command, discarding any redoable commands first.
    ///
    /// Returns the discarded commands so their snapshots and audit detail
    /// can be released.
    pub fn append(&mut self, command: Command) -> Vec<Command> {
        let discarded = self.commands.split_off(self.active_length);
        self.commands.push(command);
        self.active_length = self.commands.len();
        discarded
    }

    /// Step back. Returns the command that is no longer active.
    pub fn undo(&mut self) -> Result<&Command> {
        if !self.can_undo() {
            return Err(TabcleanError::NothingToUndo {
                table: self.table_name.clone(),
            });
        }
        self.active_length -= 1;
        Ok(&self.commands[self.active_length])
    }

    /// Step forward. Returns the command that became active again.
    pub fn redo(&mut self) -> Result<&Command> {
        if !self.can_redo() {
            return Err(TabcleanError::NothingToRedo {
                table: self.table_name.clone(),
            });
        }
        self.active_length += 1;
        Ok(&self.commands[self.active_length - 1])
    }

    /// The nearest snapshot at or before `position`, as (position, id).
    /// Falls back to the base snapshot at position -1.
    pub fn snapshot_at_or_before(&self, position: i64) -> Option<(i64, String)> {
        if position >= 0 {
            let last = (position as usize).min(self.commands.len().saturating_sub(1));
            for index in (0..=last).rev() {
                if let Some(id) = self.commands.get(index).and_then(|c| c.snapshot_id.clone()) {
                    return Some((index as i64, id));
                }
            }
        }
        self.base_snapshot.clone().map(|id| (-1, id))
    }

    /// Snapshots held by commands (the base snapshot not counted)
    pub fn snapshot_count(&self) -> usize {
        self.commands.iter().filter(|c| c.snapshot_id.is_some()).count()
    }

    /// Index of the oldest active command that carries a snapshot
    pub fn oldest_active_snapshot(&self) -> Option<usize> {
        self.active().iter().position(|c| c.snapshot_id.is_some())
    }

    /// Drop every command up to and including `index` and re-base the
    /// timeline on that command's snapshot.
    ///
    /// Returns the dropped commands and the replaced base snapshot id.
    pub fn prune_before(&mut self, index: usize) -> Result<(Vec<Command>, Option<String>)> {
        if index >= self.active_length {
            return Err(TabcleanError::validation(format!(
                "cannot prune at {}: only {} active commands",
                index, self.active_length
            )));
        }
        let new_base = self.commands[index].snapshot_id.clone().ok_or_else(|| {
            TabcleanError::validation(format!("command {} has no snapshot to re-base on", index))
        })?;

        let archived: Vec<AuditEntry> = self.commands[..=index]
            .iter()
            .enumerate()
            .map(|(position, command)| {
                let mut entry = self.project(position, command);
                entry.pruned = true;
                entry
            })
            .collect();
        self.pruned.extend(archived);

        let mut removed: Vec<Command> = self.commands.drain(..=index).collect();
        if let Some(last) = removed.last_mut() {
            // Ownership of the snapshot moves to the base
            last.snapshot_id = None;
        }
        self.active_length -= index + 1;
        let old_base = self.base_snapshot.replace(new_base);
        Ok((removed, old_base))
    }

    /// Audit projection, newest first. Pruned commands follow the
    /// commands still in the undo history.
    pub fn entries(&self, view: AuditView) -> Vec<AuditEntry> {
        let visible = match view {
            AuditView::ActiveOnly => self.active_length,
            AuditView::All => self.commands.len(),
        };
        self.commands[..visible]
            .iter()
            .enumerate()
            .rev()
            .map(|(position, command)| self.project(position, command))
            .chain(self.pruned.iter().rev().cloned())
            .collect()
    }

    /// Audit ids of every command ever recorded, pruned ones included
    pub fn audit_entry_ids(&self) -> Vec<String> {
        self.pruned
            .iter()
            .map(|e| e.audit_entry_id.clone())
            .chain(self.commands.iter().map(|c| c.audit_entry_id.clone()))
            .collect()
    }

    fn project(&self, position: usize, command: &Command) -> AuditEntry {
        AuditEntry {
            audit_entry_id: command.audit_entry_id.clone(),
            command_id: command.id.clone(),
            table_id: self.table_id.clone(),
            table_name: self.table_name.clone(),
            position,
            timestamp: command.timestamp,
            kind: command.kind(),
            label: command.label.clone(),
            rows_affected: command.rows_affected,
            has_row_details: command.has_row_details,
            undone: position >= self.active_length,
            pruned: false,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
