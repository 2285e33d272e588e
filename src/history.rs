//! Undo/redo orchestration and historical state materialization
//!
//! Undo prefers an exact inverse (cell edits, rename, row insert and
//! delete). Anything else is undone by restoring the nearest snapshot at or
//! before the new position and replaying the commands after it. Redo
//! restores the command's own snapshot when it has one and re-executes the
//! command otherwise.

use crate::error::{Result, TabcleanError};
use crate::executor;
use crate::lock::WriteGuard;
use crate::snapshot::SnapshotStore;
use crate::substrate::Substrate;
use crate::table;
use crate::timeline::{Command, CommandParams, Timeline};
use crate::transform::Transform;

/// Re-run a command's effect on `table`
pub fn apply_forward(db: &Substrate, guard: &WriteGuard, table: &str, command: &Command) -> Result<()> {
    match &command.params {
        CommandParams::Transform(step) => executor::replay(db, guard, table, step),
        CommandParams::EditCell | CommandParams::BatchEdit => {
            for change in command.cell_changes.iter().flatten() {
                let updated = table::set_cell(
                    db,
                    guard,
                    table,
                    &change.row_id,
                    &change.column,
                    change.value.as_deref(),
                )?;
                if updated == 0 {
                    log::warn!("Row {} no longer exists in '{}'", change.row_id, table);
                }
            }
            Ok(())
        }
        CommandParams::InsertRow {
            row_id,
            origin_id,
            values,
        } => table::insert_row(db, guard, table, *row_id, origin_id, values),
        CommandParams::DeleteRow {
            row_id, origin_id, ..
        } => table::delete_row(db, guard, table, *row_id, origin_id),
    }
}

/// Reverse a command exactly. Errors for commands without an inverse.
pub fn apply_inverse(db: &Substrate, guard: &WriteGuard, table: &str, command: &Command) -> Result<()> {
    match &command.params {
        CommandParams::Transform(Transform::RenameColumn { column, new_name }) => {
            executor::rename_column(db, table, new_name, column)
        }
        CommandParams::Transform(step) => Err(TabcleanError::validation(format!(
            "{} has no exact inverse",
            step.type_name()
        ))),
        CommandParams::EditCell | CommandParams::BatchEdit => {
            for change in command.cell_changes.iter().flatten().rev() {
                table::set_cell(
                    db,
                    guard,
                    table,
                    &change.row_id,
                    &change.column,
                    change.previous.as_deref(),
                )?;
            }
            Ok(())
        }
        CommandParams::InsertRow {
            row_id, origin_id, ..
        } => table::delete_row(db, guard, table, *row_id, origin_id),
        CommandParams::DeleteRow {
            row_id,
            origin_id,
            values,
        } => table::insert_row(db, guard, table, *row_id, origin_id, values),
    }
}

/// Replay `commands[from..=to]` onto `table`
fn replay_range(
    db: &Substrate,
    guard: &WriteGuard,
    table: &str,
    timeline: &Timeline,
    from: i64,
    to: i64,
) -> Result<()> {
    if to < from {
        return Ok(());
    }
    for index in from.max(0) as usize..=to as usize {
        let command = timeline.command(index).ok_or_else(|| {
            TabcleanError::persistence(format!("timeline has no command {}", index))
        })?;
        apply_forward(db, guard, table, command)?;
    }
    Ok(())
}

/// Rebuild the live table as of `position` from the nearest snapshot
pub fn rebuild_live(
    db: &Substrate,
    guard: &WriteGuard,
    snapshots: &SnapshotStore<'_>,
    key: &str,
    timeline: &Timeline,
    position: i64,
) -> Result<()> {
    let (snapshot_position, snapshot_id) = timeline
        .snapshot_at_or_before(position)
        .ok_or_else(|| TabcleanError::persistence(format!("no snapshot to rebuild '{}' from", key)))?;
    snapshots.restore(db, guard, key, &snapshot_id, key)?;
    replay_range(db, guard, key, timeline, snapshot_position + 1, position)?;
    log::debug!(
        "Rebuilt '{}' at position {} from snapshot at {}",
        key,
        position,
        snapshot_position
    );
    Ok(())
}

/// [`rebuild_live`], putting the current table back when the rebuild fails
/// part way. Fails with a partial mutation when even that is not possible.
fn rebuild_or_keep(
    db: &Substrate,
    guard: &WriteGuard,
    snapshots: &SnapshotStore<'_>,
    key: &str,
    timeline: &Timeline,
    position: i64,
) -> Result<()> {
    let backup = format!("_cs_undo_{}", key);
    db.copy_table(key, &backup)?;
    match rebuild_live(db, guard, snapshots, key, timeline, position) {
        Ok(()) => {
            if let Err(e) = db.drop_table(&backup) {
                log::warn!("Could not drop undo backup of '{}': {}", key, e);
            }
            Ok(())
        }
        Err(e) => match db.swap_table(key, &backup, "undo") {
            Ok(()) => Err(e),
            Err(restore) => Err(TabcleanError::partial_mutation(
                "undo",
                format!("{}; putting back the previous state also failed: {}", e, restore),
            )),
        },
    }
}

/// Materialize the state at `position` into a separate table `target`.
///
/// Custom SQL addresses the live table by name, so a custom SQL command
/// without a snapshot cannot be replayed here.
pub fn materialize(
    db: &Substrate,
    guard: &WriteGuard,
    snapshots: &SnapshotStore<'_>,
    key: &str,
    timeline: &Timeline,
    position: i64,
    target: &str,
) -> Result<()> {
    let (snapshot_position, snapshot_id) = timeline
        .snapshot_at_or_before(position)
        .ok_or_else(|| TabcleanError::persistence(format!("no snapshot of '{}' to read", key)))?;

    let needs_custom_sql = ((snapshot_position + 1).max(0)..=position)
        .filter_map(|i| timeline.command(i as usize))
        .any(|c| matches!(c.params, CommandParams::Transform(Transform::CustomSql { .. })));
    if needs_custom_sql {
        return Err(TabcleanError::validation(format!(
            "state {} of '{}' depends on custom SQL without a snapshot",
            position, key
        )));
    }

    snapshots.load_into(db, guard, key, &snapshot_id, target)?;
    if let Err(e) = replay_range(db, guard, target, timeline, snapshot_position + 1, position) {
        let _ = db.drop_table(target);
        return Err(e);
    }
    Ok(())
}

/// Undo the last active command of `timeline` against the live table `key`.
///
/// The timeline pointer is only moved when the table change succeeded.
pub fn undo(
    db: &Substrate,
    guard: &WriteGuard,
    snapshots: &SnapshotStore<'_>,
    key: &str,
    timeline: &mut Timeline,
) -> Result<Command> {
    let command = timeline.undo()?.clone();
    let result = if command.has_exact_inverse() {
        apply_inverse(db, guard, key, &command)
    } else {
        rebuild_or_keep(db, guard, snapshots, key, timeline, timeline.current_position())
    };
    if let Err(e) = result {
        timeline.active_length += 1;
        return Err(e);
    }
    log::info!("Undid '{}' on '{}'", command.label, key);
    Ok(command)
}

/// Redo the next command of `timeline` against the live table `key`
pub fn redo(
    db: &Substrate,
    guard: &WriteGuard,
    snapshots: &SnapshotStore<'_>,
    key: &str,
    timeline: &mut Timeline,
) -> Result<Command> {
    let command = timeline.redo()?.clone();
    let result = match &command.snapshot_id {
        Some(id) if snapshots.exists(key, id) => snapshots.restore(db, guard, key, id, key),
        _ => apply_forward(db, guard, key, &command),
    };
    if let Err(e) = result {
        timeline.active_length -= 1;
        return Err(e);
    }
    log::info!("Redid '{}' on '{}'", command.label, key);
    Ok(command)
}
