//! Transformation executor
//!
//! Runs one [`Transform`] against a live table: validate, count, estimate,
//! capture audit detail, mutate, count again. Callers must hold the write
//! lock and pass the guard in.

use crate::audit::{self, AuditSettings, BeforeImage};
use crate::error::{Result, TabcleanError};
use crate::estimator::{self, Estimate};
use crate::lock::WriteGuard;
use crate::substrate::{as_text, quote_ident, Substrate};
use crate::table;
use crate::transform::sql::{self, Mutation};
use crate::transform::Transform;
use serde::{Deserialize, Serialize};

/// Outcome of one applied step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    /// Rows in the table after the step
    pub row_count: u64,
    pub affected: u64,
    pub has_row_details: bool,
    pub audit_entry_id: String,
    /// More rows were affected than the audit cap allows to capture
    pub is_capped: bool,
}

/// Apply `step` to `table` and capture audit detail when it fits the cap
pub fn apply(
    db: &Substrate,
    guard: &WriteGuard,
    table: &str,
    step: &Transform,
    settings: AuditSettings,
) -> Result<TransformResult> {
    step.validate(db, table)?;

    let before = db.row_count(table)?;
    let estimate = estimator::estimate(db, table, step)?;
    let plan = sql::plan(db, table, step)?;
    let audit_entry_id = uuid::Uuid::new_v4().to_string();

    let (has_row_details, is_capped) = match &plan.mutation {
        Mutation::CustomSql { sql } => {
            let within_cap = before <= settings.row_cap;
            let image = if within_cap {
                BeforeImage::take(db, guard, table)
                    .map_err(|e| log::warn!("Skipping audit image for '{}': {}", table, e))
                    .ok()
            } else {
                None
            };
            run_custom_sql(db, guard, table, sql)?;
            let stored = image
                .map(|image| image.record_changes(guard, table, &audit_entry_id, settings))
                .unwrap_or(false);
            (stored, !within_cap)
        }
        mutation => {
            let pending = audit::capture(db, table, &plan.cells, &audit_entry_id, estimate, settings);
            mutate(db, guard, table, step, mutation)?;
            let stored = pending
                .map(|pending| pending.store(db, guard, table, settings))
                .unwrap_or(false);
            (stored, settings.is_capped(estimate))
        }
    };

    let after = db.row_count(table)?;
    let affected = match estimate {
        Estimate::Rows(n) => n,
        Estimate::Unknown => before.abs_diff(after),
    };

    log::info!(
        "Applied {} to '{}': {} rows affected ({} -> {} rows)",
        step.type_name(),
        table,
        affected,
        before,
        after
    );

    Ok(TransformResult {
        row_count: after,
        affected,
        has_row_details,
        audit_entry_id,
        is_capped,
    })
}

/// Re-run a step without estimation or audit, e.g. when rebuilding a
/// historical state. Produces the same table as the original run.
pub fn replay(db: &Substrate, guard: &WriteGuard, table: &str, step: &Transform) -> Result<()> {
    let plan = sql::plan(db, table, step)?;
    match &plan.mutation {
        Mutation::CustomSql { sql } => run_custom_sql(db, guard, table, sql),
        mutation => mutate(db, guard, table, step, mutation),
    }
}

fn mutate(
    db: &Substrate,
    _guard: &WriteGuard,
    table: &str,
    step: &Transform,
    mutation: &Mutation,
) -> Result<()> {
    match mutation {
        Mutation::Update { column, expr } => {
            widen_if_rewritten(db, table, column, expr)?;
            db.execute(&format!(
                "UPDATE {t} SET {c} = {e} WHERE {old} IS DISTINCT FROM CAST({e} AS VARCHAR)",
                t = quote_ident(table),
                c = quote_ident(column),
                e = expr,
                old = as_text(column)
            ))?;
        }
        Mutation::Rebuild { select } => {
            let staging = format!("_cs_stage_{}", table);
            db.drop_table(&staging)?;
            if let Err(e) = db.execute(&format!("CREATE TABLE {} AS {}", quote_ident(&staging), select)) {
                let _ = db.drop_table(&staging);
                return Err(e);
            }
            db.swap_table(table, &staging, step.type_name())?;
        }
        Mutation::Rename { from, to } => rename_column(db, table, from, to)?,
        Mutation::CustomSql { .. } => {
            return Err(TabcleanError::validation(
                "custom SQL must run through its own path",
            ))
        }
    }
    Ok(())
}

/// Text rewrites of a typed column would be cast back to that type on write.
/// When any value changes, the column becomes VARCHAR first.
fn widen_if_rewritten(db: &Substrate, table: &str, column: &str, expr: &str) -> Result<()> {
    let data_type = db
        .columns(table)?
        .into_iter()
        .find(|c| c.name == column)
        .map(|c| c.data_type)
        .ok_or_else(|| TabcleanError::validation(format!("Column '{}' not found in '{}'", column, table)))?;
    if data_type.eq_ignore_ascii_case("VARCHAR") {
        return Ok(());
    }
    if estimator::count_changed(db, table, column, expr)? == 0 {
        return Ok(());
    }
    log::info!("Converting '{}.{}' from {} to VARCHAR", table, column, data_type);
    db.execute(&format!(
        "ALTER TABLE {} ALTER COLUMN {} TYPE VARCHAR",
        quote_ident(table),
        quote_ident(column)
    ))?;
    Ok(())
}

pub fn rename_column(db: &Substrate, table: &str, from: &str, to: &str) -> Result<()> {
    db.execute(&format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table),
        quote_ident(from),
        quote_ident(to)
    ))?;
    Ok(())
}

fn run_custom_sql(db: &Substrate, guard: &WriteGuard, table: &str, sql: &str) -> Result<()> {
    db.execute_batch(sql)
        .map_err(|e| TabcleanError::partial_mutation("custom_sql", e.to_string()))?;
    if !db.table_exists(table)? {
        return Err(TabcleanError::partial_mutation(
            "custom_sql",
            format!("table '{}' no longer exists", table),
        ));
    }
    if table::ensure_identity(db, guard, table)? {
        log::info!("Re-assigned row identities on '{}' after custom SQL", table);
    }
    Ok(())
}
