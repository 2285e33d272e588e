//! Per-cell audit capture and the audit detail store
//!
//! Detail rows live in the internal table `_cs_audit_details`. Capture is
//! best-effort: any failure is logged and reported as "no row details", it
//! never aborts the transformation that triggered it.

use crate::error::{Result, TabcleanError};
use crate::estimator::Estimate;
use crate::lock::WriteGuard;
use crate::substrate::{quote_ident, quote_literal, text_value, Substrate};
use crate::table::{self, ORIGIN_ID, ROW_ID};
use crate::transform::sql::CellExpr;
use duckdb::types::Value;
use serde::{Deserialize, Serialize};

pub const DETAILS_TABLE: &str = "_cs_audit_details";

const DETAIL_COLUMNS: &[&str] = &[
    "audit_entry_id",
    "row_index",
    "row_id",
    "column_name",
    "previous_value",
    "new_value",
];

/// One changed cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDetail {
    pub audit_entry_id: String,
    /// 1-based row position at the time of the change
    pub row_index: i64,
    /// Origin id of the row
    pub row_id: String,
    pub column_name: String,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
}

/// A page of detail rows plus the total available for the entry
#[derive(Debug, Clone, Serialize)]
pub struct RowDetailsPage {
    pub rows: Vec<RowDetail>,
    pub total: u64,
}

/// Capture limits
#[derive(Debug, Clone, Copy)]
pub struct AuditSettings {
    pub row_cap: u64,
    pub batch_size: usize,
}

impl AuditSettings {
    /// Expression steps are captured only when the estimate is known,
    /// non-zero and within the cap
    pub fn should_capture(&self, estimate: Estimate) -> bool {
        matches!(estimate, Estimate::Rows(n) if n > 0 && n <= self.row_cap)
    }

    pub fn is_capped(&self, estimate: Estimate) -> bool {
        matches!(estimate, Estimate::Rows(n) if n > self.row_cap)
    }
}

/// Create the detail table if this database has none yet
pub fn ensure_store(db: &Substrate) -> Result<()> {
    db.execute(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            audit_entry_id VARCHAR NOT NULL,
            row_index BIGINT,
            row_id VARCHAR,
            column_name VARCHAR,
            previous_value VARCHAR,
            new_value VARCHAR,
            created_at TIMESTAMP DEFAULT current_timestamp
        )",
        quote_ident(DETAILS_TABLE)
    ))?;
    Ok(())
}

/// Insert detail rows in multi-row batches
pub fn record(
    db: &Substrate,
    _guard: &WriteGuard,
    details: &[RowDetail],
    batch_size: usize,
) -> Result<usize> {
    ensure_store(db)?;
    let rows: Vec<Vec<Value>> = details
        .iter()
        .map(|d| {
            vec![
                Value::Text(d.audit_entry_id.clone()),
                Value::BigInt(d.row_index),
                Value::Text(d.row_id.clone()),
                Value::Text(d.column_name.clone()),
                text_value(d.previous_value.as_deref()),
                text_value(d.new_value.as_deref()),
            ]
        })
        .collect();
    db.insert_batched(DETAILS_TABLE, DETAIL_COLUMNS, &rows, batch_size)
}

fn parse_detail(audit_entry_id: &str, row: Vec<Option<String>>) -> Result<RowDetail> {
    let mut values = row.into_iter();
    let mut next = || values.next().flatten();
    let row_id = next().unwrap_or_default();
    let row_index = next()
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| TabcleanError::audit_capture("detail row without a row index"))?;
    let column_name = next().unwrap_or_default();
    let previous_value = next();
    let new_value = next();
    Ok(RowDetail {
        audit_entry_id: audit_entry_id.to_string(),
        row_index,
        row_id,
        column_name,
        previous_value,
        new_value,
    })
}

/// Collect the changed cells of an expression step, before it runs
fn collect_expression_cells(
    db: &Substrate,
    table: &str,
    cells: &[CellExpr],
    audit_entry_id: &str,
    limit: u64,
) -> Result<Vec<RowDetail>> {
    let mut details = Vec::new();
    for cell in cells {
        let sql = format!(
            "SELECT row_id, CAST(row_index AS VARCHAR), {name}, before_value, after_value FROM (
                SELECT {origin} AS row_id,
                       row_number() OVER (ORDER BY {id}) AS row_index,
                       {before} AS before_value,
                       {after} AS after_value
                FROM {table}
             ) WHERE before_value IS DISTINCT FROM after_value
             ORDER BY row_index LIMIT {limit}",
            name = quote_literal(&cell.column),
            origin = quote_ident(ORIGIN_ID),
            id = quote_ident(ROW_ID),
            before = cell.before,
            after = cell.after,
            table = quote_ident(table),
            limit = limit
        );
        for row in db.query_text(&sql, 5)? {
            details.push(parse_detail(audit_entry_id, row)?);
        }
    }
    Ok(details)
}

/// Detail rows read before an expression step runs, written only once the
/// step has succeeded
#[derive(Debug)]
pub struct PendingCapture {
    details: Vec<RowDetail>,
}

impl PendingCapture {
    pub fn len(&self) -> usize {
        self.details.len()
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    /// Insert the detail rows. Returns whether any were stored.
    pub fn store(self, db: &Substrate, guard: &WriteGuard, table: &str, settings: AuditSettings) -> bool {
        if self.details.is_empty() {
            return false;
        }
        match record(db, guard, &self.details, settings.batch_size) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Audit capture for '{}' failed: {}", table, e);
                false
            }
        }
    }
}

/// Read the cells an expression step is about to change.
///
/// Must run before the mutation and writes nothing; `None` when the step
/// has no per-cell view or is over the cap.
pub fn capture(
    db: &Substrate,
    table: &str,
    cells: &[CellExpr],
    audit_entry_id: &str,
    estimate: Estimate,
    settings: AuditSettings,
) -> Option<PendingCapture> {
    if cells.is_empty() || !settings.should_capture(estimate) {
        return None;
    }

    match collect_expression_cells(
        db,
        table,
        cells,
        audit_entry_id,
        settings.row_cap.saturating_add(1),
    ) {
        Ok(details) => Some(PendingCapture { details }),
        Err(e) => {
            log::warn!("Audit capture for '{}' failed: {}", table, e);
            None
        }
    }
}

/// Copy of a table taken before a step whose effect cannot be expressed
/// per cell (custom SQL). Dropped on every path.
pub struct BeforeImage<'a> {
    db: &'a Substrate,
    name: String,
}

impl<'a> BeforeImage<'a> {
    pub fn take(db: &'a Substrate, _guard: &WriteGuard, table: &str) -> Result<Self> {
        let name = format!("_cs_audit_before_{}", table);
        db.copy_table(table, &name)?;
        Ok(Self { db, name })
    }

    fn changed_cells(&self, table: &str, audit_entry_id: &str) -> Result<Vec<RowDetail>> {
        let before_columns = table::user_column_names(self.db, &self.name)?;
        let after_columns = table::user_column_names(self.db, table)?;
        let common: Vec<&String> = after_columns
            .iter()
            .filter(|c| before_columns.contains(c))
            .collect();

        let origin = quote_ident(ORIGIN_ID);
        let id = quote_ident(ROW_ID);
        let mut details = Vec::new();

        for column in common {
            let col = quote_ident(column);
            let sql = format!(
                "SELECT COALESCE(a.row_id, b.row_id), CAST(COALESCE(a.row_index, b.row_index) AS VARCHAR),
                        {name}, b.value, a.value
                 FROM (SELECT {origin} AS row_id, row_number() OVER (ORDER BY {id}) AS row_index,
                              CAST({col} AS VARCHAR) AS value FROM {after}) a
                 FULL OUTER JOIN
                      (SELECT {origin} AS row_id, row_number() OVER (ORDER BY {id}) AS row_index,
                              CAST({col} AS VARCHAR) AS value FROM {before}) b
                 ON a.row_id = b.row_id
                 WHERE a.value IS DISTINCT FROM b.value
                 ORDER BY 2",
                name = quote_literal(column),
                origin = origin,
                id = id,
                col = col,
                after = quote_ident(table),
                before = quote_ident(&self.name)
            );
            for row in self.db.query_text(&sql, 5)? {
                details.push(parse_detail(audit_entry_id, row)?);
            }
        }
        Ok(details)
    }

    /// Diff the image against the table's current state by origin id and
    /// store one detail row per changed cell
    pub fn record_changes(
        &self,
        guard: &WriteGuard,
        table: &str,
        audit_entry_id: &str,
        settings: AuditSettings,
    ) -> bool {
        let result = self.changed_cells(table, audit_entry_id).and_then(|details| {
            if details.is_empty() {
                return Ok(false);
            }
            record(self.db, guard, &details, settings.batch_size)?;
            Ok(true)
        });
        match result {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("Audit capture for custom SQL on '{}' failed: {}", table, e);
                false
            }
        }
    }
}

impl Drop for BeforeImage<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.db.drop_table(&self.name) {
            log::warn!("Failed to drop audit image '{}': {}", self.name, e);
        }
    }
}

/// A page of detail rows for one audit entry, in row order
pub fn row_details(
    db: &Substrate,
    audit_entry_id: &str,
    limit: usize,
    offset: usize,
) -> Result<RowDetailsPage> {
    if !db.table_exists(DETAILS_TABLE)? {
        return Ok(RowDetailsPage {
            rows: Vec::new(),
            total: 0,
        });
    }
    let id = Value::Text(audit_entry_id.to_string());
    let total = db.query_count_params(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE audit_entry_id = ?",
            quote_ident(DETAILS_TABLE)
        ),
        &[id.clone()],
    )?;
    let rows = db.query_text_params(
        &format!(
            "SELECT row_id, CAST(row_index AS VARCHAR), column_name, previous_value, new_value
             FROM {} WHERE audit_entry_id = ?
             ORDER BY row_index, column_name LIMIT {} OFFSET {}",
            quote_ident(DETAILS_TABLE),
            limit,
            offset
        ),
        5,
        &[id],
    )?;
    let rows = rows
        .into_iter()
        .map(|row| parse_detail(audit_entry_id, row))
        .collect::<Result<Vec<_>>>()?;
    Ok(RowDetailsPage { rows, total })
}

/// Remove the detail rows of the given entries
pub fn delete_entries(db: &Substrate, _guard: &WriteGuard, audit_entry_ids: &[String]) -> Result<()> {
    if audit_entry_ids.is_empty() || !db.table_exists(DETAILS_TABLE)? {
        return Ok(());
    }
    for chunk in audit_entry_ids.chunks(500) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let params: Vec<Value> = chunk.iter().map(|id| Value::Text(id.clone())).collect();
        db.execute_params(
            &format!(
                "DELETE FROM {} WHERE audit_entry_id IN ({})",
                quote_ident(DETAILS_TABLE),
                placeholders
            ),
            &params,
        )?;
    }
    Ok(())
}
