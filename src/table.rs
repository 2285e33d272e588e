//! Table model: hidden identity columns, import and row access

use crate::error::{Result, TabcleanError};
use crate::lock::WriteGuard;
use crate::substrate::{as_text, quote_ident, quote_literal, text_value, ColumnInfo, Substrate, TextRow};
use duckdb::types::Value;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;

/// Stable row identity and order key.
pub const ROW_ID: &str = "_cs_id";
/// Identity assigned when a row is created; never changes afterwards.
pub const ORIGIN_ID: &str = "_cs_origin_id";

const INSERT_BATCH: usize = 500;

/// Columns that must never reach diffs, exports or column pickers
pub fn is_internal_column(name: &str) -> bool {
    name.starts_with("_cs_") || name.starts_with("__base_")
}

/// User-visible columns of a live table, in table order
pub fn user_columns(db: &Substrate, table: &str) -> Result<Vec<ColumnInfo>> {
    Ok(db
        .columns(table)?
        .into_iter()
        .filter(|c| !is_internal_column(&c.name))
        .collect())
}

pub fn user_column_names(db: &Substrate, table: &str) -> Result<Vec<String>> {
    Ok(user_columns(db, table)?.into_iter().map(|c| c.name).collect())
}

/// Error unless `column` is a user column of `table`
pub fn require_column(db: &Substrate, table: &str, column: &str) -> Result<()> {
    if is_internal_column(column) {
        return Err(TabcleanError::validation(format!(
            "Column '{}' is internal and cannot be targeted",
            column
        )));
    }
    let names = user_column_names(db, table)?;
    if names.iter().any(|n| n == column) {
        Ok(())
    } else {
        Err(TabcleanError::validation(format!(
            "Column '{}' not found in table '{}'",
            column, table
        )))
    }
}

/// Check a list of new column names: non-empty, unique, not internal
pub fn validate_column_names(names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(TabcleanError::validation("A table needs at least one column"));
    }
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(TabcleanError::validation("Column names must not be empty"));
        }
        if is_internal_column(name) {
            return Err(TabcleanError::validation(format!(
                "Column name '{}' uses a reserved prefix",
                name
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(TabcleanError::validation(format!(
                "Duplicate column name '{}'",
                name
            )));
        }
    }
    Ok(())
}

fn has_column(columns: &[ColumnInfo], name: &str) -> bool {
    columns.iter().any(|c| c.name == name)
}

/// Make sure the table carries `_cs_id` and `_cs_origin_id` as its leading
/// columns.
///
/// Existing identities are kept; rows without one get fresh values. Row
/// order follows the existing `_cs_id` when present, scan order otherwise.
pub fn ensure_identity(db: &Substrate, _guard: &WriteGuard, table: &str) -> Result<bool> {
    let columns = db.columns(table)?;
    let has_row_id = has_column(&columns, ROW_ID);
    let has_origin = has_column(&columns, ORIGIN_ID);
    if has_row_id && has_origin {
        let nulls = db.query_count(&format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NULL OR {} IS NULL",
            quote_ident(table),
            quote_ident(ROW_ID),
            quote_ident(ORIGIN_ID)
        ))?;
        if nulls == 0 {
            return Ok(false);
        }
    }

    let user_select = columns
        .iter()
        .filter(|c| c.name != ROW_ID && c.name != ORIGIN_ID)
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let order = if has_row_id {
        format!("ORDER BY {} NULLS LAST", quote_ident(ROW_ID))
    } else {
        String::new()
    };
    let origin = if has_origin {
        format!("COALESCE({}, CAST(uuid() AS VARCHAR))", quote_ident(ORIGIN_ID))
    } else {
        "CAST(uuid() AS VARCHAR)".to_string()
    };

    let staging = format!("_cs_identity_{}", table);
    db.drop_table(&staging)?;
    db.execute(&format!(
        "CREATE TABLE {} AS SELECT CAST(row_number() OVER ({}) AS BIGINT) AS {}, {} AS {}{}{} FROM {}",
        quote_ident(&staging),
        order,
        quote_ident(ROW_ID),
        origin,
        quote_ident(ORIGIN_ID),
        if user_select.is_empty() { "" } else { ", " },
        user_select,
        quote_ident(table)
    ))?;
    db.swap_table(table, &staging, "assign identity")?;
    log::debug!("Assigned row identities for table '{}'", table);
    Ok(true)
}

/// Load a CSV file into a new table with every value kept as text
pub fn import_csv(db: &Substrate, guard: &WriteGuard, path: &Path, table: &str) -> Result<u64> {
    if !path.is_file() {
        return Err(TabcleanError::validation(format!(
            "File not found: {}",
            path.display()
        )));
    }
    if db.table_exists(table)? {
        return Err(TabcleanError::validation(format!("Table '{}' already exists", table)));
    }

    let staging = format!("_cs_import_{}", table);
    db.drop_table(&staging)?;
    db.execute(&format!(
        "CREATE TABLE {} AS SELECT * FROM read_csv_auto({}, header = true, all_varchar = true)",
        quote_ident(&staging),
        quote_literal(&path.to_string_lossy())
    ))
    .map_err(|e| {
        TabcleanError::validation(format!("Failed to read CSV '{}': {}", path.display(), e))
    })?;

    let names = db.column_names(&staging)?;
    if let Err(e) = validate_column_names(&names) {
        db.drop_table(&staging)?;
        return Err(e);
    }

    db.rename_table(&staging, table)?;
    ensure_identity(db, guard, table)?;
    db.row_count(table)
}

/// Create a VARCHAR table from in-memory rows
pub fn create_from_rows(
    db: &Substrate,
    guard: &WriteGuard,
    table: &str,
    columns: &[String],
    rows: &[TextRow],
) -> Result<u64> {
    validate_column_names(columns)?;
    if db.table_exists(table)? {
        return Err(TabcleanError::validation(format!("Table '{}' already exists", table)));
    }
    if let Some(bad) = rows.iter().find(|r| r.len() != columns.len()) {
        return Err(TabcleanError::validation(format!(
            "Row has {} values but the table has {} columns",
            bad.len(),
            columns.len()
        )));
    }

    let definition = columns
        .iter()
        .map(|c| format!("{} VARCHAR", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    db.execute(&format!("CREATE TABLE {} ({})", quote_ident(table), definition))?;

    let values: Vec<Vec<duckdb::types::Value>> = rows
        .iter()
        .map(|row| row.iter().map(|v| text_value(v.as_deref())).collect())
        .collect();
    let column_refs: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
    db.insert_batched(table, &column_refs, &values, INSERT_BATCH)?;

    ensure_identity(db, guard, table)?;
    db.row_count(table)
}

/// Read the given columns as text, ordered by row identity
pub fn read_rows(db: &Substrate, table: &str, columns: &[String]) -> Result<Vec<TextRow>> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }
    let select = columns.iter().map(|c| as_text(c)).collect::<Vec<_>>().join(", ");
    let order = if db.column_names(table)?.iter().any(|c| c == ROW_ID) {
        format!(" ORDER BY {}", quote_ident(ROW_ID))
    } else {
        String::new()
    };
    db.query_text(
        &format!("SELECT {} FROM {}{}", select, quote_ident(table), order),
        columns.len(),
    )
}

/// Read every user column, ordered by row identity
pub fn read_user_rows(db: &Substrate, table: &str) -> Result<(Vec<String>, Vec<TextRow>)> {
    let columns = user_column_names(db, table)?;
    let rows = read_rows(db, table, &columns)?;
    Ok((columns, rows))
}

/// One row with its identities and user values
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    pub row_id: i64,
    pub origin_id: String,
    pub values: IndexMap<String, Option<String>>,
}

fn row_select(columns: &[String]) -> String {
    let mut select = vec![as_text(ROW_ID), quote_ident(ORIGIN_ID)];
    select.extend(columns.iter().map(|c| as_text(c)));
    select.join(", ")
}

fn parse_record(columns: &[String], mut row: TextRow) -> Result<RowRecord> {
    let user_values = row.split_off(2);
    let origin_id = row.pop().flatten();
    let row_id = row.pop().flatten().and_then(|v| v.parse::<i64>().ok());
    match (row_id, origin_id) {
        (Some(row_id), Some(origin_id)) => Ok(RowRecord {
            row_id,
            origin_id,
            values: columns.iter().cloned().zip(user_values).collect(),
        }),
        _ => Err(TabcleanError::validation("Row is missing its identity columns")),
    }
}

/// The row at 1-based `position` in identity order
pub fn row_at(db: &Substrate, table: &str, position: u64) -> Result<RowRecord> {
    let total = db.row_count(table)?;
    if position == 0 || position > total {
        return Err(TabcleanError::validation(format!(
            "Row {} is out of range for '{}' ({} rows)",
            position, table, total
        )));
    }
    let columns = user_column_names(db, table)?;
    let rows = db.query_text(
        &format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT 1 OFFSET {}",
            row_select(&columns),
            quote_ident(table),
            quote_ident(ROW_ID),
            position - 1
        ),
        columns.len() + 2,
    )?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| TabcleanError::validation(format!("Row {} not found", position)))?;
    parse_record(&columns, row)
}

/// The row carrying `origin_id`, if present
pub fn find_row(db: &Substrate, table: &str, origin_id: &str) -> Result<Option<RowRecord>> {
    let columns = user_column_names(db, table)?;
    let rows = db.query_text_params(
        &format!(
            "SELECT {} FROM {} WHERE {} = ?",
            row_select(&columns),
            quote_ident(table),
            quote_ident(ORIGIN_ID)
        ),
        columns.len() + 2,
        &[Value::Text(origin_id.to_string())],
    )?;
    rows.into_iter()
        .next()
        .map(|row| parse_record(&columns, row))
        .transpose()
}

/// Write one cell, cast to the column's type. Returns rows updated.
pub fn set_cell(
    db: &Substrate,
    _guard: &WriteGuard,
    table: &str,
    origin_id: &str,
    column: &str,
    value: Option<&str>,
) -> Result<usize> {
    require_column(db, table, column)?;
    let data_type = column_type(db, table, column)?;
    db.execute_params(
        &format!(
            "UPDATE {} SET {} = CAST(CAST(? AS VARCHAR) AS {}) WHERE {} = ?",
            quote_ident(table),
            quote_ident(column),
            data_type,
            quote_ident(ORIGIN_ID)
        ),
        &[text_value(value), Value::Text(origin_id.to_string())],
    )
}

fn column_type(db: &Substrate, table: &str, column: &str) -> Result<String> {
    db.columns(table)?
        .into_iter()
        .find(|c| c.name == column)
        .map(|c| c.data_type)
        .ok_or_else(|| {
            TabcleanError::validation(format!("Column '{}' not found in table '{}'", column, table))
        })
}

/// Error unless `value` converts to the type of `column`
pub fn check_value(db: &Substrate, table: &str, column: &str, value: Option<&str>) -> Result<()> {
    require_column(db, table, column)?;
    let Some(value) = value else {
        return Ok(());
    };
    let data_type = column_type(db, table, column)?;
    let converts = db.query_count_params(
        &format!(
            "SELECT CAST(TRY_CAST(CAST(? AS VARCHAR) AS {}) IS NOT NULL AS BIGINT)",
            data_type
        ),
        &[Value::Text(value.to_string())],
    )?;
    if converts == 0 {
        return Err(TabcleanError::validation(format!(
            "'{}' is not a valid {} value for column '{}'",
            value, data_type, column
        )));
    }
    Ok(())
}

/// A page of user rows in identity order
pub fn read_page(db: &Substrate, table: &str, limit: usize, offset: usize) -> Result<(Vec<String>, Vec<TextRow>)> {
    let columns = user_column_names(db, table)?;
    let select = columns.iter().map(|c| as_text(c)).collect::<Vec<_>>().join(", ");
    let rows = db.query_text(
        &format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT {} OFFSET {}",
            select,
            quote_ident(table),
            quote_ident(ROW_ID),
            limit,
            offset
        ),
        columns.len(),
    )?;
    Ok((columns, rows))
}

/// `_cs_id` a row inserted at 1-based `position` receives; one past the end
/// appends
pub fn row_id_for_position(db: &Substrate, table: &str, position: u64) -> Result<i64> {
    let total = db.row_count(table)?;
    if position == 0 || position > total + 1 {
        return Err(TabcleanError::validation(format!(
            "Insert position {} is out of range for '{}' ({} rows)",
            position, table, total
        )));
    }
    if position <= total {
        return Ok(row_at(db, table, position)?.row_id);
    }
    let max = db.query_optional_text(&format!(
        "SELECT CAST(COALESCE(MAX({}), 0) AS VARCHAR) FROM {}",
        quote_ident(ROW_ID),
        quote_ident(table)
    ))?;
    Ok(max.and_then(|m| m.parse::<i64>().ok()).unwrap_or(0) + 1)
}

/// Insert a row with a given identity, shifting `_cs_id >= row_id` up by one.
///
/// Columns missing from `values` are NULL.
pub fn insert_row(
    db: &Substrate,
    _guard: &WriteGuard,
    table: &str,
    row_id: i64,
    origin_id: &str,
    values: &IndexMap<String, Option<String>>,
) -> Result<()> {
    let columns = user_columns(db, table)?;
    if let Some(unknown) = values.keys().find(|k| !has_column(&columns, k)) {
        return Err(TabcleanError::validation(format!(
            "Column '{}' not found in table '{}'",
            unknown, table
        )));
    }

    let mut names = vec![quote_ident(ROW_ID), quote_ident(ORIGIN_ID)];
    let mut placeholders = vec!["?".to_string(), "?".to_string()];
    let mut params = vec![Value::BigInt(row_id), Value::Text(origin_id.to_string())];
    for column in columns.iter().filter(|c| values.contains_key(&c.name)) {
        names.push(quote_ident(&column.name));
        placeholders.push(format!("CAST(CAST(? AS VARCHAR) AS {})", column.data_type));
        params.push(text_value(values.get(&column.name).and_then(|v| v.as_deref())));
    }

    db.execute_params(
        &format!(
            "UPDATE {t} SET {id} = {id} + 1 WHERE {id} >= ?",
            t = quote_ident(table),
            id = quote_ident(ROW_ID)
        ),
        &[Value::BigInt(row_id)],
    )?;
    db.execute_params(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            names.join(", "),
            placeholders.join(", ")
        ),
        &params,
    )
    .map_err(|e| TabcleanError::partial_mutation("insert row", e.to_string()))?;
    Ok(())
}

/// Delete the row carrying `origin_id` and close the gap it leaves in
/// `_cs_id`
pub fn delete_row(db: &Substrate, _guard: &WriteGuard, table: &str, row_id: i64, origin_id: &str) -> Result<()> {
    let deleted = db.execute_params(
        &format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(table),
            quote_ident(ORIGIN_ID)
        ),
        &[Value::Text(origin_id.to_string())],
    )?;
    if deleted == 0 {
        return Err(TabcleanError::validation(format!(
            "Row {} not found in '{}'",
            origin_id, table
        )));
    }
    db.execute_params(
        &format!(
            "UPDATE {t} SET {id} = {id} - 1 WHERE {id} > ?",
            t = quote_ident(table),
            id = quote_ident(ROW_ID)
        ),
        &[Value::BigInt(row_id)],
    )
    .map_err(|e| TabcleanError::partial_mutation("delete row", e.to_string()))?;
    Ok(())
}
