//! Thin wrapper around the DuckDB connection that every component shares

use crate::duckdb_config::DuckDbSettings;
use crate::error::{Result, TabcleanError};
use duckdb::types::Value;
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A row rendered as text; `None` is SQL NULL.
pub type TextRow = Vec<Option<String>>;

/// Column name and DuckDB type, in table order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// The embedded relational engine the transformation engine drives.
///
/// All methods take `&self`; mutating calls are serialized by the caller
/// through [`crate::lock`].
pub struct Substrate {
    connection: Connection,
}

impl Substrate {
    /// In-memory database, used by tests and throwaway sessions
    pub fn open_in_memory(settings: &DuckDbSettings) -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        settings.apply(&connection)?;
        Ok(Self { connection })
    }

    /// File-backed database inside a workspace
    pub fn open(path: &Path, settings: &DuckDbSettings) -> Result<Self> {
        let connection = Connection::open(path)?;
        settings.apply(&connection)?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn execute(&self, sql: &str) -> Result<usize> {
        log::debug!("execute: {}", sql);
        Ok(self.connection.execute(sql, [])?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        log::debug!("execute_batch: {}", sql);
        Ok(self.connection.execute_batch(sql)?)
    }

    pub fn execute_params(&self, sql: &str, params: &[Value]) -> Result<usize> {
        log::debug!("execute ({} params): {}", params.len(), sql);
        let mut stmt = self.connection.prepare(sql)?;
        Ok(stmt.execute(duckdb::params_from_iter(params.iter()))?)
    }

    /// Run a query returning a single integer, such as `SELECT COUNT(*)`
    pub fn query_count(&self, sql: &str) -> Result<u64> {
        log::debug!("count: {}", sql);
        let count: i64 = self.connection.query_row(sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn query_count_params(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut stmt = self.connection.prepare(sql)?;
        let count: i64 =
            stmt.query_row(duckdb::params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Run a query whose columns are all VARCHAR and collect the rows
    pub fn query_text(&self, sql: &str, column_count: usize) -> Result<Vec<TextRow>> {
        self.query_text_params(sql, column_count, &[])
    }

    pub fn query_text_params(
        &self,
        sql: &str,
        column_count: usize,
        params: &[Value],
    ) -> Result<Vec<TextRow>> {
        log::debug!("query: {}", sql);
        let mut stmt = self.connection.prepare(sql)?;
        let rows = stmt.query_map(duckdb::params_from_iter(params.iter()), |row| {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(row.get::<_, Option<String>>(i)?);
            }
            Ok(values)
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// First column of the first row as text, if any row came back
    pub fn query_optional_text(&self, sql: &str) -> Result<Option<String>> {
        let rows = self.query_text(sql, 1)?;
        Ok(rows.into_iter().next().and_then(|mut row| row.remove(0)))
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let count = self.query_count_params(
            "SELECT COUNT(*) FROM duckdb_tables() WHERE table_name = ?",
            &[Value::Text(name.to_string())],
        )?;
        Ok(count > 0)
    }

    /// Column names and types in table order
    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self.connection.prepare(
            "SELECT column_name, data_type FROM duckdb_columns()
             WHERE table_name = ? ORDER BY column_index",
        )?;
        let rows = stmt.query_map(duckdb::params![table], |row| {
            Ok(ColumnInfo {
                name: row.get::<_, String>(0)?,
                data_type: row.get::<_, String>(1)?,
            })
        })?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        if columns.is_empty() {
            return Err(TabcleanError::table_not_found(table));
        }
        Ok(columns)
    }

    pub fn column_names(&self, table: &str) -> Result<Vec<String>> {
        Ok(self.columns(table)?.into_iter().map(|c| c.name).collect())
    }

    pub fn row_count(&self, table: &str) -> Result<u64> {
        self.query_count(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))?;
        Ok(())
    }

    pub fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        self.execute(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(from),
            quote_ident(to)
        ))?;
        Ok(())
    }

    /// Copy a table (all columns, same order) under a new name
    pub fn copy_table(&self, from: &str, to: &str) -> Result<()> {
        self.drop_table(to)?;
        self.execute(&format!(
            "CREATE TABLE {} AS SELECT * FROM {}",
            quote_ident(to),
            quote_ident(from)
        ))?;
        Ok(())
    }

    /// Insert rows with multi-row parameterised statements of at most
    /// `batch_size` rows each.
    pub fn insert_batched(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
        batch_size: usize,
    ) -> Result<usize> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let row_placeholder = format!("({})", vec!["?"; columns.len()].join(", "));

        let mut inserted = 0;
        for chunk in rows.chunks(batch_size.max(1)) {
            let placeholders = vec![row_placeholder.as_str(); chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(table),
                column_list,
                placeholders
            );
            let params: Vec<Value> = chunk.iter().flat_map(|row| row.iter().cloned()).collect();
            inserted += self.execute_params(&sql, &params)?;
        }
        Ok(inserted)
    }

    /// Replace `target` with `replacement`: drop then rename.
    ///
    /// The drop is the point of no return; a failing rename leaves the data
    /// only under the replacement name and is reported as a partial mutation.
    pub fn swap_table(&self, target: &str, replacement: &str, operation: &str) -> Result<()> {
        self.drop_table(target)
            .map_err(|e| TabcleanError::partial_mutation(operation, format!("drop failed: {}", e)))?;
        self.rename_table(replacement, target).map_err(|e| {
            TabcleanError::partial_mutation(
                operation,
                format!("rename of '{}' to '{}' failed: {}", replacement, target, e),
            )
        })
    }
}

/// Quote an identifier for DuckDB
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for DuckDB
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `CAST(col AS VARCHAR)` for a quoted column reference
pub fn as_text(column: &str) -> String {
    format!("CAST({} AS VARCHAR)", quote_ident(column))
}

/// Convert an optional text value into a bindable parameter
pub fn text_value(value: Option<&str>) -> Value {
    match value {
        Some(v) => Value::Text(v.to_string()),
        None => Value::Null,
    }
}
