//! DuckDB connection settings and capability checks

use crate::error::{Result, TabcleanError};
use duckdb::Connection;

/// Functions the transformation SQL relies on. Older DuckDB builds lack some
/// of them, which would otherwise surface as confusing mid-transform errors.
const REQUIRED_FUNCTIONS: &[&str] = &[
    "regexp_replace",
    "regexp_matches",
    "try_strptime",
    "strftime",
    "date_sub",
    "lpad",
    "split_part",
    "string_split",
    "list_transform",
    "array_to_string",
    "concat_ws",
    "md5",
];

/// Shards and snapshots are parquet files. The extension must be compiled
/// in; an autoloaded one would need network access on first use.
const PARQUET_FUNCTIONS: &[&str] = &["read_parquet", "parquet_metadata"];

/// Connection-level settings applied to every substrate connection
#[derive(Debug, Clone)]
pub struct DuckDbSettings {
    pub memory_limit: String,
}

impl DuckDbSettings {
    pub fn new(memory_limit: impl Into<String>) -> Self {
        Self {
            memory_limit: memory_limit.into(),
        }
    }

    /// Apply the settings to a freshly opened connection
    pub fn apply(&self, connection: &Connection) -> Result<()> {
        connection.execute_batch(&format!(
            "SET memory_limit='{}';
             SET enable_progress_bar=false;
             SET preserve_insertion_order=true;
             SET enable_object_cache=true;",
            self.memory_limit.replace('\'', "")
        ))?;
        Ok(())
    }
}

/// Verify that the linked DuckDB build provides every function the engine uses
pub fn verify_capabilities(connection: &Connection) -> Result<String> {
    let version: String = connection.query_row("SELECT version()", [], |row| row.get(0))?;

    let missing = missing_functions(connection, REQUIRED_FUNCTIONS)?;
    if !missing.is_empty() {
        return Err(TabcleanError::config(format!(
            "DuckDB {} is missing required functions: {}",
            version,
            missing.join(", ")
        )));
    }

    if !parquet_loaded(connection)? || !missing_functions(connection, PARQUET_FUNCTIONS)?.is_empty() {
        return Err(TabcleanError::config(format!(
            "DuckDB {} was built without the parquet extension, which shard and snapshot storage require",
            version
        )));
    }

    log::debug!("DuckDB {} provides all required functions", version);
    Ok(version)
}

fn missing_functions<'a>(connection: &Connection, names: &[&'a str]) -> Result<Vec<&'a str>> {
    let list = names
        .iter()
        .map(|name| format!("'{}'", name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = connection.prepare(&format!(
        "SELECT DISTINCT function_name FROM duckdb_functions() WHERE function_name IN ({})",
        list
    ))?;
    let found: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<_, _>>()?;

    Ok(names
        .iter()
        .copied()
        .filter(|name| !found.iter().any(|f| f == name))
        .collect())
}

fn parquet_loaded(connection: &Connection) -> Result<bool> {
    let loaded: i64 = connection.query_row(
        "SELECT COUNT(*) FROM duckdb_extensions() WHERE extension_name = 'parquet' AND loaded",
        [],
        |row| row.get(0),
    )?;
    Ok(loaded > 0)
}

/// Open a throwaway connection and check the substrate is usable
pub fn init_duckdb() -> Result<String> {
    let connection = Connection::open_in_memory()?;
    DuckDbSettings::new("1GB").apply(&connection)?;
    verify_capabilities(&connection)
}
