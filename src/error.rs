//! Error types for tabclean operations

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TabcleanError>;

#[derive(Error, Debug)]
pub enum TabcleanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Unknown transformation type, missing parameter, unknown column.
    /// Raised before anything is mutated.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A multi-statement mutation failed part way. The table is in an
    /// unspecified state and must be reloaded by the caller.
    #[error("Partial mutation during {operation}: {message}")]
    PartialMutation { operation: String, message: String },

    #[error("Audit capture failed: {message}")]
    AuditCapture { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Invalid manifest: {path}")]
    InvalidManifest { path: PathBuf },

    #[error("Table not found: {name}")]
    TableNotFound { name: String },

    #[error("Table '{name}' is not active")]
    TableNotActive { name: String },

    #[error("Nothing to undo for table '{table}'")]
    NothingToUndo { table: String },

    #[error("Nothing to redo for table '{table}'")]
    NothingToRedo { table: String },

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl TabcleanError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn partial_mutation(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PartialMutation {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    pub fn audit_capture(msg: impl Into<String>) -> Self {
        Self::AuditCapture {
            message: msg.into(),
        }
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence {
            message: msg.into(),
        }
    }

    pub fn table_not_found(name: impl Into<String>) -> Self {
        Self::TableNotFound { name: name.into() }
    }

    pub fn workspace(msg: impl Into<String>) -> Self {
        Self::Workspace(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// True for errors that leave the table in an unknown state.
    pub fn is_fatal_for_table(&self) -> bool {
        matches!(self, Self::PartialMutation { .. } | Self::Persistence { .. })
    }
}
