//! Command-line interface for tabclean

use crate::combine::JoinKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tabclean")]
#[command(about = "A versioned transformation engine for cleaning tabular data")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override workspace location
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize tabclean workspace
    Init {
        /// Rewrite the config file with defaults even if it exists
        #[arg(long)]
        force: bool,
    },

    /// Import a CSV file as a new table
    Import {
        /// CSV file with a header row
        input: PathBuf,

        /// Display name for the table
        #[arg(long)]
        name: String,
    },

    /// List tables
    List {
        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Show a page of rows
    Show {
        /// Table id, name or key (defaults to the active table)
        table: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Apply a transformation
    Apply {
        table: Option<String>,

        /// Transformation type, e.g. "trim" or "replace"
        #[arg(long = "type")]
        kind: String,

        /// Target column
        #[arg(long)]
        column: Option<String>,

        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Edit one cell
    Edit {
        table: Option<String>,

        /// 1-based row position
        #[arg(long, value_parser = validate_position)]
        row: u64,

        #[arg(long)]
        column: String,

        /// New value
        #[arg(long, conflicts_with = "null", required_unless_present = "null")]
        value: Option<String>,

        /// Set the cell to NULL
        #[arg(long)]
        null: bool,
    },

    /// Insert a row
    InsertRow {
        table: Option<String>,

        /// 1-based position; defaults to appending
        #[arg(long, value_parser = validate_position)]
        at: Option<u64>,

        /// Cell values as column=value, repeatable
        #[arg(long = "set", value_parser = parse_assignment)]
        values: Vec<(String, String)>,
    },

    /// Delete a row
    DeleteRow {
        table: Option<String>,

        /// 1-based row position
        #[arg(long, value_parser = validate_position)]
        row: u64,
    },

    /// Undo the last command
    Undo { table: Option<String> },

    /// Redo the last undone command
    Redo { table: Option<String> },

    /// Show the command history
    History {
        table: Option<String>,

        /// Include undone commands
        #[arg(long)]
        all: bool,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Show the changed cells of one audit entry
    Audit {
        entry_id: String,

        #[arg(long, default_value = "50")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Compare two tables, or a table against one of its earlier states
    Diff {
        /// First table
        table: String,

        /// Second table
        #[arg(required_unless_present = "against", conflicts_with = "against")]
        other: Option<String>,

        /// Key columns, comma separated; rows match by identity when omitted
        #[arg(long)]
        key: Option<String>,

        /// Earlier state: "original", "@N", "~N" or a date
        #[arg(long)]
        against: Option<String>,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Persist a table as shards and evict it from memory
    Freeze { table: Option<String> },

    /// Reload a frozen table
    Thaw { table: String },

    /// Make another table active
    Switch { table: String },

    /// Rewrite a table's shards and clear its change-log
    Compact { table: Option<String> },

    /// Delete a table and everything stored for it
    Delete { table: String },

    /// Stack tables into a new one
    Stack {
        #[arg(required = true, num_args = 2..)]
        tables: Vec<String>,

        /// Name of the new table
        #[arg(long)]
        name: String,
    },

    /// Join two tables into a new one
    Join {
        left: String,

        right: String,

        /// Key columns, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        on: Vec<String>,

        #[arg(long, value_enum, default_value_t = JoinKind::Inner)]
        kind: JoinKind,

        /// Name of the new table
        #[arg(long)]
        name: String,
    },

    /// Show workspace statistics
    Stats {
        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },
}

/// Parse output format string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid output format: {}. Use 'pretty' or 'json'", s)),
        }
    }
}

/// Row positions are 1-based
fn validate_position(s: &str) -> Result<u64, String> {
    let position: u64 = s
        .parse()
        .map_err(|_| format!("Invalid row position: '{}'. Must be a positive integer.", s))?;

    if position == 0 {
        return Err("Row positions start at 1".to_string());
    }

    Ok(position)
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((column, value)) if !column.trim().is_empty() => {
            Ok((column.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid assignment '{}'. Use column=value", s)),
    }
}
