//! # tabclean
//!
//! A versioned transformation engine for cleaning tabular data: reversible
//! transformations with an undo/redo timeline, per-cell audit capture,
//! identity-stable diffs between any two states, and sharded parquet
//! persistence for tables that are not in use.

pub mod audit;
pub mod changelog;
pub mod cli;
pub mod combine;
pub mod commands;
pub mod config;
pub mod diff;
pub mod duckdb_config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod executor;
pub mod fingerprint;
pub mod history;
pub mod lock;
pub mod manifest;
pub mod output;
pub mod progress;
pub mod resolver;
pub mod shards;
pub mod snapshot;
pub mod substrate;
pub mod table;
pub mod timeline;
pub mod transform;
pub mod workspace;

pub use engine::{Engine, TableContext};
pub use error::{Result, TabcleanError};
pub use transform::Transform;
pub use workspace::TabcleanWorkspace;

/// Current format version for manifests, timelines and the index
pub const FORMAT_VERSION: &str = "1.0.0";

/// Default rows per parquet shard
pub const DEFAULT_SHARD_SIZE: usize = 50_000;

/// Default maximum number of affected rows captured in audit detail
pub const DEFAULT_AUDIT_ROW_CAP: u64 = 10_000;

/// Default detail rows per audit INSERT statement
pub const DEFAULT_AUDIT_BATCH_SIZE: usize = 500;

/// Default change-log length that triggers compaction
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 1_000;

/// Default number of snapshots retained per table
pub const DEFAULT_MAX_SNAPSHOTS: usize = 10;
