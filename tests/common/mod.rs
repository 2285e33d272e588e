//! Common test utilities and helpers

use std::fs;
use std::path::{Path, PathBuf};
use tabclean::substrate::TextRow;
use tabclean::{Engine, Result, TabcleanWorkspace, TableContext};
use tempfile::TempDir;

/// Test fixture manager for creating temporary test environments
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub workspace: TabcleanWorkspace,
}

impl TestFixture {
    /// Create a new test fixture with initialized workspace
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let workspace = TabcleanWorkspace::create_new(temp_dir.path().to_path_buf())?;

        Ok(Self {
            temp_dir,
            workspace,
        })
    }

    /// Get the root path of the test fixture
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Engine over an in-memory database
    pub fn engine(&self) -> Engine {
        Engine::open_in_memory(self.workspace.clone()).expect("engine should open")
    }

    /// Engine over the workspace's database file. Only one may be open at
    /// a time.
    pub fn file_engine(&self) -> Engine {
        Engine::open(self.workspace.clone()).expect("engine should open")
    }

    /// Create a test CSV file with sample data
    pub fn create_csv(&self, name: &str, data: &[Vec<&str>]) -> Result<PathBuf> {
        let path = self.root().join(name);
        let mut content = String::new();

        for row in data {
            content.push_str(&row.join(","));
            content.push('\n');
        }

        fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a test CSV file with raw string content
    pub fn create_csv_raw(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.root().join(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// All files under the shards directory whose name starts with `key`
    pub fn shard_files(&self, key: &str) -> Vec<PathBuf> {
        walkdir::WalkDir::new(&self.workspace.shards_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().to_string_lossy().starts_with(key))
            .map(|e| e.path().to_path_buf())
            .collect()
    }
}

/// Import `data` (header row first) through the in-memory row path
pub fn import(engine: &mut Engine, name: &str, data: &[Vec<&str>]) -> TableContext {
    let columns: Vec<String> = data[0].iter().map(|c| c.to_string()).collect();
    let rows: Vec<TextRow> = data[1..]
        .iter()
        .map(|r| {
            r.iter()
                .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
                .collect()
        })
        .collect();
    engine.import_rows(name, &columns, &rows).expect("import should succeed")
}

/// User columns and rows of a live table
pub fn user_rows(engine: &Engine, ctx: &TableContext) -> (Vec<String>, Vec<TextRow>) {
    tabclean::table::read_user_rows(engine.substrate(), &ctx.key).expect("table should be readable")
}

/// Values of one column, in row order
pub fn column_values(engine: &Engine, ctx: &TableContext, column: &str) -> Vec<Option<String>> {
    let (columns, rows) = user_rows(engine, ctx);
    let index = columns
        .iter()
        .position(|c| c == column)
        .unwrap_or_else(|| panic!("column '{}' should exist", column));
    rows.into_iter().map(|mut r| r.swap_remove(index)).collect()
}

pub fn fingerprint(engine: &Engine, ctx: &TableContext) -> String {
    tabclean::fingerprint::table_fingerprint(engine.substrate(), &ctx.key).expect("fingerprint")
}

/// Helper for running CLI commands in tests
pub struct CliTestRunner {
    fixture: TestFixture,
}

impl CliTestRunner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            fixture: TestFixture::new()?,
        })
    }

    pub fn fixture(&self) -> &TestFixture {
        &self.fixture
    }

    /// Run a tabclean command and return the result
    pub fn run_command(&self, args: &[&str]) -> Result<()> {
        use clap::Parser;
        use tabclean::cli::Cli;
        use tabclean::commands::execute_command;

        let mut cmd_args = vec!["tabclean"];
        cmd_args.extend(args);

        let cli = Cli::try_parse_from(cmd_args)
            .map_err(|e| tabclean::TabcleanError::validation(e.to_string()))?;

        // Without --workspace the fixture root is the workspace
        let workspace_path = cli.workspace.as_deref().or(Some(self.fixture.root()));
        execute_command(cli.command, workspace_path)
    }

    /// Run a command and expect it to succeed
    pub fn expect_success(&self, args: &[&str]) {
        if let Err(e) = self.run_command(args) {
            panic!("Command {:?} should succeed: {}", args, e);
        }
    }

    /// Run a command and expect it to fail
    pub fn expect_failure(&self, args: &[&str]) -> tabclean::TabcleanError {
        self.run_command(args).expect_err("Command should fail")
    }
}

/// Sample data generators for testing
pub mod sample_data {
    pub fn people() -> Vec<Vec<&'static str>> {
        vec![
            vec!["id", "name", "email", "status"],
            vec!["1", "Ann Lee", "  ann@example.com ", "active"],
            vec!["2", "bob stone", "bob@example.com", "inactive"],
            vec!["3", "Cy Young", " cy@example.com", "active"],
            vec!["4", "dee", "dee@example.com  ", "pending"],
            vec!["5", "Eve Moss", "eve@example.com", "active"],
        ]
    }

    pub fn contacts_a() -> Vec<Vec<&'static str>> {
        vec![
            vec!["id", "name", "email"],
            vec!["1", "Ann", "ann@example.com"],
            vec!["2", "Bob", "bob@example.com"],
        ]
    }

    pub fn contacts_b() -> Vec<Vec<&'static str>> {
        vec![
            vec!["id", "email", "status"],
            vec!["3", "cy@example.com", "active"],
            vec!["4", "dee@example.com", "pending"],
            vec!["5", "eve@example.com", "active"],
        ]
    }

    /// `id,value` rows for every id in `ids`, with `value` derived from
    /// `tag` so two ranges overlap with different values
    pub fn id_range_csv(ids: std::ops::RangeInclusive<u32>, tag: &str) -> String {
        let mut content = String::from("id,value\n");
        for id in ids {
            content.push_str(&format!("{},{}-{}\n", id, tag, id));
        }
        content
    }
}

/// Assertion helpers for test validation
pub mod assertions {
    use std::path::Path;
    use tabclean::Result;

    /// Assert that a file exists and is not empty
    pub fn assert_file_exists_and_not_empty(path: &Path) {
        assert!(path.exists(), "File should exist: {}", path.display());
        let metadata = std::fs::metadata(path).expect("Should be able to read file metadata");
        assert!(metadata.len() > 0, "File should not be empty: {}", path.display());
    }

    /// Assert that a directory exists
    pub fn assert_dir_exists(path: &Path) {
        assert!(path.exists(), "Directory should exist: {}", path.display());
        assert!(path.is_dir(), "Path should be a directory: {}", path.display());
    }

    /// Assert that a JSON file contains expected keys
    pub fn assert_json_contains_keys(path: &Path, keys: &[&str]) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let json: serde_json::Value = serde_json::from_str(&content)?;

        for key in keys {
            assert!(json.get(key).is_some(), "JSON should contain key '{}': {}", key, path.display());
        }

        Ok(())
    }
}
