//! Integration tests for the init command

use crate::common::{assertions, CliTestRunner};

#[test]
fn test_init_command_success() {
    let runner = CliTestRunner::new().unwrap();

    runner.expect_success(&["init"]);

    let workspace = &runner.fixture().workspace;
    assertions::assert_dir_exists(&workspace.state_dir);
    assertions::assert_dir_exists(&workspace.shards_dir);
    assertions::assert_dir_exists(&workspace.snapshots_dir);

    let config_path = workspace.config_path();
    assertions::assert_file_exists_and_not_empty(&config_path);
    assertions::assert_json_contains_keys(
        &config_path,
        &[
            "format_version",
            "shard_size",
            "audit_row_cap",
            "audit_batch_size",
            "compaction_threshold",
            "max_snapshots",
            "memory_limit",
        ],
    )
    .unwrap();

    let gitignore_path = workspace.root.join(".gitignore");
    assertions::assert_file_exists_and_not_empty(&gitignore_path);
}

#[test]
fn test_init_command_already_exists() {
    let runner = CliTestRunner::new().unwrap();

    runner.expect_success(&["init"]);
    // Idempotent without --force
    runner.expect_success(&["init"]);
}

#[test]
fn test_init_command_with_force_resets_config() {
    let runner = CliTestRunner::new().unwrap();
    runner.expect_success(&["init"]);

    let config_path = runner.fixture().workspace.config_path();
    std::fs::write(&config_path, r#"{"shard_size": 7}"#).unwrap();
    runner.expect_success(&["init", "--force"]);

    let config = tabclean::config::EngineConfig::load(&config_path).unwrap();
    assert_eq!(config, tabclean::config::EngineConfig::default());
}
