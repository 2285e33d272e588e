//! Edge case tests for filesystem-related scenarios

use crate::common::{import, sample_data, TestFixture};
use std::fs;
use tabclean::config::EngineConfig;
use tabclean::{Engine, TabcleanError};

#[test]
fn test_nonexistent_input_file() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();

    let error = engine
        .import_csv(std::path::Path::new("/nonexistent/path/file.csv"), "test")
        .unwrap_err();
    assert!(matches!(error, TabcleanError::Validation { .. }));
    assert!(error.to_string().to_lowercase().contains("not found"));
    assert!(engine.tables().is_empty());
}

#[test]
fn test_csv_import_keeps_values_as_text() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let path = fixture
        .create_csv_raw("codes.csv", "zip,amount\n00501,1.50\n02134,2\n")
        .unwrap();

    let ctx = engine.import_csv(&path, "codes").unwrap();
    let (columns, rows) = tabclean::table::read_user_rows(engine.substrate(), &ctx.key).unwrap();
    assert_eq!(columns, vec!["zip", "amount"]);
    assert_eq!(rows[0][0].as_deref(), Some("00501"));
    assert_eq!(rows[0][1].as_deref(), Some("1.50"));
}

#[test]
fn test_corrupted_shard_fails_thaw() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine.freeze(&ctx).unwrap();

    let shard = fixture
        .workspace
        .shards_dir
        .join(tabclean::TabcleanWorkspace::shard_file_name(&ctx.key, 0));
    fs::write(&shard, b"\x00\x01\x02\x03invalid_data\xff\xfe").unwrap();

    assert!(engine.thaw(&ctx).is_err());
    assert!(!engine.is_live(&ctx).unwrap());
    assert!(!engine.substrate().table_exists(&ctx.key).unwrap());
}

#[test]
fn test_missing_manifest_fails_thaw() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine.freeze(&ctx).unwrap();
    fs::remove_file(fixture.workspace.manifest_path(&ctx.key)).unwrap();

    let err = engine.thaw(&ctx).unwrap_err();
    assert!(matches!(err, TabcleanError::Persistence { .. }));
}

#[test]
fn test_orphaned_files_are_swept_on_open() {
    let fixture = TestFixture::new().unwrap();
    {
        let mut engine = fixture.engine();
        let ctx = import(&mut engine, "people", &sample_data::people());
        engine.freeze(&ctx).unwrap();
    }
    let ghost = fixture.workspace.shards_dir.join("ghost__shard_00000.parquet");
    let leftover = fixture.workspace.shards_dir.join("people__manifest.json.tmp");
    let ghost_snapshots = fixture.workspace.snapshot_root("ghost");
    fs::write(&ghost, b"stale").unwrap();
    fs::write(&leftover, b"{}").unwrap();
    fs::create_dir_all(ghost_snapshots.join("old")).unwrap();

    let engine = fixture.engine();
    assert!(!ghost.exists());
    assert!(!leftover.exists());
    assert!(!ghost_snapshots.exists());
    assert!(fixture.workspace.manifest_path("people").exists());
    assert_eq!(engine.tables().len(), 1);
}

#[test]
fn test_invalid_config_is_rejected() {
    let fixture = TestFixture::new().unwrap();
    let config = EngineConfig {
        max_snapshots: 0,
        ..EngineConfig::default()
    };
    config.save(&fixture.workspace.config_path()).unwrap();

    let err = Engine::open_in_memory(fixture.workspace.clone()).err().unwrap();
    assert!(matches!(err, TabcleanError::Config { .. }));
}

#[test]
fn test_partial_config_uses_defaults() {
    let fixture = TestFixture::new().unwrap();
    fs::write(fixture.workspace.config_path(), r#"{"shard_size": 2}"#).unwrap();

    let mut engine = Engine::open_in_memory(fixture.workspace.clone()).unwrap();
    assert_eq!(engine.config().shard_size, 2);
    assert_eq!(engine.config().max_snapshots, EngineConfig::default().max_snapshots);

    let ctx = import(&mut engine, "people", &sample_data::people());
    let manifest = engine.freeze(&ctx).unwrap().unwrap();
    assert_eq!(manifest.shards.len(), 3);
    engine.thaw(&ctx).unwrap();
    assert_eq!(engine.row_count(&ctx).unwrap(), 5);
}

#[test]
fn test_change_log_is_cleared_by_compaction() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine.edit_cell(&ctx, 1, "name", Some("A")).unwrap();
    engine.edit_cell(&ctx, 2, "name", Some("B")).unwrap();

    let log = tabclean::changelog::ChangeLog::new(fixture.workspace.changelog_path(&ctx.key));
    assert_eq!(log.len().unwrap(), 2);
    engine.compact(&ctx).unwrap();
    assert!(log.is_empty().unwrap());
}

#[test]
fn test_freeze_fails_when_change_log_cannot_be_truncated() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine.edit_cell(&ctx, 1, "name", Some(" A ")).unwrap();
    engine
        .apply_transformation(&ctx, &tabclean::Transform::Trim { column: "name".into() })
        .unwrap();

    let log_path = engine.workspace().changelog_path(&ctx.key);
    fs::remove_file(&log_path).unwrap();
    fs::create_dir_all(&log_path).unwrap();

    let err = engine.freeze(&ctx).unwrap_err();
    assert!(matches!(err, TabcleanError::Persistence { .. }));
    assert!(err.is_fatal_for_table());
    assert!(engine.is_live(&ctx).unwrap());
    let (_, rows) = tabclean::table::read_user_rows(engine.substrate(), &ctx.key).unwrap();
    assert_eq!(rows[0][1].as_deref(), Some("A"));
}
