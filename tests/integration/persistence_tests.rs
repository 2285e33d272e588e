//! Integration tests for freeze, thaw, switching, compaction and deletion

use crate::common::{fingerprint, import, sample_data, user_rows, TestFixture};
use tabclean::manifest::Manifest;
use tabclean::{TabcleanError, Transform};

#[test]
fn test_freeze_thaw_keeps_counts_and_contents() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine
        .apply_transformation(&ctx, &Transform::Trim { column: "email".into() })
        .unwrap();
    let (columns, rows) = user_rows(&engine, &ctx);
    let before = fingerprint(&engine, &ctx);

    let manifest = engine.freeze(&ctx).unwrap().unwrap();
    assert_eq!(manifest.total_rows, rows.len() as u64);
    assert!(!engine.is_live(&ctx).unwrap());
    assert!(!engine.substrate().table_exists(&ctx.key).unwrap());

    let on_disk = Manifest::load(&fixture.workspace.manifest_path(&ctx.key)).unwrap();
    assert_eq!(on_disk.total_rows, 5);
    assert_eq!(on_disk.columns.len(), columns.len() + 2);

    engine.thaw(&ctx).unwrap();
    assert_eq!(fingerprint(&engine, &ctx), before);
    let (columns_after, rows_after) = user_rows(&engine, &ctx);
    assert_eq!(columns_after, columns);
    assert_eq!(rows_after, rows);
}

#[test]
fn test_freeze_twice_is_a_no_op() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    assert!(engine.freeze(&ctx).unwrap().is_some());
    assert!(engine.freeze(&ctx).unwrap().is_none());
}

#[test]
fn test_mutations_against_frozen_table_fail() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine.freeze(&ctx).unwrap();

    let err = engine
        .apply_transformation(&ctx, &Transform::Trim { column: "email".into() })
        .unwrap_err();
    assert!(matches!(err, TabcleanError::TableNotActive { .. }));
    let err = engine.edit_cell(&ctx, 1, "name", Some("x")).unwrap_err();
    assert!(matches!(err, TabcleanError::TableNotActive { .. }));
    assert!(engine.undo(&ctx).is_err());
}

#[test]
fn test_switch_freezes_outgoing_table() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let a = import(&mut engine, "a", &sample_data::contacts_a());
    let b = import(&mut engine, "b", &sample_data::contacts_b());
    assert_eq!(engine.active_context(), Some(a.clone()));

    let active = engine.switch_table(Some(&a), "b").unwrap();
    assert_eq!(active, b);
    assert_eq!(engine.active_context(), Some(b.clone()));
    assert!(!engine.is_live(&a).unwrap());
    assert!(engine.is_live(&b).unwrap());

    let err = engine
        .apply_transformation(&a, &Transform::Uppercase { column: "name".into() })
        .unwrap_err();
    assert!(matches!(err, TabcleanError::TableNotActive { .. }));
    engine
        .apply_transformation(&b, &Transform::Uppercase { column: "status".into() })
        .unwrap();

    // Switching back thaws with the edits it had
    let active = engine.switch_table(Some(&b), "a").unwrap();
    assert_eq!(active, a);
    assert!(engine.is_live(&a).unwrap());
    assert_eq!(engine.row_count(&a).unwrap(), 2);
}

#[test]
fn test_history_survives_freeze_and_thaw() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    let original = fingerprint(&engine, &ctx);
    engine
        .apply_transformation(&ctx, &Transform::Trim { column: "email".into() })
        .unwrap();

    engine.freeze(&ctx).unwrap();
    engine.thaw(&ctx).unwrap();
    engine.undo(&ctx).unwrap();
    assert_eq!(fingerprint(&engine, &ctx), original);
}

#[test]
fn test_delete_then_reload_leaves_nothing_behind() {
    let fixture = TestFixture::new().unwrap();
    {
        let mut engine = fixture.file_engine();
        let ctx = import(&mut engine, "people", &sample_data::people());
        engine.edit_cell(&ctx, 1, "name", Some("Ann Li")).unwrap();
        engine.freeze(&ctx).unwrap();
        engine.thaw(&ctx).unwrap();
        engine.compact(&ctx).unwrap();
        assert!(!fixture.shard_files("people").is_empty());

        engine.delete_table(&ctx).unwrap();
        assert!(engine.tables().is_empty());
        assert!(engine.context("people").is_err());
    }

    assert!(fixture.shard_files("people").is_empty());
    assert!(!fixture.workspace.changelog_path("people").exists());
    assert!(!fixture.workspace.snapshot_root("people").exists());
    assert!(!fixture.workspace.timeline_path("people").exists());

    let engine = fixture.file_engine();
    assert!(engine.tables().is_empty());
    assert!(!engine.substrate().table_exists("people").unwrap());
}

#[test]
fn test_reopen_keeps_live_and_frozen_tables() {
    let fixture = TestFixture::new().unwrap();
    let (live_fp, frozen_fp);
    {
        let mut engine = fixture.file_engine();
        let live = import(&mut engine, "live", &sample_data::contacts_a());
        let frozen = import(&mut engine, "frozen", &sample_data::contacts_b());
        engine.edit_cell(&live, 2, "name", Some("Rob")).unwrap();
        engine.edit_cell(&frozen, 1, "status", Some("closed")).unwrap();
        live_fp = fingerprint(&engine, &live);
        frozen_fp = fingerprint(&engine, &frozen);
        engine.freeze(&frozen).unwrap();
    }

    let mut engine = fixture.file_engine();
    assert_eq!(engine.tables().len(), 2);
    let live = engine.context("live").unwrap();
    let frozen = engine.context("frozen").unwrap();
    assert!(engine.is_live(&live).unwrap());
    assert_eq!(fingerprint(&engine, &live), live_fp);
    assert!(engine.can_undo(&live).unwrap());

    engine.thaw(&frozen).unwrap();
    assert_eq!(fingerprint(&engine, &frozen), frozen_fp);
}

#[test]
fn test_in_memory_restart_recovers_from_shards_and_change_log() {
    let fixture = TestFixture::new().unwrap();
    let expected;
    {
        let mut engine = fixture.engine();
        let ctx = import(&mut engine, "people", &sample_data::people());
        engine.compact(&ctx).unwrap();
        engine.edit_cell(&ctx, 3, "status", Some("closed")).unwrap();
        expected = fingerprint(&engine, &ctx);
    }

    // The in-memory database is gone; the table comes back from disk
    let mut engine = fixture.engine();
    let ctx = engine.context("people").unwrap();
    assert!(!engine.is_live(&ctx).unwrap());
    engine.thaw(&ctx).unwrap();
    assert_eq!(fingerprint(&engine, &ctx), expected);
}

#[test]
fn test_table_without_any_persisted_state_is_dropped_on_restart() {
    let fixture = TestFixture::new().unwrap();
    {
        let mut engine = fixture.engine();
        import(&mut engine, "scratch", &sample_data::contacts_a());
    }

    let engine = fixture.engine();
    assert!(engine.tables().is_empty());
    assert!(engine.active_context().is_none());
}

#[test]
fn test_frozen_table_rows_are_readable() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine.freeze(&ctx).unwrap();

    let (columns, rows) = engine.table_rows(&ctx, 2, 1).unwrap();
    assert_eq!(columns, vec!["id", "name", "email", "status"]);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0].as_deref(), Some("2"));
    assert!(!engine.is_live(&ctx).unwrap());
}
