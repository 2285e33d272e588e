//! Edge case tests for unusual table contents

use crate::common::{column_values, fingerprint, import, sample_data, user_rows, TestFixture};
use tabclean::diff::DiffKey;
use tabclean::substrate::TextRow;
use tabclean::{TabcleanError, Transform};

#[test]
fn test_empty_table_freezes_into_one_shard() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let columns = vec!["id".to_string(), "name".to_string()];
    let ctx = engine.import_rows("empty", &columns, &[]).unwrap();

    let manifest = engine.freeze(&ctx).unwrap().unwrap();
    assert_eq!(manifest.total_rows, 0);
    assert_eq!(manifest.shards.len(), 1);

    engine.thaw(&ctx).unwrap();
    let (names, rows) = user_rows(&engine, &ctx);
    assert_eq!(names, columns);
    assert!(rows.is_empty());
}

#[test]
fn test_transform_on_empty_table_affects_nothing() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = engine.import_rows("empty", &["name".to_string()], &[]).unwrap();

    let result = engine
        .apply_transformation(&ctx, &Transform::Trim { column: "name".into() })
        .unwrap();
    assert_eq!(result.affected, 0);
    assert!(!result.has_row_details);
}

#[test]
fn test_unicode_survives_freeze_and_thaw() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(
        &mut engine,
        "unicode",
        &[
            vec!["id", "name", "description"],
            vec!["1", "Café", "Delicious café ☕"],
            vec!["2", "Naïve", "Naïve approach 🤔"],
            vec!["3", "北京", "Beijing in Chinese 中文"],
        ],
    );
    engine
        .apply_transformation(&ctx, &Transform::Uppercase { column: "name".into() })
        .unwrap();
    let before = fingerprint(&engine, &ctx);

    engine.freeze(&ctx).unwrap();
    engine.thaw(&ctx).unwrap();
    assert_eq!(fingerprint(&engine, &ctx), before);
    assert_eq!(column_values(&engine, &ctx, "name")[0].as_deref(), Some("CAFÉ"));
}

#[test]
fn test_duplicate_keys_pair_in_occurrence_order() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    import(
        &mut engine,
        "a",
        &[vec!["k", "v"], vec!["1", "x"], vec!["1", "y"], vec!["2", "z"]],
    );
    import(
        &mut engine,
        "b",
        &[vec!["k", "v"], vec!["1", "x"], vec!["1", "Y"], vec!["2", "z"], vec!["2", "w"]],
    );

    let diff = engine.run_diff("a", "b", &DiffKey::parse(Some("k"))).unwrap();
    assert_eq!(diff.summary.modified, 1);
    assert_eq!(diff.summary.unchanged, 2);
    assert_eq!(diff.summary.added, 1);
    assert_eq!(diff.summary.removed, 0);
}

#[test]
fn test_remove_duplicates_keeps_first_row_identity() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(
        &mut engine,
        "dupes",
        &[
            vec!["name", "city"],
            vec!["Ann", "Oslo"],
            vec!["Bob", "Rome"],
            vec!["Ann", "Oslo"],
            vec!["Ann", "Oslo"],
        ],
    );

    let result = engine
        .apply_transformation(&ctx, &Transform::RemoveDuplicates)
        .unwrap();
    assert_eq!(result.affected, 2);
    assert_eq!(result.row_count, 2);

    let diff = engine.diff_against(&ctx, "original").unwrap();
    assert_eq!(diff.summary.removed, 2);
    assert_eq!(diff.summary.modified, 0);
    assert_eq!(diff.summary.unchanged, 2);
    assert!(diff.rows.iter().all(|r| r.row_number_a != Some(1)));
}

#[test]
fn test_reserved_and_duplicate_column_names_are_rejected() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let rows: Vec<TextRow> = vec![vec![Some("1".into()), Some("2".into())]];

    for columns in [
        vec!["_cs_id".to_string(), "name".to_string()],
        vec!["name".to_string(), "name".to_string()],
        vec!["".to_string(), "name".to_string()],
    ] {
        let err = engine.import_rows("bad", &columns, &rows).unwrap_err();
        assert!(matches!(err, TabcleanError::Validation { .. }), "columns {:?}", columns);
    }
    assert!(engine.tables().is_empty());
}

#[test]
fn test_rename_then_edit_renamed_column() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());

    let result = engine
        .apply_transformation(
            &ctx,
            &Transform::RenameColumn { column: "status".into(), new_name: "state".into() },
        )
        .unwrap();
    assert_eq!(result.affected, 0);
    engine.edit_cell(&ctx, 1, "state", Some("closed")).unwrap();

    engine.undo(&ctx).unwrap();
    engine.undo(&ctx).unwrap();
    let (columns, _) = user_rows(&engine, &ctx);
    assert_eq!(columns, vec!["id", "name", "email", "status"]);
    assert_eq!(column_values(&engine, &ctx, "status")[0].as_deref(), Some("active"));
}

#[test]
fn test_null_edits_round_trip_through_undo() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    let before = fingerprint(&engine, &ctx);

    engine.edit_cell(&ctx, 2, "email", None).unwrap();
    assert_eq!(column_values(&engine, &ctx, "email")[1], None);
    engine.undo(&ctx).unwrap();
    assert_eq!(fingerprint(&engine, &ctx), before);
}

#[test]
fn test_batch_edit_is_one_command() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    let before = fingerprint(&engine, &ctx);

    let edits = vec![
        tabclean::engine::CellEdit { row: 1, column: "status".into(), value: Some("closed".into()) },
        tabclean::engine::CellEdit { row: 1, column: "name".into(), value: Some("Ann L.".into()) },
        tabclean::engine::CellEdit { row: 3, column: "status".into(), value: Some("active".into()) },
    ];
    let result = engine.edit_cells(&ctx, &edits).unwrap();
    // Row 3 already had "active"
    assert_eq!(result.cells_changed, 2);
    assert_eq!(result.rows_affected, 1);

    engine.undo(&ctx).unwrap();
    assert_eq!(fingerprint(&engine, &ctx), before);
    assert!(!engine.can_undo(&ctx).unwrap());
}

#[test]
fn test_batch_edit_touching_one_cell_twice() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    let before = fingerprint(&engine, &ctx);
    let edit = |value: &str| tabclean::engine::CellEdit {
        row: 2,
        column: "status".into(),
        value: Some(value.into()),
    };

    let result = engine.edit_cells(&ctx, &[edit("closed"), edit("pending")]).unwrap();
    assert_eq!(result.cells_changed, 1);
    assert_eq!(column_values(&engine, &ctx, "status")[1].as_deref(), Some("pending"));
    let details = engine
        .audit_row_details(result.audit_entry_id.as_deref().unwrap(), 10, 0)
        .unwrap();
    assert_eq!(details.total, 1);
    assert_eq!(details.rows[0].new_value.as_deref(), Some("pending"));

    engine.undo(&ctx).unwrap();
    assert_eq!(fingerprint(&engine, &ctx), before);
}

#[test]
fn test_failed_custom_sql_leaves_audit_untouched() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine
        .apply_transformation(&ctx, &Transform::Trim { column: "email".into() })
        .unwrap();
    let details_before = engine
        .substrate()
        .query_count("SELECT COUNT(*) FROM _cs_audit_details")
        .unwrap();

    let step = Transform::CustomSql { sql: "UPDATE people SET missing_column = 1".into() };
    assert!(engine.apply_transformation(&ctx, &step).is_err());

    let details_after = engine
        .substrate()
        .query_count("SELECT COUNT(*) FROM _cs_audit_details")
        .unwrap();
    assert_eq!(details_after, details_before);
    assert_eq!(
        engine
            .audit_entries_for_table(&ctx, tabclean::timeline::AuditView::All)
            .unwrap()
            .len(),
        1
    );
}
