//! Functional tests for table and state diffs

use crate::common::{import, sample_data, TestFixture};
use indexmap::IndexMap;
use tabclean::diff::{DiffKey, DiffStatus};
use tabclean::Transform;

#[test]
fn test_overlapping_id_ranges_diff_by_key() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let base = fixture
        .create_csv_raw("base.csv", &sample_data::id_range_csv(1..=100, "a"))
        .unwrap();
    let newer = fixture
        .create_csv_raw("new.csv", &sample_data::id_range_csv(10..=110, "b"))
        .unwrap();
    engine.import_csv(&base, "base").unwrap();
    engine.import_csv(&newer, "new").unwrap();

    let diff = engine
        .run_diff("base", "new", &DiffKey::Columns(vec!["id".into()]))
        .unwrap();
    assert_eq!(diff.summary.added, 10);
    assert_eq!(diff.summary.removed, 9);
    assert_eq!(diff.summary.modified, 91);
    assert_eq!(diff.summary.unchanged, 0);
    assert!(diff.schema_notice.is_none());

    let modified = diff
        .rows
        .iter()
        .find(|r| r.status == DiffStatus::Modified)
        .unwrap();
    let cell = &modified.changes["value"];
    assert!(cell.before.as_deref().unwrap().starts_with("a-"));
    assert!(cell.after.as_deref().unwrap().starts_with("b-"));
}

#[test]
fn test_duplicated_table_has_no_modified_rows() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    import(&mut engine, "first", &sample_data::people());
    import(&mut engine, "second", &sample_data::people());

    let diff = engine
        .run_diff("first", "second", &DiffKey::Columns(vec!["id".into()]))
        .unwrap();
    assert_eq!(diff.summary.modified, 0);
    assert_eq!(diff.summary.added, 0);
    assert_eq!(diff.summary.removed, 0);
    assert_eq!(diff.summary.unchanged, 5);
    assert!(!diff.has_changes());
}

#[test]
fn test_insert_and_unrelated_edit_wherever_the_insert_lands() {
    for position in [1u64, 3, 6] {
        let fixture = TestFixture::new().unwrap();
        let mut engine = fixture.engine();
        let ctx = import(&mut engine, "people", &sample_data::people());

        let mut values = IndexMap::new();
        values.insert("id".to_string(), Some("6".to_string()));
        values.insert("name".to_string(), Some("Fay".to_string()));
        engine.insert_row(&ctx, position, values).unwrap();
        // Row 5 in the original order is never the inserted row
        let edit_row = if position <= 5 { 6 } else { 5 };
        engine.edit_cell(&ctx, edit_row, "status", Some("archived")).unwrap();

        let diff = engine.diff_against(&ctx, "original").unwrap();
        assert_eq!(diff.summary.added, 1, "insert at {}", position);
        assert_eq!(diff.summary.modified, 1, "insert at {}", position);
        assert_eq!(diff.summary.removed, 0);
        assert_eq!(diff.summary.unchanged, 4);

        let modified = diff
            .rows
            .iter()
            .find(|r| r.status == DiffStatus::Modified)
            .unwrap();
        assert_eq!(modified.changes.len(), 1);
        assert!(modified.changes.contains_key("status"));
    }
}

#[test]
fn test_diff_against_relative_states() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine
        .apply_transformation(&ctx, &Transform::Trim { column: "email".into() })
        .unwrap();
    engine
        .apply_transformation(&ctx, &Transform::Uppercase { column: "status".into() })
        .unwrap();

    let one_back = engine.diff_against(&ctx, "~1").unwrap();
    assert_eq!(one_back.summary.modified, 5);
    assert!(one_back
        .rows
        .iter()
        .all(|r| r.changes.keys().all(|c| c == "status")));

    let after_first = engine.diff_against(&ctx, "@1").unwrap();
    assert_eq!(after_first.summary.modified, 5);

    let from_original = engine.diff_against(&ctx, "original").unwrap();
    assert_eq!(from_original.summary.modified, 5);
    assert_eq!(from_original.summary.unchanged, 0);

    let current = engine.diff_against(&ctx, "current").unwrap();
    assert!(!current.has_changes());

    assert!(engine.diff_against(&ctx, "~3").is_err());
}

#[test]
fn test_diff_across_schemas_compares_common_columns() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    import(&mut engine, "a", &sample_data::contacts_a());
    import(
        &mut engine,
        "b",
        &[
            vec!["id", "email", "phone"],
            vec!["1", "ann@example.com", "555"],
            vec!["2", "bob@new.example.com", "556"],
        ],
    );

    let diff = engine.run_diff("a", "b", &DiffKey::parse(Some("id"))).unwrap();
    let notice = diff.schema_notice.unwrap();
    assert_eq!(notice.only_in_a, vec!["name"]);
    assert_eq!(notice.only_in_b, vec!["phone"]);
    assert_eq!(diff.summary.modified, 1);
    assert_eq!(diff.summary.unchanged, 1);
}

#[test]
fn test_diff_reads_frozen_table_without_thawing() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let first = import(&mut engine, "first", &sample_data::people());
    import(&mut engine, "second", &sample_data::people());
    engine.edit_cell(&first, 1, "name", Some("Ann Li")).unwrap();
    engine.freeze(&first).unwrap();

    let diff = engine.run_diff("first", "second", &DiffKey::parse(Some("id"))).unwrap();
    assert_eq!(diff.summary.modified, 1);
    assert!(!engine.is_live(&first).unwrap());
}
