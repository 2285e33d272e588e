//! Functional tests for stacking and joining tables

use crate::common::{column_values, import, sample_data, user_rows, TestFixture};
use tabclean::combine::JoinKind;
use tabclean::TabcleanError;

#[test]
fn test_stack_unions_columns_and_sums_rows() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    import(&mut engine, "a", &sample_data::contacts_a());
    import(&mut engine, "b", &sample_data::contacts_b());

    let ctx = engine.stack_tables(&["a", "b"], "all contacts").unwrap();
    let (columns, rows) = user_rows(&engine, &ctx);
    assert_eq!(columns, vec!["id", "name", "email", "status"]);
    assert_eq!(rows.len(), 5);
    assert_eq!(
        column_values(&engine, &ctx, "id"),
        ["1", "2", "3", "4", "5"].iter().map(|v| Some(v.to_string())).collect::<Vec<_>>()
    );
    assert_eq!(rows[0][3], None);
    assert_eq!(rows[4][1], None);

    // Combined tables start a fresh history
    assert!(!engine.can_undo(&ctx).unwrap());
    assert_eq!(engine.tables().len(), 3);
}

#[test]
fn test_stack_includes_frozen_sources() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let a = import(&mut engine, "a", &sample_data::contacts_a());
    import(&mut engine, "b", &sample_data::contacts_b());
    engine.freeze(&a).unwrap();

    let ctx = engine.stack_tables(&["a", "b"], "ab").unwrap();
    assert_eq!(engine.row_count(&ctx).unwrap(), 5);
    assert!(!engine.is_live(&a).unwrap());
    assert!(!engine
        .substrate()
        .table_exists("_cs_read_0_a")
        .unwrap());
}

#[test]
fn test_stack_needs_two_tables() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    import(&mut engine, "a", &sample_data::contacts_a());
    let err = engine.stack_tables(&["a"], "only").unwrap_err();
    assert!(matches!(err, TabcleanError::Validation { .. }));
    assert_eq!(engine.tables().len(), 1);
}

#[test]
fn test_left_join_keeps_unmatched_rows() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    import(&mut engine, "people", &sample_data::people());
    import(
        &mut engine,
        "orders",
        &[
            vec!["id", "total", "status"],
            vec!["2", "10", "paid"],
            vec!["4", "25", "open"],
        ],
    );

    let ctx = engine
        .join_tables("people", "orders", &["id".to_string()], JoinKind::Left, "people orders")
        .unwrap();
    let (columns, rows) = user_rows(&engine, &ctx);
    assert_eq!(columns, vec!["id", "name", "email", "status", "total", "status_right"]);
    assert_eq!(rows.len(), 5);
    assert_eq!(
        column_values(&engine, &ctx, "total"),
        vec![None, Some("10".to_string()), None, Some("25".to_string()), None]
    );

    let inner = engine
        .join_tables("people", "orders", &["id".to_string()], JoinKind::Inner, "matched")
        .unwrap();
    assert_eq!(engine.row_count(&inner).unwrap(), 2);
}

#[test]
fn test_combined_table_name_must_be_free() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    import(&mut engine, "a", &sample_data::contacts_a());
    import(&mut engine, "b", &sample_data::contacts_b());

    let err = engine.stack_tables(&["a", "b"], "A").unwrap_err();
    assert!(matches!(err, TabcleanError::Validation { .. }));
    assert_eq!(engine.tables().len(), 2);
}
