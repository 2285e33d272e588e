//! Functional tests for transformation, undo/redo and audit workflows

use crate::common::{column_values, fingerprint, import, sample_data, user_rows, TestFixture};
use tabclean::config::EngineConfig;
use tabclean::timeline::{AuditView, CommandKind};
use tabclean::transform::{CastTarget, MatchType, ScrubMethod, SplitMode};
use tabclean::{Engine, TabcleanError, Transform};

#[test]
fn test_trim_then_undo_restores_original_values() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    let (columns_before, rows_before) = user_rows(&engine, &ctx);

    let result = engine
        .apply_transformation(&ctx, &Transform::Trim { column: "email".into() })
        .unwrap();
    assert_eq!(result.affected, 3);
    assert_eq!(result.row_count, 5);

    let (columns, _) = user_rows(&engine, &ctx);
    assert_eq!(columns, vec!["id", "name", "email", "status"]);
    assert_eq!(
        column_values(&engine, &ctx, "email"),
        vec![
            Some("ann@example.com".to_string()),
            Some("bob@example.com".to_string()),
            Some("cy@example.com".to_string()),
            Some("dee@example.com".to_string()),
            Some("eve@example.com".to_string()),
        ]
    );

    engine.undo(&ctx).unwrap();
    let (columns_after, rows_after) = user_rows(&engine, &ctx);
    assert_eq!(columns_after, columns_before);
    assert_eq!(rows_after, rows_before);
}

#[test]
fn test_affected_matches_predicate_count() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(
        &mut engine,
        "codes",
        &[
            vec!["code", "label"],
            vec![" 7", "Alpha"],
            vec!["12", "alpha beta"],
            vec!["00042", "ALPHA"],
            vec!["", "gamma"],
            vec!["3 ", "delta"],
        ],
    );

    let cases: Vec<(Transform, &str)> = vec![
        (
            Transform::Trim { column: "code".into() },
            "SELECT COUNT(*) FROM codes WHERE code IS NOT NULL AND code <> trim(code)",
        ),
        (
            Transform::Uppercase { column: "label".into() },
            "SELECT COUNT(*) FROM codes WHERE label IS NOT NULL AND label <> upper(label)",
        ),
        (
            Transform::Replace {
                column: "label".into(),
                find: "ALPHA".into(),
                replace: "omega".into(),
                case_sensitive: true,
                match_type: MatchType::Contains,
            },
            "SELECT COUNT(*) FROM codes WHERE contains(label, 'ALPHA')",
        ),
        (
            Transform::PadZeros { column: "code".into(), length: 3 },
            "SELECT COUNT(*) FROM codes WHERE code IS NOT NULL AND length(code) < 3",
        ),
    ];

    for (step, predicate) in cases {
        let expected = engine.substrate().query_count(predicate).unwrap();
        let result = engine.apply_transformation(&ctx, &step).unwrap();
        assert_eq!(result.affected, expected, "affected rows of {}", step.type_name());
    }
}

#[test]
fn test_undo_redo_is_exact_for_every_transform_type() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(
        &mut engine,
        "wide",
        &[
            vec!["name", "email", "amount", "neg", "joined", "birth", "code", "full", "v"],
            vec![" ann  lee ", "ANN@X.COM", "$1,234.50", "(12.00)", "01/15/2020", "1990-05-01", "42", "a-b", "x"],
            vec!["bob\u{7}", "bob@x.com", "$5", "-3", "2020-02-03", "1985-12-31", "7", "c-d", ""],
            vec![" ann  lee ", "ANN@X.COM", "$1,234.50", "(12.00)", "01/15/2020", "1990-05-01", "42", "a-b", "x"],
        ],
    );

    let steps = vec![
        Transform::Trim { column: "name".into() },
        Transform::CollapseSpaces { column: "name".into() },
        Transform::RemoveNonPrintable { column: "name".into() },
        Transform::TitleCase { column: "name".into() },
        Transform::Lowercase { column: "email".into() },
        Transform::Uppercase { column: "email".into() },
        Transform::Replace {
            column: "email".into(),
            find: "@x.com".into(),
            replace: "@y.org".into(),
            case_sensitive: false,
            match_type: MatchType::Contains,
        },
        Transform::PadZeros { column: "code".into(), length: 5 },
        Transform::RenameColumn { column: "code".into(), new_name: "zip".into() },
        Transform::UnformatCurrency { column: "amount".into() },
        Transform::FixNegatives { column: "neg".into() },
        Transform::StandardizeDate { column: "joined".into(), format: "%Y-%m-%d".into() },
        Transform::CalculateAge { column: "birth".into() },
        Transform::SplitColumn {
            column: "full".into(),
            mode: SplitMode::Delimiter,
            delimiter: Some("-".into()),
            position: None,
            length: None,
        },
        Transform::CombineColumns {
            columns: vec!["name".into(), "zip".into()],
            separator: " ".into(),
            new_column: "contact".into(),
            ignore_empty: false,
        },
        Transform::FillDown { column: "v".into() },
        Transform::Scrub { column: "email".into(), method: ScrubMethod::Mask },
        Transform::CastType { column: "zip".into(), target: CastTarget::Integer },
        Transform::RemoveDuplicates,
        Transform::CustomSql { sql: "UPDATE wide SET v = upper(v)".into() },
    ];

    for step in &steps {
        let before = fingerprint(&engine, &ctx);
        engine.apply_transformation(&ctx, step).unwrap();
        let after = fingerprint(&engine, &ctx);

        engine.undo(&ctx).unwrap();
        assert_eq!(fingerprint(&engine, &ctx), before, "undo of {}", step.type_name());
        engine.redo(&ctx).unwrap();
        assert_eq!(fingerprint(&engine, &ctx), after, "redo of {}", step.type_name());
    }

    assert_eq!(engine.row_count(&ctx).unwrap(), 2);
}

#[test]
fn test_undo_walks_back_through_mixed_history() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    let original = fingerprint(&engine, &ctx);

    engine
        .apply_transformation(&ctx, &Transform::Trim { column: "email".into() })
        .unwrap();
    engine.edit_cell(&ctx, 2, "status", Some("active")).unwrap();
    engine
        .apply_transformation(&ctx, &Transform::RemoveDuplicates)
        .unwrap();
    engine.delete_row(&ctx, 1).unwrap();
    engine
        .apply_transformation(&ctx, &Transform::Uppercase { column: "name".into() })
        .unwrap();

    while engine.can_undo(&ctx).unwrap() {
        engine.undo(&ctx).unwrap();
    }
    assert_eq!(fingerprint(&engine, &ctx), original);

    let err = engine.undo(&ctx).unwrap_err();
    assert!(matches!(err, TabcleanError::NothingToUndo { .. }));
}

#[test]
fn test_edit_records_history_and_audit_detail() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());

    let result = engine.edit_cell(&ctx, 4, "name", Some("Dee Ray")).unwrap();
    assert_eq!(result.cells_changed, 1);
    let audit_entry_id = result.audit_entry_id.unwrap();

    let page = engine.audit_row_details(&audit_entry_id, 10, 0).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.rows[0].row_index, 4);
    assert_eq!(page.rows[0].previous_value.as_deref(), Some("dee"));
    assert_eq!(page.rows[0].new_value.as_deref(), Some("Dee Ray"));

    let entries = engine.audit_entries_for_table(&ctx, AuditView::ActiveOnly).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, CommandKind::ManualEdit);
    assert_eq!(entries[0].audit_entry_id, audit_entry_id);
}

#[test]
fn test_undone_commands_show_only_in_full_history() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine
        .apply_transformation(&ctx, &Transform::Trim { column: "email".into() })
        .unwrap();
    engine
        .apply_transformation(&ctx, &Transform::Uppercase { column: "status".into() })
        .unwrap();
    engine.undo(&ctx).unwrap();

    assert_eq!(engine.audit_entries_for_table(&ctx, AuditView::ActiveOnly).unwrap().len(), 1);
    let all = engine.audit_entries_for_table(&ctx, AuditView::All).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].undone);
    assert!(!all[1].undone);
}

#[test]
fn test_audit_detail_respects_row_cap() {
    let fixture = TestFixture::new().unwrap();
    let config = EngineConfig {
        audit_row_cap: 3,
        ..EngineConfig::default()
    };
    config.save(&fixture.workspace.config_path()).unwrap();
    let mut engine = Engine::open_in_memory(fixture.workspace.clone()).unwrap();
    let ctx = import(&mut engine, "people", &sample_data::people());

    let capped = engine
        .apply_transformation(&ctx, &Transform::Uppercase { column: "name".into() })
        .unwrap();
    assert_eq!(capped.affected, 5);
    assert!(capped.is_capped);
    assert!(!capped.has_row_details);
    assert_eq!(engine.audit_row_details(&capped.audit_entry_id, 10, 0).unwrap().total, 0);

    let captured = engine
        .apply_transformation(&ctx, &Transform::Trim { column: "email".into() })
        .unwrap();
    assert_eq!(captured.affected, 3);
    assert!(!captured.is_capped);
    assert!(captured.has_row_details);
    let page = engine.audit_row_details(&captured.audit_entry_id, 10, 0).unwrap();
    assert_eq!(page.total, 3);
    assert!(page.rows.iter().all(|d| d.column_name == "email"));
}

#[test]
fn test_invalid_step_leaves_table_untouched() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    let before = fingerprint(&engine, &ctx);

    let err = engine
        .apply_transformation(&ctx, &Transform::Trim { column: "missing".into() })
        .unwrap_err();
    assert!(matches!(err, TabcleanError::Validation { .. }));
    assert_eq!(fingerprint(&engine, &ctx), before);
    assert!(!engine.can_undo(&ctx).unwrap());
}

#[test]
fn test_invalid_edit_value_is_rejected_before_mutation() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(&mut engine, "people", &sample_data::people());
    engine
        .apply_transformation(&ctx, &Transform::CastType { column: "id".into(), target: CastTarget::Integer })
        .unwrap();
    let before = fingerprint(&engine, &ctx);

    let err = engine.edit_cell(&ctx, 1, "id", Some("not a number")).unwrap_err();
    assert!(matches!(err, TabcleanError::Validation { .. }));
    assert_eq!(fingerprint(&engine, &ctx), before);

    let err = engine.edit_cell(&ctx, 9, "name", Some("x")).unwrap_err();
    assert!(matches!(err, TabcleanError::Validation { .. }));
}

#[test]
fn test_text_steps_after_integer_cast_and_undo() {
    let fixture = TestFixture::new().unwrap();
    let mut engine = fixture.engine();
    let ctx = import(
        &mut engine,
        "codes",
        &[vec!["code", "label"], vec!["42", "a"], vec!["7", "b"], vec!["12345", "c"]],
    );
    engine
        .apply_transformation(
            &ctx,
            &Transform::CastType { column: "code".into(), target: CastTarget::Integer },
        )
        .unwrap();
    let cast_state = fingerprint(&engine, &ctx);

    let padded = engine
        .apply_transformation(&ctx, &Transform::PadZeros { column: "code".into(), length: 5 })
        .unwrap();
    assert_eq!(padded.affected, 2);
    assert_eq!(
        column_values(&engine, &ctx, "code"),
        vec![Some("00042".to_string()), Some("00007".to_string()), Some("12345".to_string())]
    );
    let details = engine.audit_row_details(&padded.audit_entry_id, 10, 0).unwrap();
    assert_eq!(details.total, 2);

    let hashed = engine
        .apply_transformation(
            &ctx,
            &Transform::Scrub { column: "code".into(), method: ScrubMethod::Hash },
        )
        .unwrap();
    assert_eq!(hashed.affected, 3);
    assert!(column_values(&engine, &ctx, "code")
        .iter()
        .all(|v| v.as_deref().map(|s| s.len() == 32).unwrap_or(false)));

    engine.undo(&ctx).unwrap();
    engine.undo(&ctx).unwrap();
    assert_eq!(fingerprint(&engine, &ctx), cast_state);
}
