//! End-to-end CLI workflows against a file-backed workspace

use crate::common::{sample_data, CliTestRunner};
use tabclean::{Engine, TabcleanError};

fn csv(runner: &CliTestRunner, name: &str, data: &[Vec<&str>]) -> String {
    runner
        .fixture()
        .create_csv(name, data)
        .unwrap()
        .to_string_lossy()
        .to_string()
}

#[test]
fn test_clean_undo_and_inspect_workflow() {
    let runner = CliTestRunner::new().unwrap();
    let path = csv(&runner, "contacts.csv", &sample_data::contacts_a());

    runner.expect_success(&["init"]);
    runner.expect_success(&["import", &path, "--name", "contacts"]);
    runner.expect_success(&["list"]);
    runner.expect_success(&["list", "--format", "json"]);
    runner.expect_success(&["apply", "--type", "uppercase", "--column", "name"]);
    runner.expect_success(&[
        "apply",
        "contacts",
        "--type",
        "replace",
        "--column",
        "email",
        "--params",
        r#"{"find": "example.com", "replace": "example.org"}"#,
    ]);
    runner.expect_success(&["edit", "--row", "1", "--column", "name", "--value", "Annie"]);
    runner.expect_success(&["edit", "--row", "2", "--column", "email", "--null"]);
    runner.expect_success(&["show", "--format", "json"]);
    runner.expect_success(&["history", "--all"]);
    runner.expect_success(&["diff", "contacts", "--against", "original"]);
    runner.expect_success(&["undo"]);
    runner.expect_success(&["undo"]);
    runner.expect_success(&["redo"]);
    runner.expect_success(&["stats"]);

    let engine = Engine::open(runner.fixture().workspace.clone()).unwrap();
    let ctx = engine.context("contacts").unwrap();
    let (_, rows) = tabclean::table::read_user_rows(engine.substrate(), &ctx.key).unwrap();
    assert_eq!(rows[0][1].as_deref(), Some("Annie"));
    assert_eq!(rows[1][1].as_deref(), Some("BOB"));
    assert_eq!(rows[1][2].as_deref(), Some("bob@example.org"));
}

#[test]
fn test_switch_freeze_and_combine_workflow() {
    let runner = CliTestRunner::new().unwrap();
    let a = csv(&runner, "a.csv", &sample_data::contacts_a());
    let b = csv(&runner, "b.csv", &sample_data::contacts_b());

    runner.expect_success(&["import", &a, "--name", "a"]);
    runner.expect_success(&["import", &b, "--name", "b"]);
    runner.expect_success(&["switch", "b"]);
    runner.expect_success(&["apply", "--type", "uppercase", "--column", "status"]);

    let err = runner.expect_failure(&["apply", "a", "--type", "trim", "--column", "name"]);
    assert!(matches!(err, TabcleanError::TableNotActive { .. }));

    runner.expect_success(&["stack", "a", "b", "--name", "ab"]);
    runner.expect_success(&["join", "a", "b", "--on", "id", "--kind", "full", "--name", "a_b"]);
    runner.expect_success(&["diff", "a", "b", "--key", "id", "--format", "json"]);
    runner.expect_success(&["compact", "b"]);
    runner.expect_success(&["freeze", "b"]);
    runner.expect_success(&["thaw", "a"]);
    runner.expect_success(&["delete", "ab"]);

    let engine = Engine::open(runner.fixture().workspace.clone()).unwrap();
    let names: Vec<&str> = engine.tables().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "a_b"]);
    let joined = engine.context("a_b").unwrap();
    assert_eq!(engine.row_count(&joined).unwrap(), 5);
}

#[test]
fn test_row_insert_and_delete_commands() {
    let runner = CliTestRunner::new().unwrap();
    let path = csv(&runner, "contacts.csv", &sample_data::contacts_a());

    runner.expect_success(&["import", &path, "--name", "contacts"]);
    runner.expect_success(&["insert-row", "--set", "id=3", "--set", "name=Cy"]);
    runner.expect_success(&["insert-row", "--at", "1", "--set", "id=0"]);
    runner.expect_success(&["delete-row", "--row", "2"]);

    let engine = Engine::open(runner.fixture().workspace.clone()).unwrap();
    let ctx = engine.context("contacts").unwrap();
    let (_, rows) = tabclean::table::read_user_rows(engine.substrate(), &ctx.key).unwrap();
    let ids: Vec<Option<&str>> = rows.iter().map(|r| r[0].as_deref()).collect();
    assert_eq!(ids, vec![Some("0"), Some("2"), Some("3")]);
}

#[test]
fn test_cli_rejects_bad_input() {
    let runner = CliTestRunner::new().unwrap();
    let path = csv(&runner, "contacts.csv", &sample_data::contacts_a());
    runner.expect_success(&["import", &path, "--name", "contacts"]);

    let err = runner.expect_failure(&["apply", "--type", "shout", "--column", "name"]);
    assert!(matches!(err, TabcleanError::Validation { .. }));
    let err = runner.expect_failure(&["apply", "--type", "trim", "--column", "name", "--params", "{"]);
    assert!(matches!(err, TabcleanError::Validation { .. }));
    let err = runner.expect_failure(&["list", "--format", "yaml"]);
    assert!(matches!(err, TabcleanError::Validation { .. }));
    let err = runner.expect_failure(&["show", "missing"]);
    assert!(matches!(err, TabcleanError::TableNotFound { .. }));
    let err = runner.expect_failure(&["undo"]);
    assert!(matches!(err, TabcleanError::NothingToUndo { .. }));
}
