#![cfg(feature = "cli")]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::tempdir;

const SUM_MODULE: &str = r#"{
  "name": "sum.c",
  "functions": [
    {
      "name": "sum",
      "params": 2,
      "body": [
        { "op": "binary", "dst": 2, "kind": "add", "lhs": 0, "rhs": 1,
          "location": { "file": "sum.c", "line": 2, "column": 12 } },
        { "op": "return", "value": 2 }
      ]
    }
  ]
}"#;

const TEST_MODULE: &str = r#"{
  "name": "sum_test.c",
  "functions": [
    {
      "name": "test_sum",
      "body": [
        { "op": "const", "dst": 0, "value": 130 },
        { "op": "const", "dst": 1, "value": -7 },
        { "op": "call", "dst": 2, "callee": "sum", "args": [0, 1] },
        { "op": "const", "dst": 3, "value": 123 },
        { "op": "compare", "dst": 4, "pred": "ne", "lhs": 2, "rhs": 3 },
        { "op": "return", "value": 4 }
      ]
    }
  ]
}"#;

fn write_modules(dir: &Path) -> (PathBuf, PathBuf) {
    let sum = dir.join("sum.json");
    let test = dir.join("sum_test.json");
    fs::write(&sum, SUM_MODULE).expect("sum module should be written");
    fs::write(&test, TEST_MODULE).expect("test module should be written");
    (sum, test)
}

fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_irmut"))
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("irmut should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn run_reports_killed_mutant_as_json() {
    let tmp = tempdir().expect("tempdir should be created");
    let (sum, test) = write_modules(tmp.path());

    let output = run_cli(&[
        "run",
        sum.to_str().expect("utf8 path"),
        test.to_str().expect("utf8 path"),
        "--mutators",
        "add_to_sub",
        "--workers",
        "2",
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value =
        serde_json::from_str(&stdout(&output)).expect("report should be JSON");
    assert_eq!(report["summary"]["total"], 1);
    assert_eq!(report["summary"]["killed"], 1);
    assert_eq!(report["mutants"][0]["id"], "add_to_sub:sum.c:sum:0");
    assert_eq!(report["mutants"][0]["status"], "failed");
    assert_eq!(report["tests"][0], "test_sum");
}

#[test]
fn dry_run_renders_markdown() {
    let tmp = tempdir().expect("tempdir should be created");
    let (sum, test) = write_modules(tmp.path());

    let output = run_cli(&[
        "run",
        sum.to_str().expect("utf8 path"),
        test.to_str().expect("utf8 path"),
        "--dry-run",
    ]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("# Mutation Testing Report"));
    assert!(text.contains("| dry run | 1 |"));
    assert!(text.contains("| add_to_sub:sum.c:sum:0 | dry_run |"));
}

#[test]
fn compiled_object_can_be_linked_as_dynamic_library() {
    let tmp = tempdir().expect("tempdir should be created");
    let (sum, test) = write_modules(tmp.path());
    let object = tmp.path().join("sum.o");

    let compiled = run_cli(&[
        "compile",
        sum.to_str().expect("utf8 path"),
        "--output",
        object.to_str().expect("utf8 path"),
    ]);
    assert!(compiled.status.success());
    assert!(object.exists());

    // `sum` now only comes from the library: nothing to mutate, tests still link.
    let output = run_cli(&[
        "run",
        test.to_str().expect("utf8 path"),
        "--dylib",
        object.to_str().expect("utf8 path"),
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value =
        serde_json::from_str(&stdout(&output)).expect("report should be JSON");
    assert_eq!(report["summary"]["tests"], 1);
    assert_eq!(report["summary"]["total"], 0);
}

#[test]
fn unknown_mutator_is_rejected() {
    let tmp = tempdir().expect("tempdir should be created");
    let (sum, _) = write_modules(tmp.path());

    let output = run_cli(&["run", sum.to_str().expect("utf8 path"), "--mutators", "bogus"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("bogus"));
}

#[test]
fn mutators_lists_catalog() {
    let output = run_cli(&["mutators"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("add_to_sub"));
    assert!(text.contains("negate_condition"));
    assert_eq!(text.lines().count(), 13);
}
