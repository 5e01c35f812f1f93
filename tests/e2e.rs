//! End-to-end scenarios driving the built `rlms-worker` binary against
//! mocked root/subcall CLIs (`/bin/sh -c '...'` one-liners), matching
//! the literal scenarios catalogued for this worker.

use std::io::Write as _;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

fn worker_command() -> Command {
    Command::cargo_bin("rlms-worker").unwrap_or_else(|e| panic!("binary not found: {e}"))
}

fn write_context_file(dir: &std::path::Path, entries: &[(&str, &str)]) -> std::path::PathBuf {
    let list_path = dir.join("files.txt");
    let mut list = std::fs::File::create(&list_path).unwrap_or_else(|e| panic!("create failed: {e}"));
    for (name, contents) in entries {
        let file_path = dir.join(name);
        std::fs::write(&file_path, contents).unwrap_or_else(|e| panic!("write failed: {e}"));
        writeln!(list, "{}", file_path.display()).unwrap_or_else(|e| panic!("write failed: {e}"));
    }
    list_path
}

fn parse_stdout(output: &[u8]) -> Value {
    serde_json::from_slice(output).unwrap_or_else(|e| panic!("not valid JSON: {e}\n{}", String::from_utf8_lossy(output)))
}

#[test]
fn test_scenario_empty_context_no_final_hits_step_budget() {
    let dir = tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
    let list_path = write_context_file(dir.path(), &[]);

    let assertion = worker_command()
        .args([
            "--repo",
            &dir.path().display().to_string(),
            "--loop-id",
            "L1",
            "--role",
            "analysis",
            "--context-file-list",
            &list_path.display().to_string(),
            "--output-dir",
            &dir.path().join("out").display().to_string(),
            "--max-steps",
            "3",
            "--max-depth",
            "2",
            "--timeout-seconds",
            "30",
            "--root-command-json",
            r#"["/bin/sh","-c","printf pass"]"#,
        ])
        .assert()
        .code(2);

    let output = parse_stdout(&assertion.get_output().stdout);
    assert_eq!(output["ok"], Value::Bool(false));
    assert_eq!(output["error_code"], Value::String("limit_exceeded".to_string()));
    assert_eq!(output["stats"]["step_count"], Value::from(3));
}

#[test]
fn test_scenario_immediate_final_sets_highlights_and_citations() {
    let dir = tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
    let list_path = write_context_file(dir.path(), &[("a.py", "class A:\n    pass\n")]);

    let script = r#"append_highlight("A")
add_citation("a.py",1,1,"class","class A:")
set_final({"highlights":["A"],"citations":[]})
"#;
    let command = format!("printf '%s' '{script}'");

    let assertion = worker_command()
        .args([
            "--repo",
            &dir.path().display().to_string(),
            "--loop-id",
            "L1",
            "--role",
            "analysis",
            "--context-file-list",
            &list_path.display().to_string(),
            "--output-dir",
            &dir.path().join("out").display().to_string(),
            "--max-steps",
            "3",
            "--max-depth",
            "2",
            "--timeout-seconds",
            "30",
            "--root-command-json",
            &format!(r#"["/bin/sh","-c",{}]"#, serde_json::to_string(&command).unwrap_or_default()),
        ])
        .assert()
        .code(0);

    let output = parse_stdout(&assertion.get_output().stdout);
    assert_eq!(output["ok"], Value::Bool(true));
    assert!(output["highlights"].as_array().is_some_and(|h| h.iter().any(|v| v == "A")));
    let citations = output["citations"].as_array().unwrap_or_else(|| panic!("citations missing"));
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0]["path"], Value::String("a.py".to_string()));
}

#[test]
fn test_scenario_import_is_sandbox_violation() {
    let dir = tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
    let list_path = write_context_file(dir.path(), &[]);

    let assertion = worker_command()
        .args([
            "--repo",
            &dir.path().display().to_string(),
            "--loop-id",
            "L1",
            "--role",
            "analysis",
            "--context-file-list",
            &list_path.display().to_string(),
            "--output-dir",
            &dir.path().join("out").display().to_string(),
            "--max-steps",
            "3",
            "--max-depth",
            "2",
            "--timeout-seconds",
            "30",
            "--root-command-json",
            r#"["/bin/sh","-c","printf 'import os'"]"#,
        ])
        .assert()
        .code(1);

    let output = parse_stdout(&assertion.get_output().stdout);
    assert_eq!(output["ok"], Value::Bool(false));
    assert_eq!(output["error_code"], Value::String("sandbox_violation".to_string()));
}

#[test]
fn test_scenario_dunder_attempt_is_sandbox_violation() {
    let dir = tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
    let list_path = write_context_file(dir.path(), &[]);

    let assertion = worker_command()
        .args([
            "--repo",
            &dir.path().display().to_string(),
            "--loop-id",
            "L1",
            "--role",
            "analysis",
            "--context-file-list",
            &list_path.display().to_string(),
            "--output-dir",
            &dir.path().join("out").display().to_string(),
            "--max-steps",
            "3",
            "--max-depth",
            "2",
            "--timeout-seconds",
            "30",
            "--root-command-json",
            r#"["/bin/sh","-c","printf 'x = (1).__class__'"]"#,
        ])
        .assert()
        .code(1);

    let output = parse_stdout(&assertion.get_output().stdout);
    assert_eq!(output["ok"], Value::Bool(false));
    assert_eq!(output["error_code"], Value::String("sandbox_violation".to_string()));
}

#[test]
fn test_scenario_subcall_timeout_fails_terminally() {
    let dir = tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
    let list_path = write_context_file(dir.path(), &[]);

    let assertion = worker_command()
        .args([
            "--repo",
            &dir.path().display().to_string(),
            "--loop-id",
            "L1",
            "--role",
            "analysis",
            "--context-file-list",
            &list_path.display().to_string(),
            "--output-dir",
            &dir.path().join("out").display().to_string(),
            "--max-steps",
            "3",
            "--max-depth",
            "2",
            "--timeout-seconds",
            "2",
            "--root-command-json",
            r#"["/bin/sh","-c","printf 'sub_rlm(\"q\", depth=1)'"]"#,
            "--subcall-command-json",
            r#"["/bin/sh","-c","sleep 10"]"#,
        ])
        .assert()
        .code(predicate::in_iter([1, 2]));

    let output = parse_stdout(&assertion.get_output().stdout);
    assert_eq!(output["ok"], Value::Bool(false));
    let error_code = output["error_code"].as_str().unwrap_or_default();
    assert!(matches!(error_code, "model_invocation_failed" | "limit_exceeded"));
}

#[test]
fn test_scenario_subcall_depth_exceeds_cap() {
    let dir = tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
    let list_path = write_context_file(dir.path(), &[]);

    let assertion = worker_command()
        .args([
            "--repo",
            &dir.path().display().to_string(),
            "--loop-id",
            "L1",
            "--role",
            "analysis",
            "--context-file-list",
            &list_path.display().to_string(),
            "--output-dir",
            &dir.path().join("out").display().to_string(),
            "--max-steps",
            "3",
            "--max-depth",
            "2",
            "--timeout-seconds",
            "30",
            "--root-command-json",
            r#"["/bin/sh","-c","printf 'sub_rlm(\"q\", depth=3)'"]"#,
        ])
        .assert()
        .code(2);

    let output = parse_stdout(&assertion.get_output().stdout);
    assert_eq!(output["ok"], Value::Bool(false));
    assert_eq!(output["error_code"], Value::String("limit_exceeded".to_string()));
}

#[test]
fn test_missing_root_command_is_invalid_config_without_stats() {
    let dir = tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
    let list_path = write_context_file(dir.path(), &[]);

    let assertion = worker_command()
        .args([
            "--repo",
            &dir.path().display().to_string(),
            "--loop-id",
            "L1",
            "--role",
            "analysis",
            "--context-file-list",
            &list_path.display().to_string(),
            "--output-dir",
            &dir.path().join("out").display().to_string(),
            "--max-steps",
            "3",
            "--max-depth",
            "2",
            "--timeout-seconds",
            "30",
            "--root-command-json",
            "[]",
        ])
        .assert()
        .code(2);

    let output = parse_stdout(&assertion.get_output().stdout);
    assert_eq!(output["error_code"], Value::String("missing_root_command".to_string()));
    assert!(output.get("stats").is_none());
}
