//! CLI contract tests
//!
//! Drive the built `qfarm-worker` binary end to end. None of these need a
//! running broker or Go toolchain.

mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::go_project;

fn qfarm_bin() -> &'static str {
    env!("CARGO_BIN_EXE_qfarm-worker")
}

fn worker_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("worker.toml");
    std::fs::write(
        &path,
        "redis_url = \"redis://127.0.0.1:1\"\n\n[timeouts]\nbroker_ms = 500\n",
    )
    .unwrap();
    path
}

fn run(args: &[&str], config: &Path) -> Output {
    Command::new(qfarm_bin())
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("QFARM_REDIS_URL")
        .output()
        .unwrap()
}

#[test]
fn test_analyze_json_report() {
    let (project, git) = go_project();
    let scratch = tempfile::tempdir().unwrap();
    let config = worker_config(scratch.path());
    let checkout = project.path().to_string_lossy().to_string();

    let output = run(
        &["analyze", "host/user/repo", "--path", &checkout, "--json"],
        &config,
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let head = git.head().unwrap().peel_to_commit().unwrap().id().to_string();
    assert_eq!(report["repo"], "host/user/repo");
    assert_eq!(report["no"], 1);
    assert_eq!(report["commit_hash"], head.as_str());
    // both adapters are disabled in the project's .qfarm.toml
    assert_eq!(report["coverage"], 0.0);
    assert_eq!(report["score"], 50);
    assert_eq!(report["technical_debt_time"], "0s");
}

#[test]
fn test_analyze_text_report() {
    let (project, _git) = go_project();
    let scratch = tempfile::tempdir().unwrap();
    let config = worker_config(scratch.path());
    let checkout = project.path().to_string_lossy().to_string();

    let output = run(&["analyze", "host/user/repo", "--path", &checkout], &config);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("download-complete"));
    assert!(stdout.contains("all-done"));
    assert!(stdout.contains("Score:"));
}

#[test]
fn test_invalid_repo_id_fails() {
    let scratch = tempfile::tempdir().unwrap();
    let config = worker_config(scratch.path());

    let output = run(&["analyze", "not-a-repo", "--path", "."], &config);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid repository identifier"), "{}", stderr);
}

#[test]
fn test_unreachable_broker_is_fatal() {
    let scratch = tempfile::tempdir().unwrap();
    let config = worker_config(scratch.path());

    let output = run(&["run"], &config);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Can't connect to broker"), "{}", stderr);

    let output = run(&["enqueue", "host/user/repo"], &config);
    assert!(!output.status.success());
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(qfarm_bin()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["run", "enqueue", "analyze"] {
        assert!(stdout.contains(command), "missing {} in help", command);
    }
}
