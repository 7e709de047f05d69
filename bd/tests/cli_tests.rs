//! Tests for the `bd` binary

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn bd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bd").expect("bd binary should build");
    // Keep logs and default databases inside the temp dir
    cmd.env("HOME", home).env("XDG_DATA_HOME", home.join("data"));
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("batchd.yml");
    std::fs::write(&path, body).expect("Failed to write config");
    path
}

#[test]
fn test_help_lists_commands() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    bd(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("stats"))
        .stdout(predicate::str::contains("collate"));
}

#[test]
fn test_stats_without_database() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let database = temp.path().join("missing.db");
    let config = write_config(
        temp.path(),
        &format!("statistics:\n  database: {}\n", database.display()),
    );

    bd(temp.path())
        .arg("--config")
        .arg(&config)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("No statistics database found"));
    assert!(!database.exists());
}

#[test]
fn test_simulate_then_stats() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let database = temp.path().join("statistics.db");
    let config = write_config(
        temp.path(),
        &format!(
            "statistics:\n  database: {}\napplications:\n  - name: geo\n    max-concurrent-requests: 2\n    max-requests-per-group: 10\n",
            database.display()
        ),
    );

    let output = bd(temp.path())
        .arg("--config")
        .arg(&config)
        .args(["simulate", "--jobs", "2", "--requests", "25", "--latency-ms", "0", "--format", "json"])
        .timeout(std::time::Duration::from_secs(60))
        .output()
        .expect("Failed to run bd simulate");
    assert!(output.status.success(), "simulate failed: {}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("simulate should print JSON");
    assert_eq!(summary["scheduler"]["groups_dispatched"], 6);
    assert_eq!(summary["scheduler"]["groups_finished"], 6);
    assert_eq!(summary["jobs"].as_array().map(Vec::len), Some(2));
    assert!(summary["jobs"][0]["created_at"].is_string());
    assert!(database.exists());

    bd(temp.path())
        .arg("--config")
        .arg(&config)
        .args(["stats", "--application", "geo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("geo"));
}

#[test]
fn test_collate_empty_database() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let database = temp.path().join("statistics.db");
    let config = write_config(
        temp.path(),
        &format!("statistics:\n  database: {}\n", database.display()),
    );

    bd(temp.path())
        .arg("--config")
        .arg(&config)
        .args(["collate", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"saved\": 0"));
}
