//! End-to-end tests for the `shepherd` binary.
//!
//! Cluster commands run with `--dry-run`, which records node calls instead
//! of touching real installations.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn shepherd(project: &TempDir) -> Command {
    let mut command = Command::cargo_bin("shepherd").unwrap();
    command
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .args(["--project", project.path().to_str().unwrap()]);
    command
}

// ============================================================================
// Argument parsing
// ============================================================================

#[test]
fn help_lists_cluster_commands() {
    Command::cargo_bin("shepherd")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("apply-bundle"))
        .stdout(predicate::str::contains("down"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn wait_rejects_unknown_operation() {
    Command::cargo_bin("shepherd")
        .unwrap()
        .args(["wait", "coffee"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("rolling-restart"));
}

#[test]
fn up_help_shows_shape_options() {
    Command::cargo_bin("shepherd")
        .unwrap()
        .args(["up", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--slaves"))
        .stdout(predicate::str::contains("--multisite"));
}

// ============================================================================
// Config commands
// ============================================================================

#[test]
fn config_show_merges_project_file() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("shepherd.toml"),
        "[topology]\nslaves = 5\n",
    )
    .unwrap();

    shepherd(&temp)
        .args(["config", "show", "--format", "toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[topology]"))
        .stdout(predicate::str::contains("slaves = 5"));
}

#[test]
fn config_show_json() {
    let temp = TempDir::new().unwrap();
    shepherd(&temp)
        .args(["config", "show", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"credentials\""));
}

#[test]
fn config_validate_rejects_bad_port_range() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("shepherd.toml"),
        "[ports]\nmin = 9000\nmax = 8000\n",
    )
    .unwrap();

    shepherd(&temp)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

// ============================================================================
// Cluster commands
// ============================================================================

#[test]
fn up_dry_run_records_configuration() {
    let temp = TempDir::new().unwrap();

    shepherd(&temp)
        .args(["up", "--dry-run", "--slaves", "2", "--search-heads", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("edit cluster-config -mode master"))
        .stdout(predicate::str::contains("-mode slave"))
        .stdout(predicate::str::contains("-mode searchhead"));

    // Nothing is saved on a dry run.
    assert!(!temp.path().join(".shepherd/cluster/topology.toml").exists());
}

#[test]
fn up_rejects_invalid_shape() {
    let temp = TempDir::new().unwrap();
    shepherd(&temp)
        .args(["up", "--dry-run", "--replication-factor", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid topology shape"));
}

#[test]
fn status_without_cluster_fails() {
    let temp = TempDir::new().unwrap();
    shepherd(&temp)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No cluster is up"));
}

#[test]
fn down_dry_run_reattaches_saved_cluster() {
    let temp = TempDir::new().unwrap();
    let state = temp.path().join(".shepherd/cluster");
    fs::create_dir_all(&state).unwrap();
    fs::write(
        state.join("topology.toml"),
        r#"artifacts = []

[[nodes]]
server_name = "127.0.0.1-2026-01-01-00.00.00"
role = "master"
host = "127.0.0.1"
transport = "local"
home = "/opt/splunk"
management_port = 8089
created_at = "2026-01-01T00:00:00Z"
available_sites = []
"#,
    )
    .unwrap();

    shepherd(&temp)
        .args(["down", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("node0@127.0.0.1 stop"))
        .stdout(predicate::str::contains("node0@127.0.0.1 uninstall"));

    // A dry run leaves the manifest in place.
    assert!(state.join("topology.toml").exists());
}

#[test]
fn roll_hot_buckets_dry_run_targets_slaves() {
    let temp = TempDir::new().unwrap();
    let state = temp.path().join(".shepherd/cluster");
    fs::create_dir_all(&state).unwrap();
    fs::write(
        state.join("topology.toml"),
        r#"artifacts = []

[[nodes]]
server_name = "127.0.0.1-2026-01-01-00.00.00"
role = "master"
host = "127.0.0.1"
transport = "local"
home = "/opt/splunk"
management_port = 8089
created_at = "2026-01-01T00:00:00Z"
available_sites = []

[[nodes]]
server_name = "127.0.0.1-2026-01-01-00.00.01"
role = "slave"
host = "127.0.0.1"
transport = "local"
home = "/opt/splunk0"
management_port = 8090
replication_port = 9100
tcp_input_port = 9101
created_at = "2026-01-01T00:00:01Z"
available_sites = []
"#,
    )
    .unwrap();

    shepherd(&temp)
        .args(["roll-hot-buckets", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "node1@127.0.0.1 _internal call '/data/indexes/*/roll-hot-buckets' -auth admin:changeme",
        ))
        .stdout(predicate::str::contains("node0@127.0.0.1 _internal").not());
}
