//! CLI smoke tests: config bootstrap and offline status behavior.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn driftsync(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("driftsync").expect("binary builds");
    cmd.env("HOME", home.path());
    cmd
}

#[test]
fn init_writes_a_config_and_refuses_to_overwrite() {
    let home = TempDir::new().expect("home");
    let local = TempDir::new().expect("local");

    driftsync(&home)
        .args(["init", "--project", "demo", "--path"])
        .arg(local.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("config.yaml"));

    let config = home.path().join(".driftsync").join("config.yaml");
    assert!(config.exists());

    driftsync(&home)
        .args(["init", "--project", "demo", "--path"])
        .arg(local.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    driftsync(&home)
        .args(["init", "--project", "demo", "--force", "--path"])
        .arg(local.path())
        .assert()
        .success();
}

#[test]
fn status_reports_not_running_without_a_daemon() {
    let home = TempDir::new().expect("home");

    driftsync(&home)
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"running\": false"));
}

#[test]
fn sync_without_a_config_points_at_init() {
    let home = TempDir::new().expect("home");

    driftsync(&home)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("driftsync init"));
}

#[test]
fn daemon_stop_without_a_daemon_is_graceful() {
    let home = TempDir::new().expect("home");

    driftsync(&home)
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}
