#![allow(deprecated)] // Command::cargo_bin

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A corral command isolated from the caller's home and environments file
fn corral(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("corral").unwrap();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join(".config"))
        .env_remove("CORRAL_ENVIRONMENTS_PATH")
        .env_remove("CORRAL_ENV");
    cmd
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("corral").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("bootstrap"))
        .stdout(predicate::str::contains("destroy-environment"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("corral").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "corral {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_bootstrap_help() {
    let mut cmd = Command::cargo_bin("corral").unwrap();
    cmd.arg("bootstrap")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--upload-tools"))
        .stdout(predicate::str::contains("--agent-version"))
        .stdout(predicate::str::contains("--metadata-source"));
}

#[test]
fn test_init_show() {
    let dir = tempfile::tempdir().unwrap();
    let output = corral(&dir).args(["init", "--show"]).output().unwrap();
    assert!(output.status.success());

    let text = String::from_utf8(output.stdout).unwrap();
    assert!(!text.contains("{{rand}}"));
    let doc: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
    assert_eq!(doc["default"], serde_yaml::Value::from("openstack"));
    assert_eq!(
        doc["environments"]["openstack"]["type"],
        serde_yaml::Value::from("openstack")
    );
}

#[test]
fn test_init_writes_once() {
    let dir = tempfile::tempdir().unwrap();
    corral(&dir).arg("init").assert().success();

    let path = dir.path().join(".config/corral/environments.yaml");
    assert!(path.exists());
    let first = fs::read_to_string(&path).unwrap();

    corral(&dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    assert_eq!(fs::read_to_string(&path).unwrap(), first);

    corral(&dir).args(["init", "--force"]).assert().success();
    assert_ne!(fs::read_to_string(&path).unwrap(), first);
}

#[test]
fn test_missing_environments_file() {
    let dir = tempfile::tempdir().unwrap();
    corral(&dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no environments file found"));
}

#[test]
fn test_unknown_environment() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("environments.yaml"),
        "environments:\n  sandbox:\n    type: openstack\n",
    )
    .unwrap();

    corral(&dir)
        .args(["-e", "nope", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("environment \"nope\" not found"));
}

#[test]
fn test_unknown_provider_type() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("environments.yaml"),
        "environments:\n  sandbox:\n    type: ec2\n",
    )
    .unwrap();

    corral(&dir)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown provider type \"ec2\""));
}

#[test]
fn test_bootstrap_rejects_bad_constraints() {
    let dir = tempfile::tempdir().unwrap();
    corral(&dir)
        .args(["bootstrap", "--constraints", "bogus=1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown constraint \"bogus\""));
}

#[test]
fn test_bootstrap_rejects_bad_agent_version() {
    let dir = tempfile::tempdir().unwrap();
    corral(&dir)
        .args(["bootstrap", "--agent-version", "one.two"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid version"));
}
