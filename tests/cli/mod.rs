use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn lxc_isolation() -> Command {
    Command::cargo_bin("lxc-isolation").unwrap()
}

#[test]
fn test_limits_prints_cgroup_values() {
    lxc_isolation()
        .args(["limits", "--cpus", "0.5", "--mem", "64"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cpu_shares\": 512"))
        .stdout(predicate::str::contains("\"memory_limit_bytes\": 134217728"));
}

#[test]
fn test_limits_scale_with_assignment() {
    lxc_isolation()
        .args(["limits", "--cpus", "2", "--mem", "1024"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cpu_shares\": 2048"))
        .stdout(predicate::str::contains("\"memory_limit_bytes\": 1073741824"));
}

#[test]
fn test_check_fails_without_toolkit() {
    let mut config = NamedTempFile::new().unwrap();
    write!(
        config,
        r#"{{"toolkit": {{"version": "/nonexistent/lxc-version"}}}}"#
    )
    .unwrap();

    lxc_isolation()
        .args(["check", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = NamedTempFile::new().unwrap();
    write!(config, "not json").unwrap();

    lxc_isolation()
        .args(["limits", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_run_rejects_malformed_param() {
    lxc_isolation()
        .args([
            "run",
            "--group",
            "fw-1",
            "--uri",
            "hdfs://pkg/executor.tgz",
            "--param",
            "novalue",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_run_requires_group() {
    lxc_isolation()
        .args(["run", "--uri", "hdfs://pkg/executor.tgz"])
        .assert()
        .failure();
}
