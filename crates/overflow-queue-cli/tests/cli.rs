//! Binary tests for the overflow-queue command.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn overflow_queue(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("overflow-queue").unwrap();
    cmd.env_remove("OVERFLOW_QUEUE_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--root")
        .arg(dir.path())
        .arg("--queue")
        .arg("cli-tests");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("overflow-queue")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("receive"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn test_send_file_then_receive() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("payload.txt");
    std::fs::write(&input, "p".repeat(70_000)).unwrap();

    overflow_queue(&dir)
        .arg("send")
        .arg("--file")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("offloaded to blob"));

    overflow_queue(&dir)
        .args(["receive", "--delete"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"blob_name\""));

    overflow_queue(&dir)
        .args(["receive"])
        .assert()
        .success()
        .stdout(predicate::str::diff("null\n"));
}

#[test]
fn test_send_from_stdin() {
    let dir = TempDir::new().unwrap();

    overflow_queue(&dir)
        .arg("send")
        .write_stdin("piped body")
        .assert()
        .success();

    overflow_queue(&dir)
        .args(["receive", "-o", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("piped body"));
}

#[test]
fn test_invalid_queue_exits_with_configuration_code() {
    let dir = TempDir::new().unwrap();

    Command::cargo_bin("overflow-queue")
        .unwrap()
        .env_remove("OVERFLOW_QUEUE_CONFIG")
        .arg("--root")
        .arg(dir.path())
        .args(["--queue", "Not_Valid", "info"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("queue_name"));
}

#[test]
fn test_missing_config_file_exits_with_configuration_code() {
    let dir = TempDir::new().unwrap();

    overflow_queue(&dir)
        .arg("--config")
        .arg(dir.path().join("missing.yaml"))
        .arg("info")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_bad_batch_count_exits_with_queue_code() {
    let dir = TempDir::new().unwrap();

    overflow_queue(&dir)
        .args(["peek", "-n", "64"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("message_count"));
}

#[test]
fn test_config_file_and_environment() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("ovq.toml");
    std::fs::write(&config, "[manager]\nqueue_name = \"from-file\"\n").unwrap();

    Command::cargo_bin("overflow-queue")
        .unwrap()
        .env("OVQ__MANAGER__CONTAINER_NAME", "env-container")
        .arg("--config")
        .arg(&config)
        .args(["config", "--show", "-f", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("queue_name: from-file"))
        .stdout(predicate::str::contains("container_name: env-container"));
}
