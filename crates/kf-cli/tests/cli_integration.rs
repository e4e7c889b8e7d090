//! CLI integration tests
//!
//! Tests the k-forward CLI using assert_cmd.

use std::collections::BTreeMap;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn k_forward() -> Command {
    Command::cargo_bin("k-forward")
        .expect("Failed to locate k-forward binary - ensure it's built before running tests")
}

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_cli_help() {
    k_forward()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("k-forward"))
        .stdout(predicate::str::contains("Port forwarding inspector"));
}

#[test]
fn test_cli_version() {
    k_forward()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("k-forward"));
}

#[test]
fn test_cli_unknown_command() {
    k_forward()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_parse_host_and_port() {
    k_forward()
        .args(["parse", "db.internal:5432"])
        .assert()
        .success()
        .stdout(predicate::str::contains("host: db.internal"))
        .stdout(predicate::str::contains("port: 5432"));
}

#[test]
fn test_parse_bare_port_defaults_to_localhost() {
    k_forward()
        .args(["parse", "3000", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"key\": \"localhost:3000\""))
        .stdout(predicate::str::contains("\"localhost\": true"));
}

#[test]
fn test_parse_invalid_address() {
    k_forward()
        .args(["parse", "host:notaport"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid address"));
}

#[test]
fn test_attributes_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
            [ports_attributes."3000"]
            label = "Frontend"

            [ports_attributes."3000-3999"]
            protocol = "https"
        "#,
    );

    k_forward()
        .arg("--config")
        .arg(&config)
        .args(["attributes", "3000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"label\": \"Frontend\""))
        .stdout(predicate::str::contains("\"protocol\": \"https\""));
}

#[test]
fn test_attributes_by_command_line() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
            [ports_attributes."webpack"]
            onAutoForward = "silent"
        "#,
    );

    k_forward()
        .arg("--config")
        .arg(&config)
        .args(["attributes", "8080", "--command-line", "node webpack serve"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"onAutoForward\": \"silent\""));
}

#[test]
fn test_attributes_without_rules() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "restore_forwarded_ports = true\n");

    k_forward()
        .arg("--config")
        .arg(&config)
        .args(["attributes", "3000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No attributes"));
}

#[test]
fn test_attributes_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "restore_forwarded_ports = \"sometimes\"\n");

    k_forward()
        .arg("--config")
        .arg(&config)
        .args(["attributes", "3000"])
        .assert()
        .failure();
}

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("k-forward").join("config.toml");

    k_forward()
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(config.exists());

    k_forward()
        .arg("--config")
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("restore_forwarded_ports = true"));
}

#[test]
fn test_config_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("custom.toml");

    k_forward()
        .arg("--config")
        .arg(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_stored_and_forget() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("tunnels.json");

    // Storage keys hash the workspace, so write through the library
    let key = kf_registry::storage_key(Some("ssh-remote+box"), Some("/work/app")).unwrap();
    let value = r#"[{"remoteHost":"localhost","remotePort":3000,"localAddress":"localhost:3000","localPort":3000,"name":"web","privacy":"private","source":{"source":"user","description":"User Forwarded"}}]"#;
    let document: BTreeMap<String, String> = [(key, value.to_string())].into_iter().collect();
    std::fs::write(&storage, serde_json::to_string(&document).unwrap()).unwrap();

    k_forward()
        .args(["stored", "--authority", "ssh-remote+box", "--workspace", "/work/app"])
        .arg("--storage")
        .arg(&storage)
        .assert()
        .success()
        .stdout(predicate::str::contains("localhost:3000"))
        .stdout(predicate::str::contains("web"));

    k_forward()
        .args(["forget", "--authority", "ssh-remote+box", "--workspace", "/work/app"])
        .arg("--storage")
        .arg(&storage)
        .assert()
        .success();

    k_forward()
        .args(["stored", "--authority", "ssh-remote+box", "--workspace", "/work/app"])
        .arg("--storage")
        .arg(&storage)
        .assert()
        .success()
        .stdout(predicate::str::contains("No forwarded ports stored"));
}

#[test]
fn test_stored_requires_workspace() {
    k_forward()
        .args(["stored", "--authority", "ssh-remote+box"])
        .assert()
        .failure();
}
