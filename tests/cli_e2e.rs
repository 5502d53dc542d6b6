//! End-to-end CLI tests for the manga-downloader binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cmd(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("manga-downloader").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let config_home = TempDir::new().unwrap();
    cmd(&config_home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--manga"))
        .stdout(predicate::str::contains("--no-cbz"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let config_home = TempDir::new().unwrap();
    cmd(&config_home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("manga-downloader"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let config_home = TempDir::new().unwrap();
    cmd(&config_home)
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// Without a manga on the command line or in the config the run fails before any network use.
#[test]
fn test_binary_missing_manga_exits_one() {
    let config_home = TempDir::new().unwrap();
    cmd(&config_home)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No manga specified"));
}

/// The first run writes a default config file.
#[test]
fn test_binary_creates_default_config() {
    let config_home = TempDir::new().unwrap();
    cmd(&config_home).assert().code(1);

    let path = config_home.path().join("manga_downloader").join("config.json");
    let raw = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["manga_name"], "");
    assert_eq!(value["workers"], 10);
    assert_eq!(value["cbz"], true);
    assert_eq!(value["mirror_policy"], "first_match");
}

/// Out-of-range config values are rejected with the setting named.
#[test]
fn test_binary_invalid_config_value_exits_one() {
    let config_home = TempDir::new().unwrap();
    let dir = config_home.path().join("manga_downloader");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("config.json"),
        r#"{"manga_name": "one-piece", "workers": 500}"#,
    )
    .unwrap();

    cmd(&config_home)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("workers"));
}

/// A malformed config file is reported with its path.
#[test]
fn test_binary_malformed_config_reports_path() {
    let config_home = TempDir::new().unwrap();
    let config = config_home.path().join("custom.json");
    std::fs::write(&config, "{ not json").unwrap();

    cmd(&config_home)
        .arg("--config")
        .arg(&config)
        .args(["-M", "one-piece"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("custom.json"));
}

/// Workers outside 1..=100 are rejected by the argument parser.
#[test]
fn test_binary_workers_out_of_range_rejected() {
    let config_home = TempDir::new().unwrap();
    cmd(&config_home)
        .args(["-M", "one-piece", "-w", "0"])
        .assert()
        .failure();
}
