//! Integration tests for the CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn sample_project() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("sample_project")
}

fn packument(name: &str, latest: &str) -> String {
    format!(
        r#"{{"name":"{name}","dist-tags":{{"latest":"{latest}"}},"versions":{{"{latest}":{{"license":"MIT"}}}}}}"#
    )
}

#[test]
fn test_cli_outdated_help() {
    let mut cmd = Command::cargo_bin("deps-inspect").unwrap();
    cmd.arg("outdated").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "Compare declared dependencies with the latest registry versions",
        ));
}

#[test]
fn test_cli_structure_help() {
    let mut cmd = Command::cargo_bin("deps-inspect").unwrap();
    cmd.arg("structure").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Report dependency cycles"));
}

#[test]
fn test_cli_cache_help() {
    let mut cmd = Command::cargo_bin("deps-inspect").unwrap();
    cmd.arg("cache").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Inspect or clear the registry cache file"));
}

#[test]
fn test_cli_rejects_unknown_fail_on() {
    let mut cmd = Command::cargo_bin("deps-inspect").unwrap();
    cmd.arg("outdated").arg("--fail-on").arg("huge");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Unknown update class"));
}

#[test]
fn test_cli_structure_sample_project() {
    let mut cmd = Command::cargo_bin("deps-inspect").unwrap();
    cmd.arg("structure").arg("--project-path").arg(sample_project());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("es5-ext -> es6-iterator -> es5-ext"))
        .stdout(predicate::str::contains("debug: 2.6.9, 4.3.4"))
        .stdout(predicate::str::contains("ms: 2.0.0, 2.1.2"));
}

#[test]
fn test_cli_structure_json_and_fail_on_cycles() {
    let mut cmd = Command::cargo_bin("deps-inspect").unwrap();
    cmd.arg("structure")
        .arg("--project-path")
        .arg(sample_project())
        .arg("--json")
        .arg("--fail-on-cycles");

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("\"cycles\""))
        .stdout(predicate::str::contains("\"duplicates\""));
}

#[test]
fn test_cli_missing_manifest() {
    let dir = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("deps-inspect").unwrap();
    cmd.arg("structure").arg("--project-path").arg(dir.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("package.json"));
}

#[test]
fn test_cli_outdated_against_mock_registry() {
    let mut server = mockito::Server::new();
    let _express = server
        .mock("GET", "/express")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(packument("express", "4.18.2"))
        .create();
    let _debug = server
        .mock("GET", "/debug")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(packument("debug", "4.3.4"))
        .create();
    let _es5_ext = server
        .mock("GET", "/es5-ext")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(packument("es5-ext", "0.10.64"))
        .create();

    let mut cmd = Command::cargo_bin("deps-inspect").unwrap();
    cmd.env_remove("NPM_TOKEN")
        .arg("outdated")
        .arg("--project-path")
        .arg(sample_project())
        .arg("--registry")
        .arg(server.url())
        .arg("--no-cache")
        .arg("--fail-on")
        .arg("minor");

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Minor behind: 1"))
        .stdout(predicate::str::contains("Patch behind: 1"))
        .stderr(predicate::str::contains("express 4.17.1 -> 4.18.2"));
}

#[test]
fn test_cli_cache_stats_and_clear() {
    let dir = TempDir::new().unwrap();
    let cache_file = dir.path().join("registry-cache.json");

    let mut cmd = Command::cargo_bin("deps-inspect").unwrap();
    cmd.arg("cache")
        .arg("stats")
        .arg("--cache-file")
        .arg(&cache_file);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("not created yet"));

    std::fs::write(&cache_file, r#"{"format_version":1,"entries":[]}"#).unwrap();

    let mut cmd = Command::cargo_bin("deps-inspect").unwrap();
    cmd.arg("cache")
        .arg("clear")
        .arg("--cache-file")
        .arg(&cache_file);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Removed"));

    assert!(!cache_file.exists());
}
