use std::fs;

use assert_cmd::Command;
use assert_cmd::cargo;
use mockito::Server;
use predicates::prelude::*;
use tempfile::tempdir;

fn provi(root: &std::path::Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("provi"));
    cmd.env_remove("PROVI_BIN_DIR")
        .env_remove("PROVI_REGISTRY")
        .env_remove("PROVI_REGISTRY_URL")
        .env("PROVI_ROOT", root);
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::new(cargo::cargo_bin!("provi"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("clean"));
}

#[test]
fn test_list_prints_lockfile_rows() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("lock.json"),
        r#"{"packages":[
            {"source_id":"pkg:cargo/ripgrep","version":"14.1.0"},
            {"source_id":"npm:typescript","version":"latest"}
        ]}"#,
    )
    .unwrap();

    provi(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("cargo:ripgrep  14.1.0"))
        .stdout(predicate::str::contains("npm:typescript  latest"));
}

#[test]
fn test_list_of_empty_root() {
    let dir = tempdir().unwrap();
    provi(dir.path()).arg("list").assert().success().stdout("");
}

#[test]
fn test_invalid_identifier_fails_without_side_effects() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");

    provi(&root)
        .args(["install", "pkg:noslash"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid source identifier"));
    assert!(!root.join("packages").exists());

    provi(&root)
        .args(["install", "homebrew:wget"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown provider"));
}

#[test]
fn test_unknown_provider_name_for_sync() {
    let dir = tempdir().unwrap();
    provi(dir.path())
        .args(["sync", "nosuch"])
        .assert()
        .failure();
}

#[test]
fn test_sync_and_clean_of_empty_generic_provider() {
    let dir = tempdir().unwrap();
    provi(dir.path())
        .args(["sync", "generic"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Syncing generic"));
    assert!(dir.path().join("packages/generic").is_dir());

    provi(dir.path()).arg("clean").assert().success();
}

#[test]
fn test_registry_refresh_requires_url() {
    let dir = tempdir().unwrap();
    provi(dir.path())
        .args(["registry", "refresh"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No registry URL"));
}

#[test]
fn test_registry_refresh_downloads_and_stores() {
    // --- Setup ---
    let mut server = Server::new();
    let _registry = server
        .mock("GET", "/registry.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"name":"ripgrep","version":"14.1.0","source":{"id":"github:BurntSushi/ripgrep"}}]"#)
        .create();
    let dir = tempdir().unwrap();

    // --- Refresh ---
    provi(dir.path())
        .args(["registry", "refresh", "--registry-url"])
        .arg(format!("{}/registry.json", server.url()))
        .assert()
        .success()
        .stdout(predicate::str::contains("1 entries"));

    // --- Verify ---
    let stored = fs::read_to_string(dir.path().join("registry.json")).unwrap();
    assert!(stored.contains("github:BurntSushi/ripgrep"));
}
