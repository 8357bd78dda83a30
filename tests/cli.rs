use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn rpmrepo(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("rpmrepo").unwrap();
    cmd.arg("--config")
        .arg(config)
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

fn empty_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("rpmrepo.conf");
    fs::write(&path, "").unwrap();
    path
}

#[test]
fn test_keygen_then_index_empty_repository() {
    let dir = tempfile::tempdir().unwrap();
    let config = empty_config(dir.path());
    let keys = dir.path().join("keys");
    let repo = dir.path().join("repo");

    rpmrepo(&config)
        .args(["keygen", "--name", "Test User", "--email", "test@example.org", "--output"])
        .arg(&keys)
        .assert()
        .success()
        .stdout(predicate::str::contains("ED25519:SHA256:"));

    rpmrepo(&config)
        .arg("index")
        .arg(&repo)
        .arg("--key")
        .arg(keys.join("signing-key.secret"))
        .assert()
        .success()
        .stdout(predicate::str::contains("(updated)"));

    assert!(repo.join("repodata/repomd.xml").exists());
    assert!(repo.join("repodata/repomd.xml.asc").exists());
    assert!(repo.join("repodata/repomd.xml.key").exists());

    rpmrepo(&config)
        .arg("index")
        .arg(&repo)
        .arg("--key")
        .arg(keys.join("signing-key.secret"))
        .assert()
        .success()
        .stdout(predicate::str::contains("(up to date)"));
}

#[test]
fn test_index_meta_repository() {
    let dir = tempfile::tempdir().unwrap();
    let config = empty_config(dir.path());
    let keys = dir.path().join("keys");
    let meta = dir.path().join("meta");
    fs::create_dir_all(meta.join("rhel5")).unwrap();

    rpmrepo(&config)
        .args(["keygen", "--name", "Test User", "--email", "test@example.org", "--output"])
        .arg(&keys)
        .assert()
        .success();

    rpmrepo(&config)
        .arg("index")
        .arg(&meta)
        .arg("--meta")
        .arg("--key")
        .arg(keys.join("signing-key.secret"))
        .assert()
        .success()
        .stdout(predicate::str::contains("2 sub-repositories indexed"));

    assert!(meta.join("common/repodata/repomd.xml").exists());
    assert!(meta.join("rhel5/repodata/repomd.xml").exists());
}

#[test]
fn test_index_without_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = empty_config(dir.path());

    rpmrepo(&config)
        .arg("index")
        .arg(dir.path().join("repo"))
        .arg("--key")
        .arg(dir.path().join("missing.secret"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Signing key not found"));
}

#[test]
fn test_list_json_empty_repository() {
    let dir = tempfile::tempdir().unwrap();
    let config = empty_config(dir.path());

    rpmrepo(&config)
        .arg("list")
        .arg(dir.path())
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

#[test]
fn test_copy_rejects_name_and_regex_together() {
    let dir = tempfile::tempdir().unwrap();
    let config = empty_config(dir.path());

    rpmrepo(&config)
        .arg("copy")
        .arg(dir.path().join("a"))
        .arg(dir.path().join("b"))
        .args(["--name", "jicmp", "--regex", "^jicmp"])
        .assert()
        .failure();
}

#[test]
fn test_copy_rejects_invalid_regex() {
    let dir = tempfile::tempdir().unwrap();
    let config = empty_config(dir.path());

    rpmrepo(&config)
        .arg("copy")
        .arg(dir.path().join("a"))
        .arg(dir.path().join("b"))
        .args(["--regex", "("])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid package filter"));
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("broken.conf");
    fs::write(&config, "[deltas\n").unwrap();

    rpmrepo(&config)
        .arg("list")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config"));
}
