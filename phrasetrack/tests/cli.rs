//! CLI smoke tests

use assert_cmd::Command;

#[test]
fn backfill_help() {
    Command::cargo_bin("phrasetrack-backfill")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn watch_help() {
    Command::cargo_bin("phrasetrack-watch")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn backfill_fails_cleanly_without_projects_dir() {
    let tmp = tempfile::TempDir::new().unwrap();
    let missing = tmp.path().join("does-not-exist");

    Command::cargo_bin("phrasetrack-backfill")
        .unwrap()
        .env("CLAUDE_PROJECTS", &missing)
        .env("XDG_DATA_HOME", tmp.path().join("data"))
        .env("XDG_STATE_HOME", tmp.path().join("state"))
        .env("XDG_CONFIG_HOME", tmp.path().join("config"))
        .assert()
        .failure();
}
