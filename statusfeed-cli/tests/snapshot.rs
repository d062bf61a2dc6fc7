use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

const CONFIG: &str = r#"
admins:
  users: [root]
groups:
  - name: open
    pipelines:
      - name: pipeline1
        stages:
          - name: build
            jobs:
              - name: compile
              - name: lint
  - name: locked
    authorization:
      view:
        users: [user3]
        roles: [release]
    pipelines:
      - name: pipeline2
        stages:
          - name: deploy
"#;

const HISTORY: &str = r#"{
  "recorded_at": "2026-10-01T09:00:00Z",
  "records": [
    {
      "name": "pipeline2 :: deploy",
      "activity": "Sleeping",
      "outcome": "Failure",
      "label": "77",
      "last_updated": "2026-10-01T08:59:00Z",
      "web_url": "http://ci/pipeline2/77"
    },
    {
      "name": "pipeline2 :: retired",
      "activity": "Sleeping",
      "outcome": "Success",
      "label": "3",
      "last_updated": "2026-09-01T08:59:00Z",
      "web_url": "http://ci/pipeline2/3"
    }
  ]
}"#;

fn statusfeed_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("statusfeed"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn home_with_files() -> TempDir {
    let home = TempDir::new().expect("home");
    let root = home.path().join(".statusfeed");
    fs::create_dir_all(&root).expect("mkdir root");
    fs::write(root.join("config.yaml"), CONFIG).expect("write config");
    fs::write(root.join("history.json"), HISTORY).expect("write history");
    home
}

fn snapshot_json(home: &Path, extra: &[&str]) -> Vec<serde_json::Value> {
    let output = statusfeed_cmd(home)
        .arg("snapshot")
        .arg("--json")
        .args(extra)
        .output()
        .expect("run snapshot");
    assert!(
        output.status.success(),
        "snapshot failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("snapshot JSON")
}

fn names(entries: &[serde_json::Value]) -> Vec<&str> {
    entries
        .iter()
        .map(|e| e["name"].as_str().expect("name"))
        .collect()
}

#[test]
fn snapshot_orders_entries_in_configuration_order() {
    let home = home_with_files();

    let entries = snapshot_json(home.path(), &[]);

    assert_eq!(
        names(&entries),
        [
            "pipeline1 :: build",
            "pipeline1 :: build :: compile",
            "pipeline1 :: build :: lint",
            "pipeline2 :: deploy",
        ]
    );
    assert_eq!(entries[0]["state"], "placeholder");
    assert_eq!(entries[3]["state"], "known");
    assert_eq!(entries[3]["label"], "77");
}

#[test]
fn snapshot_filters_by_user_and_role() {
    let home = home_with_files();

    let guest = snapshot_json(home.path(), &["--user", "guest"]);
    assert_eq!(guest.len(), 3);

    let releaser = snapshot_json(home.path(), &["--user", "guest", "--role", "RELEASE"]);
    assert_eq!(releaser.len(), 4);

    let admin = snapshot_json(home.path(), &["--user", "Root"]);
    assert_eq!(admin.len(), 4);
}

#[test]
fn snapshot_for_single_pipeline() {
    let home = home_with_files();

    let entries = snapshot_json(home.path(), &["--pipeline", "PIPELINE2"]);

    assert_eq!(names(&entries), ["pipeline2 :: deploy"]);
}

#[test]
fn snapshot_unknown_pipeline_fails() {
    let home = home_with_files();

    statusfeed_cmd(home.path())
        .args(["snapshot", "--pipeline", "ghost"])
        .assert()
        .failure()
        .stderr(contains("ghost"));
}

#[test]
fn snapshot_with_explicit_paths() {
    let home = TempDir::new().expect("home");
    let elsewhere = TempDir::new().expect("elsewhere");
    let config = elsewhere.path().join("cruise.yaml");
    fs::write(&config, CONFIG).expect("write config");

    let entries = snapshot_json(
        home.path(),
        &[
            "--config",
            config.to_str().expect("utf8"),
            "--history",
            elsewhere.path().join("missing.json").to_str().expect("utf8"),
        ],
    );

    assert_eq!(entries.len(), 4);
    assert!(entries.iter().all(|e| e["state"] == "placeholder"));
}

#[test]
fn snapshot_table_lists_entries() {
    let home = home_with_files();

    statusfeed_cmd(home.path())
        .arg("snapshot")
        .assert()
        .success()
        .stdout(contains("4 entries"))
        .stdout(contains("pipeline1 :: build :: lint"));
}

#[test]
fn snapshot_without_config_reports_path() {
    let home = TempDir::new().expect("home");

    statusfeed_cmd(home.path())
        .arg("snapshot")
        .assert()
        .failure()
        .stderr(contains("config.yaml"));
}

#[test]
fn progress_rejects_malformed_name() {
    let home = TempDir::new().expect("home");

    statusfeed_cmd(home.path())
        .args(["progress", "just-a-pipeline", "--label", "1"])
        .assert()
        .failure()
        .stderr(contains("invalid project name"));
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");

    statusfeed_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
}
