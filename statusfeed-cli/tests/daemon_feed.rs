use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

const CONFIG: &str = r#"
groups:
  - name: open
    pipelines:
      - name: pipeline1
        stages:
          - name: build
"#;

const CONFIG_WITH_TEST_STAGE: &str = r#"
groups:
  - name: open
    pipelines:
      - name: pipeline1
        stages:
          - name: build
          - name: test
            jobs:
              - name: unit
"#;

fn statusfeed_bin() -> PathBuf {
    PathBuf::from(assert_cmd::cargo::cargo_bin!("statusfeed"))
}

struct DaemonProcess {
    child: Child,
    binary: PathBuf,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(binary: PathBuf, home: PathBuf) -> Self {
        let child = Command::new(&binary)
            .env("HOME", &home)
            .env("USERPROFILE", &home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        Self {
            child,
            binary,
            home,
        }
    }

    fn stop(&mut self) {
        let _ = run(&self.binary, &self.home, &["daemon", "stop"]);

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(binary: &Path, home: &Path, args: &[&str]) -> Output {
    Command::new(binary)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .args(args)
        .output()
        .expect("run statusfeed")
}

fn feed_names(binary: &Path, home: &Path) -> Option<Vec<String>> {
    let output = run(binary, home, &["feed", "--json"]);
    if !output.status.success() {
        return None;
    }
    let entries: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).ok()?;
    Some(
        entries
            .iter()
            .filter_map(|e| e["name"].as_str().map(str::to_string))
            .collect(),
    )
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn config_change_reaches_live_feed() {
    let home = TempDir::new().expect("home");
    let root = home.path().join(".statusfeed");
    fs::create_dir_all(&root).expect("mkdir root");
    fs::write(root.join("config.yaml"), CONFIG).expect("write config");

    let binary = statusfeed_bin();
    let mut daemon = DaemonProcess::start(binary.clone(), home.path().to_path_buf());
    assert!(
        wait_until(Duration::from_secs(5), || {
            feed_names(&binary, home.path()).is_some_and(|names| names == ["pipeline1 :: build"])
        }),
        "daemon did not serve the initial feed in time",
    );

    let progress = run(
        &binary,
        home.path(),
        &["progress", "pipeline1 :: build", "--label", "8", "--outcome", "Success"],
    );
    assert!(
        progress.status.success(),
        "progress failed: {}",
        String::from_utf8_lossy(&progress.stderr),
    );

    fs::write(root.join("config.yaml"), CONFIG_WITH_TEST_STAGE).expect("rewrite config");

    let expected = [
        "pipeline1 :: build",
        "pipeline1 :: test",
        "pipeline1 :: test :: unit",
    ];
    assert!(
        wait_until(Duration::from_secs(10), || {
            feed_names(&binary, home.path()).is_some_and(|names| names == expected)
        }),
        "daemon did not reconcile the updated configuration within timeout",
    );

    let output = run(&binary, home.path(), &["feed", "--json"]);
    let entries: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).expect("feed");
    assert_eq!(entries[0]["label"], "8", "cached status survives reconciliation");
    assert_eq!(entries[1]["state"], "placeholder");

    daemon.stop();
}
