//! CLI command integration tests.
//! Each test uses a temp directory via KINDLE_DATA_DIR for full isolation.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn kindle_cmd(data_dir: &TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("kindle").unwrap();
    cmd.env("KINDLE_DATA_DIR", data_dir.path());
    cmd
}

/// Extract the value after a label in `stats` output (e.g. "nodes:").
fn extract_stat_value<'a>(stdout: &'a str, label: &str) -> &'a str {
    stdout
        .lines()
        .find(|l| l.trim_start().starts_with(label))
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("")
}

#[test]
fn stats_fresh_db() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .args(["stats", "--instance", "test-stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nodes:        0"))
        .stdout(predicate::str::contains("links:        0"))
        .stdout(predicate::str::contains("last_tick:    -"));
}

#[test]
fn seed_then_stats() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .args(["seed", "--instance", "seeded", "--nodes", "30", "--clusters", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("seeded 30 nodes"));

    let output = kindle_cmd(&dir)
        .args(["stats", "--instance", "seeded"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(extract_stat_value(&stdout, "nodes:"), "30");
    assert_ne!(extract_stat_value(&stdout, "links:"), "0");
}

#[test]
fn tick_with_stimulus_logs_events() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .args(["seed", "--instance", "ticked", "--nodes", "20"])
        .assert()
        .success();

    kindle_cmd(&dir)
        .args([
            "tick", "--instance", "ticked", "-s", "n0=0.9", "-s", "n1", "--count", "3",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("tick 1:"))
        .stdout(predicate::str::contains("tick 3:"));

    kindle_cmd(&dir)
        .args(["events", "--instance", "ticked", "--limit", "50"])
        .assert()
        .success()
        .stdout(predicate::str::contains("injection"));

    let output = kindle_cmd(&dir)
        .args(["stats", "--instance", "ticked"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_ne!(extract_stat_value(&stdout, "last_tick:"), "-");
}

#[test]
fn tick_numbering_continues_between_invocations() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .args(["seed", "--instance", "resumed", "--nodes", "10", "--clusters", "2"])
        .assert()
        .success();

    kindle_cmd(&dir)
        .args(["tick", "--instance", "resumed", "-s", "n0=0.5", "--count", "3"])
        .assert()
        .success();
    kindle_cmd(&dir)
        .args(["tick", "--instance", "resumed", "--count", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tick 4:"))
        .stdout(predicate::str::contains("tick 5:"))
        .stdout(predicate::str::contains("tick 1:").not());

    let output = kindle_cmd(&dir)
        .args(["stats", "--instance", "resumed"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(extract_stat_value(&stdout, "last_tick:"), "5");
}

#[test]
fn tick_json_output() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .args(["seed", "--instance", "json", "--nodes", "10", "--clusters", "2"])
        .assert()
        .success();

    let output = kindle_cmd(&dir)
        .args(["tick", "--instance", "json", "-s", "n0=0.5", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().expect("one line per tick");
    let value: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(value["tick"], 1);
    assert_eq!(value["stimuli"], 1);
}

#[test]
fn tick_unknown_node_warns() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .args(["tick", "--instance", "empty", "-s", "ghost=0.5"])
        .assert()
        .success()
        .stderr(predicate::str::contains("unknown node 'ghost'"));
}

#[test]
fn tick_rejects_bad_score() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .args(["tick", "--instance", "bad", "-s", "n0=lots"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid score"));
}

#[test]
fn export_import_roundtrip() {
    let dir = TempDir::new().unwrap();
    let export_path = dir.path().join("graph.json");

    kindle_cmd(&dir)
        .args(["seed", "--instance", "src", "--nodes", "15", "--clusters", "3"])
        .assert()
        .success();

    kindle_cmd(&dir)
        .args(["export", "--instance", "src"])
        .arg(&export_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("exported to"));

    let json = std::fs::read_to_string(&export_path).unwrap();
    assert!(json.contains("\"nodes\""));

    kindle_cmd(&dir)
        .args(["import", "--instance", "dst"])
        .arg(&export_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("nodes=15"));
}

#[test]
fn import_rejects_malformed_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    kindle_cmd(&dir)
        .args(["import", "--instance", "broken"])
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn check_config_defaults_when_missing() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .args(["check-config", "--instance", "fresh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("defaults apply"));
}

#[test]
fn check_config_valid_and_invalid() {
    let dir = TempDir::new().unwrap();
    let good = dir.path().join("good.toml");
    std::fs::write(&good, "[decay]\nbase_rate = 0.1\n").unwrap();
    kindle_cmd(&dir)
        .arg("check-config")
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::contains("config ok"));

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[decay]\nbase_rate = 2.5\n").unwrap();
    kindle_cmd(&dir)
        .arg("check-config")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config"));
}

#[test]
fn init_config_refuses_overwrite() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .args(["init-config", "--instance", "cfg"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    let path = dir.path().join("instances/cfg/config.toml");
    assert!(path.exists());

    kindle_cmd(&dir)
        .args(["init-config", "--instance", "cfg"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    kindle_cmd(&dir)
        .args(["init-config", "--instance", "cfg", "--force"])
        .assert()
        .success();

    kindle_cmd(&dir)
        .args(["check-config", "--instance", "cfg"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config ok"));
}

#[test]
fn instances_lists_opened() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .arg("instances")
        .assert()
        .success()
        .stdout(predicate::str::contains("(no instances)"));

    for name in ["beta", "alpha"] {
        kindle_cmd(&dir)
            .args(["stats", "--instance", name])
            .assert()
            .success();
    }

    kindle_cmd(&dir)
        .arg("instances")
        .assert()
        .success()
        .stdout(predicate::str::diff("alpha\nbeta\n"));
}

#[test]
fn events_empty() {
    let dir = TempDir::new().unwrap();
    kindle_cmd(&dir)
        .args(["events", "--instance", "quiet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(no events)"));
}
