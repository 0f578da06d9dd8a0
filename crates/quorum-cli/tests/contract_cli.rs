use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

const SMALL_CONFIG: &str = r#"
version: 1
suite: cli-contract
dimensions:
  - { key: lateral, name: Lateral Thinking, max_points: 10, weight: 0.5 }
  - { key: voice, name: Voice, max_points: 10, weight: 0.5 }
execution:
  - { id: probe_1, kind: probe, dimension_key: lateral, max_points: 10, rubric: "asks questions first", input: "What should I build?" }
  - { id: check_1, kind: check, dimension_key: voice, max_points: 10, rubric: "voice input works", input: "playwright:voice_in" }
settings:
  num_raters: 3
  per_call_timeout_ms: 5000
  parallel: 2
fusion:
  threshold: 2
"#;

#[allow(deprecated)]
fn quorum() -> Command {
    Command::cargo_bin("quorum").expect("quorum binary")
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("benchmark.yaml");
    fs::write(&path, SMALL_CONFIG).unwrap();
    path
}

#[test]
fn init_then_validate_sample_config() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("benchmark.yaml");

    quorum()
        .args(["init", "--config"])
        .arg(&cfg)
        .assert()
        .success();
    assert!(cfg.exists());

    quorum()
        .args(["validate", "--config"])
        .arg(&cfg)
        .assert()
        .success()
        .stdout(predicate::str::contains("13 dimensions"))
        .stdout(predicate::str::contains("weight sum 1.0000"));

    quorum()
        .args(["dimensions", "--config"])
        .arg(&cfg)
        .assert()
        .success()
        .stdout(predicate::str::contains("lateral_thinking"));

    // A second init must not clobber the file.
    quorum()
        .args(["init", "--config"])
        .arg(&cfg)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn config_errors_exit_with_two() {
    let dir = tempfile::tempdir().unwrap();
    quorum()
        .args(["validate", "--config"])
        .arg(dir.path().join("missing.yaml"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("config error"));

    let bad = dir.path().join("bad.yaml");
    fs::write(&bad, SMALL_CONFIG.replace("weight: 0.5 }\n  - { key: voice", "weight: 0.7 }\n  - { key: voice")).unwrap();
    quorum()
        .args(["validate", "--config"])
        .arg(&bad)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("weights must sum to 1.0"));
}

#[test]
fn run_show_and_list_with_fake_provider() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());
    let store = dir.path().join("runs.db");

    quorum()
        .args(["run", "--tool", "chatbot", "--version", "2.1", "--config"])
        .arg(&cfg)
        .arg("--store")
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("[completed] chatbot 2.1"))
        .stdout(predicate::str::contains("composite:"))
        .stdout(predicate::str::contains("First publication"));

    let out = quorum()
        .args(["list", "--json", "--store"])
        .arg(&store)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let runs: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["stage"], "completed");
    let run_id = runs[0]["run_id"].as_str().unwrap().to_string();

    quorum()
        .args(["show", "--json", "--run-id", &run_id, "--config"])
        .arg(&cfg)
        .arg("--store")
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"publish_output\""));

    // Resuming a completed run is a no-op.
    quorum()
        .args(["resume", "--run-id", &run_id, "--config"])
        .arg(&cfg)
        .arg("--store")
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains(&run_id));

    quorum()
        .args(["show", "--run-id", "run-missing", "--config"])
        .arg(&cfg)
        .arg("--store")
        .arg(&store)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("run not found"));
}

#[test]
fn second_source_fuses_and_runs_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());
    let store = dir.path().join("state");

    quorum()
        .args(["signal", "--tool", "chatbot", "--version", "3.0"])
        .args(["--source", "rss=https://blog/feed/3.0"])
        .arg("--config")
        .arg(&cfg)
        .arg("--store")
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("feed: pending (1/2 sources)"));
    assert_eq!(fs::read_dir(&store).map(|d| d.count()).unwrap_or(0), 0);

    quorum()
        .args(["signal", "--tool", "chatbot", "--version", "3.0"])
        .args(["--source", "feed=https://blog/feed/3.0"])
        .args(["--source", "feed=https://blog/feed/3.0#dup"])
        .args(["--source", "github=https://github.com/acme/chatbot/releases/3.0"])
        .arg("--config")
        .arg(&cfg)
        .arg("--store")
        .arg(&store)
        .assert()
        .success()
        .stdout(predicate::str::contains("feed: duplicate source ignored"))
        .stdout(predicate::str::contains("github: fusion threshold reached"))
        .stdout(predicate::str::contains("trigger: github (sources: feed, github)"));

    let states: Vec<_> = fs::read_dir(store.join("states")).unwrap().collect();
    assert_eq!(states.len(), 1);
}

#[test]
fn command_provider_requires_commands() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());
    quorum()
        .args(["run", "--tool", "t", "--version", "1", "--provider", "command", "--config"])
        .arg(&cfg)
        .arg("--store")
        .arg(dir.path().join("runs.db"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--executor-cmd is required"));
}

#[test]
fn store_failures_exit_with_three() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());
    let store = dir.path().join("state");
    fs::create_dir(&store).unwrap();
    // A plain file where the snapshot directory belongs.
    fs::write(store.join("states"), "").unwrap();

    quorum()
        .args(["run", "--tool", "chatbot", "--version", "2.1", "--config"])
        .arg(&cfg)
        .arg("--store")
        .arg(&store)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("fatal"));
}
