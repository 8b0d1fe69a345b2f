use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};

fn simtel() -> Command {
    Command::cargo_bin("simtel").unwrap()
}

fn write_config(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

const PRODUCER: &str = r#"{
    "communication": { "format": "msgpack", "host": "127.0.0.1", "port": 0, "topic": "sim" },
    "timestep": 0.01,
    "total_time": 1.0,
    "continuous": { "reward_in": { "keys": ["curr", "mean"] } },
    "events": { "pattern_in": { "keys": 10, "aggregate": 4 } }
}"#;

const CONSUMER: &str = r#"{
    "subscriptions": [ { "host": "127.0.0.1", "port": 8001, "topic": "sim", "format": "msgpack" } ],
    "display_window": 5.0
}"#;

// =============================================================================
// GENERAL
// =============================================================================

#[test]
fn test_no_args_shows_help() {
    simtel()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_flag() {
    simtel()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("simtel"));
}

#[test]
fn test_help_flag() {
    simtel()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("telemetry"));
}

// =============================================================================
// CODECS SUBCOMMAND
// =============================================================================

#[test]
fn test_codecs_lists_every_format() {
    simtel()
        .arg("codecs")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"json\s+text \(default\)").unwrap())
        .stdout(predicate::str::contains("simd-json"))
        .stdout(predicate::str::contains("msgpack"));
}

#[test]
fn test_codecs_json() {
    let output = simtel().args(["codecs", "--json"]).assert().success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let codecs = parsed["codecs"].as_array().unwrap();
    assert_eq!(codecs.len(), 3);
    let binary: Vec<&str> = codecs
        .iter()
        .filter(|c| c["binary"] == true)
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(binary, vec!["msgpack"]);
}

// =============================================================================
// CHECK SUBCOMMAND
// =============================================================================

#[test]
fn test_check_valid_producer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "producer.json", PRODUCER);

    simtel()
        .args(["check", "--producer"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("pattern_in"));
}

#[test]
fn test_check_consumer_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "consumer.json", CONSUMER);

    let output = simtel()
        .args(["check", "--json", "--consumer"])
        .arg(&path)
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["valid"], true);
    assert_eq!(parsed["role"], "consumer");
    assert_eq!(parsed["display_window"], 5.0);
}

#[test]
fn test_check_unknown_format_is_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "producer.json",
        r#"{ "communication": { "format": "yaml" }, "timestep": 0.01 }"#,
    );

    simtel()
        .args(["check", "--producer"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("json, simd-json, msgpack"));
}

#[test]
fn test_check_missing_file_fails() {
    simtel()
        .args(["check", "--consumer", "/nonexistent/consumer.json"])
        .assert()
        .code(2);
}

#[test]
fn test_check_requires_a_config() {
    simtel().arg("check").assert().failure();
}

// =============================================================================
// SYNTHETIC AND MONITOR SUBCOMMANDS
// =============================================================================

#[test]
fn test_synthetic_publishes_requested_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "producer.json", PRODUCER);
    let stats = dir.path().join("stats.json");

    simtel()
        .args(["synthetic", "--ticks", "3", "--no-pacing", "--seed", "42", "--config"])
        .arg(&config)
        .arg("--stats-out")
        .arg(&stats)
        .assert()
        .success()
        .stdout(predicate::str::contains("Published 3 ticks"));

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&stats).unwrap()).unwrap();
    assert_eq!(written["ticks"], 3);
    assert_eq!(written["last_sim_time"], 0.03);
}

#[test]
fn test_synthetic_rejects_bad_probability() {
    simtel()
        .args(["synthetic", "--config", "unused.json", "--event-probability", "1.5"])
        .assert()
        .code(2);
}

#[test]
fn test_monitor_config_from_env() {
    simtel()
        .arg("monitor")
        .env("SIMTEL_CONSUMER_CONFIG", "/nonexistent/consumer.json")
        .assert()
        .code(2);
}

#[test]
fn test_monitor_rejects_bad_duration() {
    for duration in ["--duration=-1", "--duration=NaN", "--duration=inf"] {
        simtel()
            .args(["monitor", "--config", "unused.json", duration])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("--duration"));
    }
}
