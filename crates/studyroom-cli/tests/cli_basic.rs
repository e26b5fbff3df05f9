//! Basic CLI E2E tests.
//!
//! Each test points the CLI at its own data directory through
//! `STUDYROOM_DATA_DIR` and inspects stdout.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(data_dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_studyroom-cli"))
        .args(args)
        .env("STUDYROOM_DATA_DIR", data_dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

/// Feed `lines` to `daemon` on stdin and return every JSON line it printed.
fn run_daemon(data_dir: &Path, lines: &[&str]) -> Vec<serde_json::Value> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_studyroom-cli"))
        .arg("daemon")
        .env("STUDYROOM_DATA_DIR", data_dir)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn daemon");

    {
        let mut stdin = child.stdin.take().unwrap();
        for line in lines {
            writeln!(stdin, "{line}").unwrap();
        }
    }

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success(), "daemon exited with {:?}", output.status);
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| serde_json::from_str(l).expect("daemon output is JSON lines"))
        .collect()
}

fn types(output: &[serde_json::Value]) -> Vec<&str> {
    output.iter().filter_map(|v| v["type"].as_str()).collect()
}

#[test]
fn test_config_path_uses_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(dir.path(), &["config", "path"]);
    assert_eq!(code, 0);
    assert!(stdout.trim().ends_with("config.toml"));
    assert!(stdout.contains(&*dir.path().to_string_lossy()));
}

#[test]
fn test_config_set_then_get() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(dir.path(), &["config", "set", "timer.focus_minutes", "45"]);
    assert_eq!(code, 0);
    let (stdout, _, code) = run_cli(dir.path(), &["config", "get", "timer.focus_minutes"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "45");
}

#[test]
fn test_config_unknown_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(dir.path(), &["config", "set", "timer.nope", "1"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_config_show_is_json() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(dir.path(), &["config", "show"]);
    assert_eq!(code, 0);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["recovery"]["stale_threshold_secs"], 120);
}

#[test]
fn test_daemon_emits_events_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_daemon(
        dir.path(),
        &[
            r#"{"cmd":"connect","conn":"c1","user":"alice","tz":"Europe/Paris"}"#,
            r#"{"cmd":"settings","user":"alice","focus_minutes":50,"break_minutes":10}"#,
            r#"{"cmd":"skip","user":"alice"}"#,
            r#"{"cmd":"view","user":"alice"}"#,
            r#"{"cmd":"bogus"}"#,
        ],
    );

    let kinds = types(&output);
    assert_eq!(kinds[0], "recovery_report");
    assert!(kinds.contains(&"settings_changed"));
    assert!(kinds.contains(&"user_data_changed"));
    assert!(kinds.contains(&"error"));

    let view = output.iter().find(|v| v["type"] == "view").unwrap();
    assert_eq!(view["view"]["state"]["mode"], "break");
    assert_eq!(view["view"]["state"]["remaining_seconds"], 600);
    assert_eq!(view["view"]["timezone"], "Europe/Paris");

    let (stdout, _, code) = run_cli(dir.path(), &["snapshot", "list"]);
    assert_eq!(code, 0);
    let rows: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows[0]["user_id"], "alice");

    let (stdout, _, code) = run_cli(dir.path(), &["stats", "today", "--user", "alice"]);
    assert_eq!(code, 0);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["state"]["mode"], "break");
    assert_eq!(stats["timezone"], "Europe/Paris");
}

#[test]
fn test_daemon_refuses_mode_change_mid_session() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_daemon(
        dir.path(),
        &[
            r#"{"cmd":"connect","conn":"c1","user":"bob"}"#,
            r#"{"cmd":"start","user":"bob"}"#,
            r#"{"cmd":"change_mode","user":"bob","mode":"break"}"#,
        ],
    );
    assert!(output
        .iter()
        .any(|v| v["type"] == "error" && v["user_id"] == "bob"));
}

#[test]
fn test_daemon_restores_previous_state() {
    let dir = tempfile::tempdir().unwrap();
    run_daemon(
        dir.path(),
        &[
            r#"{"cmd":"connect","conn":"c1","user":"carol"}"#,
            r#"{"cmd":"skip","user":"carol"}"#,
        ],
    );
    let output = run_daemon(dir.path(), &[r#"{"cmd":"view","user":"carol"}"#]);

    let report = &output[0];
    assert_eq!(report["type"], "recovery_report");
    assert_eq!(report["report"]["restored_count"], 1);
    let view = output.iter().find(|v| v["type"] == "view").unwrap();
    assert_eq!(view["view"]["state"]["mode"], "break");
    assert_eq!(view["view"]["online"], false);
}

#[test]
fn test_stats_for_unknown_user_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(dir.path(), &["stats", "history", "--user", "nobody"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("no snapshot"));
}

#[test]
fn test_snapshot_remove() {
    let dir = tempfile::tempdir().unwrap();
    run_daemon(dir.path(), &[r#"{"cmd":"connect","conn":"c1","user":"dave"}"#]);
    let (_, _, code) = run_cli(dir.path(), &["snapshot", "remove", "dave"]);
    assert_eq!(code, 0);
    let (_, _, code) = run_cli(dir.path(), &["snapshot", "inspect", "dave"]);
    assert_eq!(code, 1);
}
