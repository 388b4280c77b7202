//! Runs the binary over stdin/stdout the way a client would.

use assert_cmd::Command;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;

fn coldquery(db: &Path, extra_env: &[(&str, &str)]) -> Command {
    let mut cmd = Command::cargo_bin("coldquery").unwrap();
    cmd.env("COLDQUERY_DB_PATH", db)
        .env("COLDQUERY_AUTH_ENABLED", "false")
        .env("RUST_LOG", "warn");
    for (key, value) in extra_env {
        cmd.env(key, value);
    }
    cmd
}

fn frames(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_session_flow_over_stdio() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("stdio.db");

    let setup = [
        json!({ "id": 1, "action": "health" }),
        json!({ "id": 2, "action": "write", "sql": "CREATE TABLE t(v TEXT)", "autocommit": true }),
        json!({ "id": 3, "action": "begin" }),
    ];
    let input: String = setup.iter().map(|v| format!("{}\n", v)).collect();
    let output = coldquery(&db, &[]).write_stdin(input).output().unwrap();
    assert!(output.status.success());
    let out = frames(&output.stdout);
    assert_eq!(out.len(), 3);
    assert_eq!(out[0], json!({ "id": 1, "ok": true, "result": { "status": "ok" } }));
    assert_eq!(out[1]["ok"], json!(true));
    assert_eq!(out[2]["result"]["status"], json!("transaction started"));

    // the session died with the process; its id is unknown to a new one
    let session_id = out[2]["result"]["session_id"].as_str().unwrap().to_string();
    let input = format!(
        "{}\n",
        json!({ "id": 4, "action": "commit", "session_id": session_id })
    );
    let output = coldquery(&db, &[]).write_stdin(input).output().unwrap();
    let out = frames(&output.stdout);
    assert_eq!(out[0]["error"]["kind"], json!("session_not_found"));
}

#[test]
fn test_write_gate_over_stdio() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("stdio.db");

    let script = [
        json!({ "id": "a", "action": "write", "sql": "CREATE TABLE t(v TEXT)", "autocommit": true }),
        json!({ "id": "b", "action": "write", "sql": "INSERT INTO t VALUES (?1)", "params": ["x"] }),
        json!({ "id": "c", "action": "write", "sql": "INSERT INTO t VALUES (?1)", "params": ["x"], "autocommit": true }),
        json!({ "id": "d", "action": "read", "sql": "SELECT v FROM t" }),
    ];
    let input: String = script.iter().map(|v| format!("{}\n", v)).collect();
    let output = coldquery(&db, &[]).write_stdin(input).output().unwrap();
    let out = frames(&output.stdout);

    assert_eq!(out[1]["id"], json!("b"));
    assert_eq!(out[1]["error"]["kind"], json!("access_denied"));
    assert_eq!(out[2]["result"]["row_count"], json!(1));
    assert_eq!(out[3]["result"]["rows"], json!([{ "v": "x" }]));
}

#[test]
fn test_auth_gate_from_environment() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("stdio.db");
    let script = [
        json!({ "id": 1, "action": "read", "sql": "SELECT 1 AS one" }),
        json!({ "id": 2, "action": "auth_unlock", "token": "wrong" }),
        json!({ "id": 3, "action": "auth_unlock", "token": "s3cret" }),
        json!({ "id": 4, "action": "read", "sql": "SELECT 1 AS one" }),
    ];
    let input: String = script.iter().map(|v| format!("{}\n", v)).collect();
    let output = coldquery(
        &db,
        &[("COLDQUERY_AUTH_ENABLED", "true"), ("COLDQUERY_AUTH_TOKEN", "s3cret")],
    )
    .write_stdin(input)
    .output()
    .unwrap();
    let out = frames(&output.stdout);

    assert_eq!(out[0]["error"]["kind"], json!("auth_required"));
    assert_eq!(out[1]["ok"], json!(false));
    assert_eq!(out[2]["result"]["status"], json!("unlocked"));
    assert_eq!(out[3]["result"]["rows"], json!([{ "one": 1 }]));
}

#[test]
fn test_invalid_configuration_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("stdio.db");
    coldquery(&db, &[("COLDQUERY_POOL_SIZE", "0")])
        .write_stdin("")
        .assert()
        .failure()
        .code(1);
    Command::cargo_bin("coldquery")
        .unwrap()
        .arg("--bogus")
        .assert()
        .failure()
        .code(2);
}
