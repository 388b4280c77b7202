//! End-to-end session behavior against a real SQLite database.

mod common;

use coldquery::actions::{Action, ActionRequest};
use coldquery::core::executor::SessionExecutor;
use coldquery::core::db::TransactionState;
use common::Fixture;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_committed_session_is_visible_to_pool() {
    let fx = Fixture::new().await;
    let id = fx.begin().await;
    fx.write_in(&id, "CREATE TABLE t(v TEXT)").await.unwrap();
    fx.write_in(&id, "INSERT INTO t VALUES ('a')").await.unwrap();

    let out = fx.end(Action::Commit, &id).await.unwrap();
    assert_eq!(out["status"], json!("transaction committed"));

    let read = fx.read("SELECT v FROM t").await.unwrap();
    assert_eq!(read["rows"], json!([{ "v": "a" }]));
    assert_eq!(read["row_count"], json!(1));
}

#[tokio::test]
async fn test_rolled_back_ddl_never_existed() {
    let fx = Fixture::new().await;
    let id = fx.begin().await;
    fx.write_in(&id, "CREATE TABLE t(v TEXT)").await.unwrap();
    fx.write_in(&id, "INSERT INTO t VALUES ('a')").await.unwrap();

    let out = fx.end(Action::Rollback, &id).await.unwrap();
    assert_eq!(out["status"], json!("transaction rolled back"));

    let err = fx.read("SELECT v FROM t").await.unwrap_err();
    assert_eq!(err.kind(), "statement_error");
    assert!(err.to_string().contains("no such table"));
}

#[tokio::test]
async fn test_write_gate_then_autocommit() {
    let fx = Fixture::new().await;
    fx.write_now("CREATE TABLE t(v INTEGER)").await.unwrap();

    let denied = fx
        .call(ActionRequest::new(Action::Write).with_sql("INSERT INTO t VALUES (1)"))
        .await
        .unwrap_err();
    assert_eq!(denied.kind(), "access_denied");

    let out = fx.write_now("INSERT INTO t VALUES (1)").await.unwrap();
    assert_eq!(out["row_count"], json!(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_begins_get_distinct_ids() {
    let fx = Fixture::new().await;
    let (a, b) = tokio::join!(fx.begin(), fx.begin());
    assert_ne!(a, b);
    assert_eq!(fx.ctx.session_manager().live_count(), 2);
}

#[tokio::test]
async fn test_uncommitted_writes_are_isolated() {
    let fx = Fixture::new().await;
    fx.write_now("CREATE TABLE t(v INTEGER)").await.unwrap();

    let id = fx.begin().await;
    fx.write_in(&id, "INSERT INTO t VALUES (1)").await.unwrap();

    let inside = fx.read_in(&id, "SELECT count(*) AS n FROM t").await.unwrap();
    assert_eq!(inside["rows"][0]["n"], json!(1));
    let outside = fx.read("SELECT count(*) AS n FROM t").await.unwrap();
    assert_eq!(outside["rows"][0]["n"], json!(0));

    fx.end(Action::Commit, &id).await.unwrap();
    let after = fx.read("SELECT count(*) AS n FROM t").await.unwrap();
    assert_eq!(after["rows"][0]["n"], json!(1));
}

#[tokio::test]
async fn test_repeated_reads_are_identical() {
    let fx = Fixture::new().await;
    fx.write_now("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)").await.unwrap();
    fx.write_now("INSERT INTO t(v) VALUES ('x'), ('y')").await.unwrap();

    let request = || {
        ActionRequest::new(Action::Read)
            .with_sql("SELECT id, v FROM t WHERE id > ?1 ORDER BY id")
            .with_params(vec![json!(0)])
    };
    let first = fx.call(request()).await.unwrap();
    let second = fx.call(request()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first["row_count"], json!(2));
}

#[tokio::test]
async fn test_unknown_and_ended_sessions_are_not_found() {
    let fx = Fixture::new().await;
    fx.write_now("CREATE TABLE t(v INTEGER)").await.unwrap();

    let err = fx.read_in("00000000-0000-4000-8000-000000000000", "SELECT 1").await.unwrap_err();
    assert_eq!(err.kind(), "session_not_found");
    assert_eq!(fx.ctx.session_manager().live_count(), 0);

    let id = fx.begin().await;
    fx.end(Action::Commit, &id).await.unwrap();
    for action in [Action::Commit, Action::Rollback] {
        assert_eq!(fx.end(action, &id).await.unwrap_err().kind(), "session_not_found");
    }
    let err = fx.write_in(&id, "INSERT INTO t VALUES (1)").await.unwrap_err();
    assert_eq!(err.kind(), "session_not_found");
}

#[tokio::test]
async fn test_savepoint_rollback_keeps_session_open() {
    let fx = Fixture::new().await;
    fx.write_now("CREATE TABLE t(v INTEGER)").await.unwrap();
    let id = fx.begin().await;

    fx.write_in(&id, "INSERT INTO t VALUES (1)").await.unwrap();
    fx.call(ActionRequest::new(Action::Savepoint).with_session(&id).with_name("a"))
        .await
        .unwrap();
    fx.write_in(&id, "INSERT INTO t VALUES (2)").await.unwrap();
    fx.call(ActionRequest::new(Action::RollbackTo).with_session(&id).with_name("a"))
        .await
        .unwrap();

    let inside = fx.read_in(&id, "SELECT v FROM t ORDER BY v").await.unwrap();
    assert_eq!(inside["rows"], json!([{ "v": 1 }]));

    let lease = fx.ctx.session_manager().resolve(&id).unwrap();
    assert_eq!(lease.executor().state(), TransactionState::Open);
    drop(lease);

    fx.write_in(&id, "INSERT INTO t VALUES (3)").await.unwrap();
    fx.end(Action::Commit, &id).await.unwrap();
    let after = fx.read("SELECT v FROM t ORDER BY v").await.unwrap();
    assert_eq!(after["rows"], json!([{ "v": 1 }, { "v": 3 }]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reaper_rolls_back_idle_sessions_and_frees_connections() {
    let fx = Fixture::with(Duration::from_millis(100), 2).await;
    fx.write_now("CREATE TABLE t(v INTEGER)").await.unwrap();
    let reaper = fx.ctx.session_manager().spawn_reaper(Duration::from_millis(25));

    let id = fx.begin().await;
    fx.write_in(&id, "INSERT INTO t VALUES (1)").await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let err = fx.read_in(&id, "SELECT 1").await.unwrap_err();
    assert_eq!(err.kind(), "session_not_found");
    let count = fx.read("SELECT count(*) AS n FROM t").await.unwrap();
    assert_eq!(count["rows"][0]["n"], json!(0));

    // both pooled connections are usable again
    let a = fx.begin().await;
    let b = fx.begin().await;
    assert_ne!(a, b);

    fx.ctx.shutdown().await.unwrap();
    reaper.await.unwrap();
}

#[tokio::test]
async fn test_exhausted_pool_times_out_begin() {
    let fx = Fixture::with(Duration::from_secs(60), 1).await;
    let _held = fx.begin().await;
    let err = fx.call(ActionRequest::new(Action::Begin)).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
}

#[tokio::test]
async fn test_statement_deadline_interrupts() {
    let fx = Fixture::new().await;
    let mut request = ActionRequest::new(Action::Read).with_sql(
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
    );
    request.timeout_ms = Some(50);
    let err = fx.call(request).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert!(fx.read("SELECT 1 AS one").await.is_ok());
}
