//! Integration tests for the `task-cli` control-surface commands, against a
//! real PostgreSQL instance. Exercises the command functions directly --
//! the same code path the binary's `main` drives -- without shelling out
//! to the built binary.

use std::sync::Arc;

use task_engine::{Engine, EngineConfig, InProcessWorkerAdapter};
use task_store::models::TaskStatus;

#[path = "../src/control_cmd.rs"]
mod control_cmd;

fn test_engine(pool: sqlx::PgPool) -> Engine {
    let worker = Arc::new(InProcessWorkerAdapter::new());
    Engine::new(pool, worker, EngineConfig::default()).unwrap()
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let (pool, db_name) = task_test_utils::create_test_db().await;
    let engine = test_engine(pool.clone());

    control_cmd::run_create(&engine, "cli-test-type", Some(r#"{"n":1}"#), None, None, None)
        .await
        .unwrap();

    let (views, _) = engine
        .query(task_engine::QueryOptions {
            task_type: Some("cli-test-type".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].status, TaskStatus::Pending);
    assert_eq!(views[0].payload, Some(serde_json::json!({ "n": 1 })));

    control_cmd::run_get(&engine, &views[0].id).await.unwrap();

    task_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_then_remove() {
    let (pool, db_name) = task_test_utils::create_test_db().await;
    let engine = test_engine(pool.clone());

    control_cmd::run_create(&engine, "cli-test-type", None, None, None, None)
        .await
        .unwrap();
    let (views, _) = engine
        .query(task_engine::QueryOptions {
            task_type: Some("cli-test-type".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let urn = views[0].id.clone();

    control_cmd::run_cancel(&engine, &urn).await.unwrap();
    let view = engine.get(&urn).await.unwrap().unwrap();
    assert_eq!(view.status, TaskStatus::Cancelled);

    control_cmd::run_remove(&engine, &urn).await.unwrap();
    assert!(engine.get(&urn).await.unwrap().is_none());

    task_test_utils::drop_test_db(&db_name).await;
}

#[tokio::test]
async fn create_rejects_invalid_payload_json() {
    let (pool, db_name) = task_test_utils::create_test_db().await;
    let engine = test_engine(pool.clone());

    let result = control_cmd::run_create(&engine, "cli-test-type", Some("not json"), None, None, None).await;
    assert!(result.is_err());

    task_test_utils::drop_test_db(&db_name).await;
}
