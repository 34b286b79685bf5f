//! Deletion tasks: accumulate-and-continue semantics and configurable
//! cache/record eviction.

mod common;

use common::{test_config, test_env, test_env_with, wait_done};
use data_lifecycle::{
    models::{payload::RequestPayload, task::TaskState},
    tasks::{
        TaskRunner,
        cleanup::{delete_batches, delete_orders},
    },
};
use serde_json::json;

#[tokio::test]
async fn batch_delete_continues_past_unknown_ids() {
    let env = test_env().await;
    let svc = env.services.clone();

    svc.storage.create_collection("batches/keepme").await.unwrap();
    svc.storage.create_collection("batches/gone").await.unwrap();
    let staging = svc.config.batch_staging("gone");
    tokio::fs::create_dir_all(&staging).await.unwrap();
    tokio::fs::write(staging.join("f.zip"), b"x").await.unwrap();

    let payload = RequestPayload {
        request_id: "req-del".into(),
        api_function: "delete_batches".into(),
        parameters: json!({"batches": ["gone", "never-existed"]}),
        ..Default::default()
    };

    let runner = TaskRunner::new();
    let svc_task = svc.clone();
    let id = runner.submit(move |ctx| delete_batches(ctx, svc_task, payload));
    let status = wait_done(&runner, &id).await;

    assert_eq!(status.state, TaskState::Completed);
    let result = status.result.unwrap();
    assert_eq!(result["total"], 2);
    assert_eq!(result["errors"], 1); // BATCH_NOT_FOUND for never-existed

    assert!(!svc.storage.exists("batches/gone").await.unwrap());
    assert!(!staging.exists());
    // unrelated batches are untouched
    assert!(svc.storage.is_collection("batches/keepme").await.unwrap());
}

#[tokio::test]
async fn empty_batch_list_aborts() {
    let env = test_env().await;
    let svc = env.services.clone();

    let payload = RequestPayload {
        request_id: "req-del2".into(),
        parameters: json!({"batches": []}),
        ..Default::default()
    };
    let runner = TaskRunner::new();
    let id = runner.submit(move |ctx| delete_batches(ctx, svc, payload));
    let status = wait_done(&runner, &id).await;

    assert_eq!(status.state, TaskState::Failed);
    assert!(status.failure.unwrap().join(" ").contains("4027"));
}

#[tokio::test]
async fn order_delete_removes_local_dir_and_collection() {
    let env = test_env().await;
    let svc = env.services.clone();

    svc.storage.create_collection("orders/o1").await.unwrap();
    let local = svc.config.order_local("o1");
    tokio::fs::create_dir_all(&local).await.unwrap();
    tokio::fs::write(local.join(".seed"), b"seedseedseed").await.unwrap();

    let payload = RequestPayload {
        request_id: "req-del3".into(),
        parameters: json!({"orders": ["o1", "o-missing"]}),
        ..Default::default()
    };
    let runner = TaskRunner::new();
    let svc_task = svc.clone();
    let id = runner.submit(move |ctx| delete_orders(ctx, svc_task, payload));
    let status = wait_done(&runner, &id).await;

    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.result.unwrap()["errors"], 1);
    assert!(!local.exists());
    assert!(!svc.storage.exists("orders/o1").await.unwrap());
}

#[tokio::test]
async fn eviction_is_opt_in_and_scoped_to_the_deleted_tree() {
    // default: records and cache survive a delete
    let env = test_env().await;
    let svc = env.services.clone();
    svc.storage.create_collection("batches/b9").await.unwrap();
    tokio::fs::create_dir_all(svc.config.batch_staging("b9")).await.unwrap();
    svc.records.create("21.T0000/keep", "batches/b9/f.nc").await.unwrap();
    svc.cache.write_through("21.T0000/keep", "batches/b9/f.nc").await.unwrap();

    let payload = RequestPayload {
        request_id: "r".into(),
        parameters: json!({"batches": ["b9"]}),
        ..Default::default()
    };
    let runner = TaskRunner::new();
    let svc_task = svc.clone();
    let id = runner.submit(move |ctx| delete_batches(ctx, svc_task, payload));
    wait_done(&runner, &id).await;
    assert!(svc.records.find_by_uid("21.T0000/keep").await.unwrap().is_some());

    // opted in: entries under the deleted collection are evicted
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(&dir);
    cfg.evict_on_delete = true;
    let env = test_env_with(cfg, dir).await;
    let svc = env.services.clone();

    svc.storage.create_collection("batches/b10").await.unwrap();
    tokio::fs::create_dir_all(svc.config.batch_staging("b10")).await.unwrap();
    svc.records.create("21.T0000/drop", "batches/b10/f.nc").await.unwrap();
    svc.cache.write_through("21.T0000/drop", "batches/b10/f.nc").await.unwrap();
    svc.records.create("21.T0000/other", "cloud/other.nc").await.unwrap();

    let payload = RequestPayload {
        request_id: "r".into(),
        parameters: json!({"batches": ["b10"]}),
        ..Default::default()
    };
    let runner = TaskRunner::new();
    let svc_task = svc.clone();
    let id = runner.submit(move |ctx| delete_batches(ctx, svc_task, payload));
    wait_done(&runner, &id).await;

    assert!(svc.records.find_by_uid("21.T0000/drop").await.unwrap().is_none());
    assert_eq!(svc.cache.peek("21.T0000/drop").await.unwrap(), None);
    assert_eq!(svc.cache.peek("batches/b10/f.nc").await.unwrap(), None);
    // records outside the deleted tree survive
    assert!(svc.records.find_by_uid("21.T0000/other").await.unwrap().is_some());
}
