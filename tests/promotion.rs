//! Promotion task: per-entry error accumulation, PID assignment and
//! cache/record consistency.

mod common;

use common::{test_env, wait_done};
use data_lifecycle::{
    models::{payload::RequestPayload, task::TaskState},
    services::pid_cache::{MemoryCache, PidCache},
    tasks::{TaskRunner, promote::promote_batch},
};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn missing_entry_is_recorded_and_processing_continues() {
    let env = test_env().await;
    let svc = env.services.clone();

    // stage one real file; the second entry points nowhere
    let staging = svc.config.batch_staging("b1");
    tokio::fs::create_dir_all(&staging).await.unwrap();
    tokio::fs::write(staging.join("good.nc"), b"measurements")
        .await
        .unwrap();

    let payload = RequestPayload {
        request_id: "req-1".into(),
        api_function: "approve_batch".into(),
        parameters: json!({
            "pids": [
                {"temp_id": "good.nc", "format_n_code": "541555", "cdi_n_code": "1522222"},
                {"temp_id": "missing.nc", "format_n_code": "541556"},
            ]
        }),
        ..Default::default()
    };

    let runner = TaskRunner::new();
    let svc_task = svc.clone();
    let id = runner.submit(move |ctx| promote_batch(ctx, svc_task, "b1".into(), payload));
    let status = wait_done(&runner, &id).await;

    assert_eq!(status.state, TaskState::Completed);
    let result = status.result.unwrap();
    assert_eq!(result["total"], 2);
    assert_eq!(result["step"], 1);
    assert_eq!(result["errors"], 1);

    // the good entry got a PID and a production copy
    let out = result["out"].as_array().unwrap();
    assert_eq!(out.len(), 1);
    let pid = out[0]["pid"].as_str().unwrap();
    assert!(pid.starts_with("21.T0000/"));

    let record = svc.records.find_by_uid(pid).await.unwrap().unwrap();
    assert_eq!(record.path, "cloud/good.nc");
    assert!(svc.storage.is_dataobject("cloud/good.nc").await.unwrap());

    // metadata carries the fixed key set, missing values as placeholders
    let meta = record.metadata_map();
    assert_eq!(meta.get("format_n_code").map(String::as_str), Some("541555"));
    assert_eq!(meta.get("batch_date").map(String::as_str), Some("***MISSING***"));
    assert_eq!(meta.get("PID").map(String::as_str), Some(pid));
}

#[tokio::test]
async fn promoted_file_survives_roundtrip_and_cache_backfills() {
    let env = test_env().await;
    let svc = env.services.clone();

    let body = b"profile data 123".to_vec();
    let checksum = format!("{:x}", md5::compute(&body));

    let staging = svc.config.batch_staging("b2");
    tokio::fs::create_dir_all(&staging).await.unwrap();
    tokio::fs::write(staging.join("data.nc"), &body).await.unwrap();

    let payload = RequestPayload {
        request_id: "req-2".into(),
        parameters: json!({"pids": [{"temp_id": "data.nc"}]}),
        ..Default::default()
    };

    let runner = TaskRunner::new();
    let svc_task = svc.clone();
    let id = runner.submit(move |ctx| promote_batch(ctx, svc_task, "b2".into(), payload));
    let status = wait_done(&runner, &id).await;
    let pid = status.result.unwrap()["out"][0]["pid"]
        .as_str()
        .unwrap()
        .to_string();

    // re-hash the stored production copy
    let record = svc.records.find_by_uid(&pid).await.unwrap().unwrap();
    let stored = env
        .dir
        .path()
        .join("store")
        .join(&record.path);
    let stored_body = tokio::fs::read(&stored).await.unwrap();
    assert_eq!(format!("{:x}", md5::compute(&stored_body)), checksum);
    assert_eq!(stored_body.len(), body.len());

    // write-through cache holds both directions
    assert_eq!(svc.cache.peek(&pid).await.unwrap().as_deref(), Some(record.path.as_str()));
    assert_eq!(svc.cache.peek(&record.path).await.unwrap().as_deref(), Some(pid.as_str()));

    // a cold cache resolves through the durable store and backfills
    let cold = PidCache::new(Arc::new(MemoryCache::default()), svc.records.clone());
    assert_eq!(cold.resolve(&pid).await.unwrap().as_deref(), Some(record.path.as_str()));
    assert_eq!(cold.peek(&record.path).await.unwrap().as_deref(), Some(pid.as_str()));

    // both record-store lookups address the same row
    let by_path = svc.records.find_by_path(&record.path).await.unwrap().unwrap();
    assert_eq!(by_path.uid, pid);
}

#[tokio::test]
async fn missing_pids_parameter_aborts() {
    let env = test_env().await;
    let svc = env.services.clone();

    let payload = RequestPayload {
        request_id: "req-3".into(),
        parameters: json!({}),
        ..Default::default()
    };

    let runner = TaskRunner::new();
    let id = runner.submit(move |ctx| promote_batch(ctx, svc, "b3".into(), payload));
    let status = wait_done(&runner, &id).await;

    assert_eq!(status.state, TaskState::Failed);
    let failure = status.failure.unwrap().join(" ");
    assert!(failure.contains("4018"), "unexpected failure: {failure}");
}

#[tokio::test]
async fn backdoor_uses_sentinel_pid_and_skips_records() {
    let env = test_env().await;
    let svc = env.services.clone();

    let staging = svc.config.batch_staging("b4");
    tokio::fs::create_dir_all(&staging).await.unwrap();
    tokio::fs::write(staging.join("x.nc"), b"x").await.unwrap();

    let payload = RequestPayload {
        request_id: "req-4".into(),
        parameters: json!({"backdoor": true, "pids": [{"temp_id": "x.nc"}]}),
        ..Default::default()
    };

    let runner = TaskRunner::new();
    let svc_task = svc.clone();
    let id = runner.submit(move |ctx| promote_batch(ctx, svc_task, "b4".into(), payload));
    let status = wait_done(&runner, &id).await;

    assert_eq!(status.state, TaskState::Completed);
    let result = status.result.unwrap();
    assert_eq!(result["out"][0]["pid"], "NO_PID_WITH_BACKDOOR");
    assert!(
        svc.records
            .find_by_uid("NO_PID_WITH_BACKDOOR")
            .await
            .unwrap()
            .is_none()
    );
}
