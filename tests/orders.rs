//! Order assembly: PID resolution, zip build, merge-on-repeat with
//! backup, and token-authorized downloads.

mod common;

use axum::{
    Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{Request, StatusCode},
    routing::get,
};
use common::{test_env, wait_done};
use data_lifecycle::{
    models::{payload::RequestPayload, task::TaskState},
    services::zips,
    tasks::{
        TaskRunner,
        orders::{merge_into_existing, order_zip_file_name, restricted_order, unrestricted_order},
    },
};
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, path::Path, sync::Arc};
use tower::util::ServiceExt;

/// Promote a production file by hand: backend copy + record + cache.
async fn seed_production(
    svc: &data_lifecycle::services::Services,
    scratch: &Path,
    name: &str,
    body: &[u8],
) -> String {
    let local = scratch.join(name);
    tokio::fs::write(&local, body).await.unwrap();
    let remote = svc.config.production_path(name);
    svc.storage.put(&local, &remote).await.unwrap();
    let uid = format!("{}/{}", svc.config.uid_prefix, uuid::Uuid::new_v4());
    svc.records.create(&uid, &remote).await.unwrap();
    svc.cache.write_through(&uid, &remote).await.unwrap();
    uid
}

#[tokio::test]
async fn unrestricted_order_zips_resolved_pids() {
    let env = test_env().await;
    let svc = env.services.clone();
    let scratch = env.dir.path().join("seed");
    tokio::fs::create_dir_all(&scratch).await.unwrap();

    let pid_a = seed_production(&svc, &scratch, "a.nc", b"alpha").await;
    let pid_b = seed_production(&svc, &scratch, "b.nc", b"beta").await;

    svc.storage.create_collection("orders/o1").await.unwrap();
    tokio::fs::create_dir_all(svc.config.order_local("o1"))
        .await
        .unwrap();

    let payload = RequestPayload {
        request_id: "req-o1".into(),
        api_function: "unrestricted_order".into(),
        parameters: json!({
            "file_name": "order_o1_unrestricted.zip",
            // one unknown and one malformed PID alongside the real ones
            "pids": [pid_a, pid_b, "21.T0000/does-not-exist", "short"],
        }),
        ..Default::default()
    };

    let runner = TaskRunner::new();
    let svc_task = svc.clone();
    let id = runner.submit(move |ctx| unrestricted_order(ctx, svc_task, "o1".into(), payload));
    let status = wait_done(&runner, &id).await;

    assert_eq!(status.state, TaskState::Completed, "failure: {:?}", status.failure);
    let result = status.result.unwrap();
    assert_eq!(result["verified"], 2);
    assert_eq!(result["step"], 2);
    assert_eq!(result["errors"], 1); // the unknown PID

    // the archive landed in the order collection and holds both files
    let remote = format!("orders/o1/{}", order_zip_file_name("o1", false, None));
    assert!(svc.storage.is_dataobject(&remote).await.unwrap());

    let fetched = env.dir.path().join("fetched.zip");
    svc.storage.get(&remote, &fetched).await.unwrap();
    let mut names = zips::entry_names(&fetched).await.unwrap();
    names.sort();
    assert_eq!(names, vec!["a.nc".to_string(), "b.nc".to_string()]);
    assert_eq!(zips::read_entry(&fetched, "a.nc").await.unwrap(), b"alpha");
}

#[tokio::test]
async fn merge_preserves_union_and_writes_backup_first() {
    let env = test_env().await;
    let svc = env.services.clone();

    // an existing order archive with one entry
    let first = env.dir.path().join("first");
    std::fs::create_dir_all(&first).unwrap();
    std::fs::write(first.join("one.txt"), b"1").unwrap();
    let existing = env.dir.path().join("existing.zip");
    zips::archive_dir(&first, &existing).await.unwrap();

    let remote = format!("orders/o2/{}", order_zip_file_name("o2", true, None));
    svc.storage.create_collection("orders/o2").await.unwrap();
    svc.storage.put(&existing, &remote).await.unwrap();

    // freshly extracted partner entries to merge in
    let scratch_dir = env.dir.path().join("scratch");
    std::fs::create_dir_all(&scratch_dir).unwrap();
    std::fs::write(scratch_dir.join("two.txt"), b"2").unwrap();

    let local_final = env.dir.path().join("merged.zip");
    merge_into_existing(&svc, &remote, &local_final, &scratch_dir)
        .await
        .unwrap();

    // union of both payloads
    let fetched = env.dir.path().join("after.zip");
    svc.storage.get(&remote, &fetched).await.unwrap();
    let mut names = zips::entry_names(&fetched).await.unwrap();
    names.sort();
    assert_eq!(names, vec!["one.txt".to_string(), "two.txt".to_string()]);

    // the previous archive survives as .bak
    let backup = format!("orders/o2/{}", "order_o2_restricted.bak");
    assert!(svc.storage.is_dataobject(&backup).await.unwrap());
    let bak_local = env.dir.path().join("bak.zip");
    svc.storage.get(&backup, &bak_local).await.unwrap();
    assert_eq!(zips::entry_names(&bak_local).await.unwrap(), vec!["one.txt"]);
}

/// Serve a directory of fixture files under `/files/{name}`.
async fn serve_dir(files: HashMap<String, Vec<u8>>) -> SocketAddr {
    let app = Router::new()
        .route(
            "/files/{name}",
            get(
                |State(files): State<HashMap<String, Vec<u8>>>, AxumPath(name): AxumPath<String>| async move {
                    files
                        .get(&name)
                        .cloned()
                        .ok_or(StatusCode::NOT_FOUND)
                },
            ),
        )
        .with_state(files);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn partner_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    for (name, body) in entries {
        std::fs::write(src.join(name), body).unwrap();
    }
    let zip_path = dir.path().join("p.zip");
    zips::archive_dir(&src, &zip_path).await.unwrap();
    std::fs::read(&zip_path).unwrap()
}

fn restricted_payload(
    addr: &SocketAddr,
    order_id: &str,
    file_name: &str,
    body: &[u8],
    count: usize,
) -> RequestPayload {
    RequestPayload {
        request_id: format!("req-{order_id}-{file_name}"),
        api_function: "download_restricted_order".into(),
        parameters: json!({
            "order_number": order_id,
            "download_path": format!("http://{addr}/files"),
            "zipfile_name": order_zip_file_name(order_id, true, None).trim_end_matches(".zip"),
            "file_name": file_name,
            "file_size": body.len(),
            "data_file_count": count,
            "file_checksum": format!("{:x}", md5::compute(body)),
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn repeated_restricted_orders_merge_with_backup() {
    let env = test_env().await;
    let svc = env.services.clone();

    let zip1 = partner_zip(&[("cruise1.csv", b"a;b;c")]).await;
    let zip2 = partner_zip(&[("cruise2.csv", b"d;e;f")]).await;
    let mut files = HashMap::new();
    files.insert("delivery1.zip".to_string(), zip1.clone());
    files.insert("delivery2.zip".to_string(), zip2.clone());
    let addr = serve_dir(files).await;

    svc.storage.create_collection("orders/o3").await.unwrap();
    tokio::fs::create_dir_all(svc.config.order_local("o3"))
        .await
        .unwrap();

    // first delivery: plain upload
    let runner = TaskRunner::new();
    let svc_task = svc.clone();
    let payload = restricted_payload(&addr, "o3", "delivery1.zip", &zip1, 1);
    let id = runner.submit(move |ctx| restricted_order(ctx, svc_task, "o3".into(), payload));
    let status = wait_done(&runner, &id).await;
    assert_eq!(status.state, TaskState::Completed, "failure: {:?}", status.failure);

    let remote = format!("orders/o3/{}", order_zip_file_name("o3", true, None));
    assert!(svc.storage.is_dataobject(&remote).await.unwrap());

    // second delivery: merge, union of both payloads, backup of the first
    let svc_task = svc.clone();
    let payload = restricted_payload(&addr, "o3", "delivery2.zip", &zip2, 1);
    let id = runner.submit(move |ctx| restricted_order(ctx, svc_task, "o3".into(), payload));
    let status = wait_done(&runner, &id).await;
    assert_eq!(status.state, TaskState::Completed, "failure: {:?}", status.failure);

    let fetched = env.dir.path().join("merged.zip");
    svc.storage.get(&remote, &fetched).await.unwrap();
    let mut names = zips::entry_names(&fetched).await.unwrap();
    names.sort();
    assert_eq!(names, vec!["cruise1.csv".to_string(), "cruise2.csv".to_string()]);

    assert!(
        svc.storage
            .is_dataobject("orders/o3/order_o3_restricted.bak")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn missing_order_collection_fails_restricted_task() {
    let env = test_env().await;
    let svc = env.services.clone();

    let payload = RequestPayload {
        request_id: "req-o4".into(),
        parameters: json!({}),
        ..Default::default()
    };
    let runner = TaskRunner::new();
    let id = runner.submit(move |ctx| restricted_order(ctx, svc, "o4".into(), payload));
    let status = wait_done(&runner, &id).await;

    assert_eq!(status.state, TaskState::Failed);
    assert!(status.failure.unwrap().join(" ").contains("4016"));
}

#[tokio::test]
async fn download_requires_current_seed() {
    let env = test_env().await;
    let svc = env.services.clone();

    // one archive in the order collection
    let dirsrc = env.dir.path().join("zsrc");
    std::fs::create_dir_all(&dirsrc).unwrap();
    std::fs::write(dirsrc.join("f.txt"), b"zzz").unwrap();
    let zip_local = env.dir.path().join("z.zip");
    zips::archive_dir(&dirsrc, &zip_local).await.unwrap();

    let zip_name = order_zip_file_name("o5", false, None);
    svc.storage.create_collection("orders/o5").await.unwrap();
    svc.storage
        .put(&zip_local, &format!("orders/o5/{zip_name}"))
        .await
        .unwrap();
    tokio::fs::create_dir_all(svc.config.order_local("o5"))
        .await
        .unwrap();

    let app = data_lifecycle::build_router(Arc::clone(&svc));

    // listing issues a tokenized URL
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/orders/o5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
    let listing: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let url = listing["downloads"][0]["url"].as_str().unwrap().to_string();

    // the token works while the seed is unchanged
    let res = app
        .clone()
        .oneshot(Request::builder().uri(&url).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
    assert!(!body.is_empty());

    // rotating the seed invalidates every outstanding token
    svc.vault
        .rotate_seed(&svc.config.order_local("o5"))
        .await
        .unwrap();
    let res = app
        .oneshot(Request::builder().uri(&url).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}
