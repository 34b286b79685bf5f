//! PID cache rebuild from production object metadata.

mod common;

use common::{test_env, wait_done};
use data_lifecycle::{
    models::task::TaskState,
    tasks::{TaskRunner, pid_rebuild::rebuild_pid_cache},
};

#[tokio::test]
async fn rebuild_backfills_both_directions_and_skips_cached() {
    let env = test_env().await;
    let svc = env.services.clone();

    // two production files with mirrored PID metadata, one without
    let scratch = env.dir.path().join("seed");
    tokio::fs::create_dir_all(&scratch).await.unwrap();
    for (name, pid) in [("a.nc", Some("21.T0000/aaa")), ("b.nc", Some("21.T0000/bbb")), ("c.nc", None)]
    {
        let local = scratch.join(name);
        tokio::fs::write(&local, name.as_bytes()).await.unwrap();
        let remote = svc.config.production_path(name);
        svc.storage.put(&local, &remote).await.unwrap();
        if let Some(pid) = pid {
            svc.storage.set_metadata(&remote, "PID", pid).await.unwrap();
        }
    }

    let runner = TaskRunner::new();
    let svc_task = svc.clone();
    let id = runner.submit(move |ctx| rebuild_pid_cache(ctx, svc_task, "cloud".into()));
    let status = wait_done(&runner, &id).await;

    assert_eq!(status.state, TaskState::Completed);
    let result = status.result.unwrap();
    assert_eq!(result["total"], 3);
    assert_eq!(result["cached"], 2);
    assert_eq!(result["errors"], 1);
    assert_eq!(result["skipped"], 0);

    assert_eq!(
        svc.cache.peek("21.T0000/aaa").await.unwrap().as_deref(),
        Some("cloud/a.nc")
    );
    assert_eq!(
        svc.cache.peek("cloud/b.nc").await.unwrap().as_deref(),
        Some("21.T0000/bbb")
    );

    // a second run finds everything cached already
    let svc_task = svc.clone();
    let id = runner.submit(move |ctx| rebuild_pid_cache(ctx, svc_task, "cloud".into()));
    let status = wait_done(&runner, &id).await;
    let result = status.result.unwrap();
    assert_eq!(result["skipped"], 2);
    assert_eq!(result["cached"], 0);
}
