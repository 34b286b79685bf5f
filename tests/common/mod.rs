//! Shared test fixtures: a service bundle over a temp directory, an
//! in-memory SQLite record store and a process-local PID cache.

#![allow(dead_code)]

use data_lifecycle::{
    config::{AppConfig, StorageVariant},
    models::task::{TaskState, TaskStatus},
    services::{
        Services,
        notify::Notifier,
        pid_cache::{MemoryCache, PidCache},
        records::RecordStore,
        storage::FsStorage,
        tokens::TokenVault,
    },
    tasks::TaskRunner,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use uuid::Uuid;

pub struct TestEnv {
    // owns the on-disk layout for the lifetime of the test
    pub dir: TempDir,
    pub services: Arc<Services>,
}

pub fn test_config(dir: &TempDir) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        staging_root: dir.path().join("staging"),
        database_url: "sqlite::memory:".into(),
        redis_url: None,
        storage_variant: StorageVariant::Filesystem,
        storage_root: dir.path().join("store"),
        gateway_url: None,
        batches_coll: "batches".into(),
        orders_coll: "orders".into(),
        production_coll: "cloud".into(),
        uid_prefix: "21.T0000".into(),
        notify_url: None,
        edmo_code: Some(634),
        api_version: Some("1".into()),
        secret_path: dir.path().join("meta/order_secrets.key"),
        max_zip_size: 2_147_483_648,
        zipsplit_bin: "/usr/bin/zipsplit".into(),
        production: false,
        evict_on_delete: false,
    }
}

pub async fn test_env() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    test_env_with(test_config(&dir), dir).await
}

pub async fn test_env_with(config: AppConfig, dir: TempDir) -> TestEnv {
    // one connection only: every in-memory SQLite connection is its own DB
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap(),
    );
    for stmt in include_str!("../../migrations/0001_init.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(stmt).execute(&*db).await.unwrap();
    }

    let records = RecordStore::new(db.clone());
    let services = Services {
        storage: Arc::new(FsStorage::new(config.storage_root.clone())),
        cache: PidCache::new(Arc::new(MemoryCache::default()), records.clone()),
        records,
        notifier: Notifier::new(None, config.edmo_code, config.api_version.clone(), false),
        vault: TokenVault::from_file(&config.secret_path).await.unwrap(),
        http: reqwest::Client::new(),
        db,
        config,
    };

    TestEnv {
        dir,
        services: Arc::new(services),
    }
}

/// Poll a task until it leaves the running states.
pub async fn wait_done(runner: &TaskRunner, id: &Uuid) -> TaskStatus {
    for _ in 0..200 {
        if let Some(status) = runner.status(id) {
            if matches!(status.state, TaskState::Completed | TaskState::Failed) {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("task {id} did not finish in time");
}
