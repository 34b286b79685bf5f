//! Service handles shared by the HTTP surface and the task workers.
//!
//! Everything external is dependency-injected through [`Services`]: the
//! storage backend, the PID cache, the record store, the notification
//! relay and the token vault are constructed once at startup and handed
//! around explicitly, never reached through ambient globals.

pub mod batches;
pub mod notify;
pub mod pid_cache;
pub mod records;
pub mod storage;
pub mod tokens;
pub mod zips;

use crate::config::{AppConfig, StorageVariant};
use anyhow::{Context, Result};
use notify::Notifier;
use pid_cache::{KvCache, MemoryCache, PidCache, RedisCache};
use records::RecordStore;
use sqlx::SqlitePool;
use std::sync::Arc;
use storage::{FsStorage, HttpStorage, StorageBackend};
use tokens::TokenVault;
use tracing::{info, warn};

/// Bundle of all externally-facing service handles.
///
/// Opened at worker start, dropped at shutdown.
#[derive(Clone)]
pub struct Services {
    pub config: AppConfig,
    pub db: Arc<SqlitePool>,
    pub storage: Arc<dyn StorageBackend>,
    pub cache: PidCache,
    pub records: RecordStore,
    pub notifier: Notifier,
    pub vault: TokenVault,
    /// Client for partner-archive downloads.
    pub http: reqwest::Client,
}

impl Services {
    pub async fn open(config: AppConfig, db: Arc<SqlitePool>) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = match config.storage_variant {
            StorageVariant::Filesystem => {
                info!("storage backend: filesystem at {}", config.storage_root.display());
                Arc::new(FsStorage::new(config.storage_root.clone()))
            }
            StorageVariant::Http => {
                let base = config
                    .gateway_url
                    .clone()
                    .context("http storage variant requires DATA_LIFECYCLE_GATEWAY_URL")?;
                info!("storage backend: http gateway at {}", base);
                Arc::new(HttpStorage::new(base))
            }
        };

        let kv: Arc<dyn KvCache> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisCache::new(url).context("opening redis cache")?),
            None => {
                warn!("no redis configured, PID cache is process-local");
                Arc::new(MemoryCache::default())
            }
        };

        let records = RecordStore::new(db.clone());
        let cache = PidCache::new(kv, records.clone());
        let notifier = Notifier::new(
            config.notify_url.clone(),
            config.edmo_code,
            config.api_version.clone(),
            config.production,
        );
        let vault = TokenVault::from_file(&config.secret_path)
            .await
            .context("loading order token secret")?;

        Ok(Self {
            config,
            db,
            storage,
            cache,
            records,
            notifier,
            vault,
            http: reqwest::Client::new(),
        })
    }
}
