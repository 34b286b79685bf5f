//! PID <-> path cache with durable-store fallback.
//!
//! The cache keeps two independent keys per promoted file (`pid -> path`
//! and `path -> pid`). It is eventually consistent with the record store:
//! a miss falls back to SQLite and backfills both directions.

use crate::services::records::{RecordError, RecordStore};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Record(#[from] RecordError),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Minimal get/set/remove key-value contract.
#[async_trait]
pub trait KvCache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> CacheResult<()>;
    async fn remove(&self, key: &str) -> CacheResult<()>;
}

/// Redis-backed cache used in deployments.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(url: &str) -> CacheResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// In-process map, used in tests and single-node setups without Redis.
#[derive(Default)]
pub struct MemoryCache {
    map: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.map.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> CacheResult<()> {
        self.map.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.map.lock().await.remove(key);
        Ok(())
    }
}

/// Write-through PID index over a [`KvCache`] and the [`RecordStore`].
#[derive(Clone)]
pub struct PidCache {
    cache: Arc<dyn KvCache>,
    records: RecordStore,
}

impl PidCache {
    pub fn new(cache: Arc<dyn KvCache>, records: RecordStore) -> Self {
        Self { cache, records }
    }

    /// Store both directions of the mapping.
    pub async fn write_through(&self, pid: &str, path: &str) -> CacheResult<()> {
        self.cache.set(pid, path).await?;
        self.cache.set(path, pid).await?;
        debug!("PID cache updated for {}", pid);
        Ok(())
    }

    /// Cached path for a PID, without fallback.
    pub async fn peek(&self, key: &str) -> CacheResult<Option<String>> {
        self.cache.get(key).await
    }

    /// Resolve a PID to its production path.
    ///
    /// Cache hit first; on a miss the durable store is consulted and the
    /// cache is backfilled in both directions.
    pub async fn resolve(&self, pid: &str) -> CacheResult<Option<String>> {
        if let Some(path) = self.cache.get(pid).await? {
            return Ok(Some(path));
        }

        let Some(record) = self.records.find_by_uid(pid).await? else {
            return Ok(None);
        };

        self.write_through(pid, &record.path).await?;
        Ok(Some(record.path))
    }

    /// Drop both directions of the mapping (cleanup eviction).
    pub async fn evict(&self, pid: &str, path: &str) -> CacheResult<()> {
        self.cache.remove(pid).await?;
        self.cache.remove(path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_set_get_remove() {
        let cache = MemoryCache::default();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.set("k", "v").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".into()));
        cache.remove("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
