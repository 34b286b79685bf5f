//! Storage backend abstraction.
//!
//! The lifecycle tasks never talk to a concrete store directly: they go
//! through the narrow [`StorageBackend`] trait, which mirrors the
//! collection/object operations of the historical remote store. Two
//! implementations exist and are selected by configuration:
//!
//! - [`FsStorage`] — a plain local filesystem rooted at one directory;
//! - [`HttpStorage`] — a remote object gateway reached over HTTP.
//!
//! Paths handed to a backend are always relative, `/`-separated keys like
//! `batches/<id>/<file>`; translating them to a physical location is the
//! backend's business.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("path `{0}` not found")]
    NotFound(String),
    #[error("invalid storage path `{0}`")]
    InvalidPath(String),
    #[error("`{0}` is not a collection")]
    NotACollection(String),
    #[error("gateway returned status {status} for `{path}`")]
    Gateway { status: u16, path: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Collection,
    Dataobject,
}

/// One entry of a collection listing.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectInfo {
    pub name: String,
    /// Backend path of the entry (relative, `/`-separated).
    pub path: String,
    pub object_type: ObjectType,
    pub content_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectInfo {
    pub fn is_dataobject(&self) -> bool {
        self.object_type == ObjectType::Dataobject
    }
}

/// Collection/object operations consumed by the lifecycle tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    async fn exists(&self, path: &str) -> StorageResult<bool>;
    async fn is_collection(&self, path: &str) -> StorageResult<bool>;
    async fn is_dataobject(&self, path: &str) -> StorageResult<bool>;
    async fn list(&self, path: &str) -> StorageResult<Vec<ObjectInfo>>;
    async fn create_collection(&self, path: &str) -> StorageResult<()>;
    /// Upload a local file to `remote`, overwriting any previous object.
    async fn put(&self, local: &Path, remote: &str) -> StorageResult<()>;
    /// Download `remote` into the local file at `local`.
    async fn get(&self, remote: &str, local: &Path) -> StorageResult<()>;
    async fn move_to(&self, src: &str, dst: &str) -> StorageResult<()>;
    async fn remove(&self, path: &str, recursive: bool) -> StorageResult<()>;
    async fn get_metadata(&self, path: &str) -> StorageResult<HashMap<String, String>>;
    async fn set_metadata(&self, path: &str, key: &str, value: &str) -> StorageResult<()>;
}

/// Reject keys that could escape the storage root.
fn ensure_path_safe(path: &str) -> StorageResult<()> {
    if path.is_empty() || path.starts_with('/') || path.contains("..") {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    if path
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem variant
// ---------------------------------------------------------------------------

/// Storage backend over a plain local filesystem.
///
/// Collections are directories, data objects are files. Object metadata
/// is kept in a hidden sidecar file (`.<name>.meta.json`) next to the
/// object, since the filesystem has no attribute store of its own.
#[derive(Clone, Debug)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        ensure_path_safe(path)?;
        Ok(self.root.join(path))
    }

    fn sidecar(&self, path: &str) -> StorageResult<PathBuf> {
        let full = self.resolve(path)?;
        let name = full
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?
            .to_string();
        let parent = full
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        Ok(parent.join(format!(".{name}.meta.json")))
    }
}

#[async_trait]
impl StorageBackend for FsStorage {
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        Ok(fs::try_exists(&full).await?)
    }

    async fn is_collection(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn is_dataobject(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, path: &str) -> StorageResult<Vec<ObjectInfo>> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full)
            .await
            .map_err(|_| StorageError::NotFound(path.to_string()))?;
        if !meta.is_dir() {
            return Err(StorageError::NotACollection(path.to_string()));
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            // sidecar metadata files are an implementation detail
            if name.starts_with('.') {
                continue;
            }
            let entry_meta = entry.metadata().await?;
            let object_type = if entry_meta.is_dir() {
                ObjectType::Collection
            } else {
                ObjectType::Dataobject
            };
            let last_modified = entry_meta
                .modified()
                .ok()
                .map(DateTime::<Utc>::from);
            entries.push(ObjectInfo {
                path: format!("{}/{}", path.trim_end_matches('/'), name),
                name,
                object_type,
                content_length: entry_meta.len(),
                last_modified,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn create_collection(&self, path: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).await?;
        Ok(())
    }

    async fn put(&self, local: &Path, remote: &str) -> StorageResult<()> {
        let full = self.resolve(remote)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local, &full).await?;
        debug!("stored {} -> {}", local.display(), remote);
        Ok(())
    }

    async fn get(&self, remote: &str, local: &Path) -> StorageResult<()> {
        let full = self.resolve(remote)?;
        if !fs::try_exists(&full).await? {
            return Err(StorageError::NotFound(remote.to_string()));
        }
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&full, local).await?;
        Ok(())
    }

    async fn move_to(&self, src: &str, dst: &str) -> StorageResult<()> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::rename(&from, &to).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(src.to_string()))
            }
            // rename can fail across mounts; fall back to copy + remove
            Err(err) => {
                debug!("rename failed ({err}), copying instead");
                fs::copy(&from, &to).await?;
                fs::remove_file(&from).await?;
                Ok(())
            }
        }
    }

    async fn remove(&self, path: &str, recursive: bool) -> StorageResult<()> {
        let full = self.resolve(path)?;
        let meta = match fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&full).await?;
            } else {
                fs::remove_dir(&full).await?;
            }
        } else {
            fs::remove_file(&full).await?;
            if let Ok(sidecar) = self.sidecar(path) {
                let _ = fs::remove_file(&sidecar).await;
            }
        }
        Ok(())
    }

    async fn get_metadata(&self, path: &str) -> StorageResult<HashMap<String, String>> {
        if !self.exists(path).await? {
            return Err(StorageError::NotFound(path.to_string()));
        }
        let sidecar = self.sidecar(path)?;
        match fs::read(&sidecar).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw).unwrap_or_default()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_metadata(&self, path: &str, key: &str, value: &str) -> StorageResult<()> {
        if !self.exists(path).await? {
            return Err(StorageError::NotFound(path.to_string()));
        }
        let sidecar = self.sidecar(path)?;
        let mut meta = match fs::read(&sidecar).await {
            Ok(raw) => serde_json::from_slice::<HashMap<String, String>>(&raw).unwrap_or_default(),
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        meta.insert(key.to_string(), value.to_string());
        let encoded = serde_json::to_vec(&meta).map_err(|err| {
            StorageError::Io(io::Error::new(ErrorKind::InvalidData, err))
        })?;
        fs::write(&sidecar, encoded).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP gateway variant
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct StatResponse {
    object_type: ObjectType,
}

/// Storage backend over a remote HTTP object gateway.
///
/// The gateway exposes a small REST dialect:
/// `GET /stat/{path}`, `GET /list/{path}`, `PUT|GET|DELETE /objects/{path}`,
/// `POST /collections/{path}`, `POST /move`, `GET|PUT /metadata/{path}`.
#[derive(Clone, Debug)]
pub struct HttpStorage {
    base: String,
    client: reqwest::Client,
}

impl HttpStorage {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, op: &str, path: &str) -> String {
        format!("{}/{}/{}", self.base, op, path.trim_start_matches('/'))
    }

    async fn stat(&self, path: &str) -> StorageResult<Option<StatResponse>> {
        ensure_path_safe(path)?;
        let resp = self.client.get(self.url("stat", path)).send().await?;
        match resp.status().as_u16() {
            200 => Ok(Some(resp.json::<StatResponse>().await?)),
            404 => Ok(None),
            status => Err(StorageError::Gateway {
                status,
                path: path.to_string(),
            }),
        }
    }

    fn check(&self, status: reqwest::StatusCode, path: &str) -> StorageResult<()> {
        if status.is_success() {
            Ok(())
        } else if status.as_u16() == 404 {
            Err(StorageError::NotFound(path.to_string()))
        } else {
            Err(StorageError::Gateway {
                status: status.as_u16(),
                path: path.to_string(),
            })
        }
    }
}

#[async_trait]
impl StorageBackend for HttpStorage {
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    async fn is_collection(&self, path: &str) -> StorageResult<bool> {
        Ok(matches!(
            self.stat(path).await?,
            Some(StatResponse {
                object_type: ObjectType::Collection,
            })
        ))
    }

    async fn is_dataobject(&self, path: &str) -> StorageResult<bool> {
        Ok(matches!(
            self.stat(path).await?,
            Some(StatResponse {
                object_type: ObjectType::Dataobject,
            })
        ))
    }

    async fn list(&self, path: &str) -> StorageResult<Vec<ObjectInfo>> {
        ensure_path_safe(path)?;
        let resp = self.client.get(self.url("list", path)).send().await?;
        self.check(resp.status(), path)?;
        Ok(resp.json::<Vec<ObjectInfo>>().await?)
    }

    async fn create_collection(&self, path: &str) -> StorageResult<()> {
        ensure_path_safe(path)?;
        let resp = self
            .client
            .post(self.url("collections", path))
            .send()
            .await?;
        self.check(resp.status(), path)
    }

    async fn put(&self, local: &Path, remote: &str) -> StorageResult<()> {
        ensure_path_safe(remote)?;
        let file = File::open(local).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let resp = self
            .client
            .put(self.url("objects", remote))
            .body(body)
            .send()
            .await?;
        self.check(resp.status(), remote)
    }

    async fn get(&self, remote: &str, local: &Path) -> StorageResult<()> {
        ensure_path_safe(remote)?;
        let resp = self.client.get(self.url("objects", remote)).send().await?;
        self.check(resp.status(), remote)?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(local).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn move_to(&self, src: &str, dst: &str) -> StorageResult<()> {
        ensure_path_safe(src)?;
        ensure_path_safe(dst)?;
        let resp = self
            .client
            .post(format!("{}/move", self.base))
            .json(&serde_json::json!({ "src": src, "dst": dst }))
            .send()
            .await?;
        self.check(resp.status(), src)
    }

    async fn remove(&self, path: &str, recursive: bool) -> StorageResult<()> {
        ensure_path_safe(path)?;
        let mut url = self.url("objects", path);
        if recursive {
            url.push_str("?recursive=true");
        }
        let resp = self.client.delete(url).send().await?;
        self.check(resp.status(), path)
    }

    async fn get_metadata(&self, path: &str) -> StorageResult<HashMap<String, String>> {
        ensure_path_safe(path)?;
        let resp = self.client.get(self.url("metadata", path)).send().await?;
        self.check(resp.status(), path)?;
        Ok(resp.json::<HashMap<String, String>>().await?)
    }

    async fn set_metadata(&self, path: &str, key: &str, value: &str) -> StorageResult<()> {
        ensure_path_safe(path)?;
        let resp = self
            .client
            .put(self.url("metadata", path))
            .json(&serde_json::json!({ key: value }))
            .send()
            .await?;
        self.check(resp.status(), path)
    }
}
