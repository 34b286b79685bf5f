//! Asynchronous task runtime.
//!
//! Every lifecycle operation runs as an independently scheduled unit of
//! work on the tokio runtime. Submission returns a task id immediately;
//! progress is polled through a shared status map rather than pushed.
//! Tasks are not idempotent at the storage level — re-running one may
//! duplicate side effects; only PID assignment guards against duplicate
//! records.

pub mod cleanup;
pub mod ingest;
pub mod orders;
pub mod pid_rebuild;
pub mod promote;

use crate::{
    errors::ErrorCode,
    models::{
        payload::{ErrorEntry, RequestPayload},
        task::{TaskState, TaskStatus},
    },
    services::{notify::Notifier, zips},
};
use md5::Context as Md5Context;
use serde_json::Value;
use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::{fs, io::AsyncWriteExt, time::sleep};
use tracing::{error, info};
use uuid::Uuid;

/// Bound on a single partner-archive download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
/// Bound on one storage-backend transfer (put/get/move).
pub const COMMIT_TIMEOUT: Duration = Duration::from_secs(1800);
/// Bound on one storage-backend removal.
pub const REMOVE_TIMEOUT: Duration = Duration::from_secs(180);
/// Attempts at generating a unique PID before giving up on an entry.
pub const MAX_PID_RETRIES: usize = 5;

/// Dispatches tasks and keeps their polled status records.
#[derive(Clone, Default)]
pub struct TaskRunner {
    statuses: Arc<RwLock<HashMap<Uuid, TaskStatus>>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task and return its id without waiting for completion.
    pub fn submit<F, Fut>(&self, task: F) -> Uuid
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        if let Ok(mut statuses) = self.statuses.write() {
            statuses.insert(id, TaskStatus::starting());
        }
        let ctx = TaskContext {
            id,
            statuses: self.statuses.clone(),
        };
        tokio::spawn(task(ctx));
        id
    }

    pub fn status(&self, id: &Uuid) -> Option<TaskStatus> {
        self.statuses
            .read()
            .ok()
            .and_then(|statuses| statuses.get(id).cloned())
    }
}

/// Handle a running task uses to publish its progress.
#[derive(Clone)]
pub struct TaskContext {
    id: Uuid,
    statuses: Arc<RwLock<HashMap<Uuid, TaskStatus>>>,
}

impl TaskContext {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn update(&self, apply: impl FnOnce(&mut TaskStatus)) {
        if let Ok(mut statuses) = self.statuses.write() {
            let status = statuses.entry(self.id).or_insert_with(TaskStatus::starting);
            apply(status);
        }
    }

    pub fn starting(&self, total: Option<usize>) {
        self.update(|s| {
            s.state = TaskState::Starting;
            s.total = total;
        });
    }

    /// Publish cumulative progress after one processed entry.
    pub fn progress(&self, total: Option<usize>, step: usize, errors: usize) {
        self.update(|s| {
            s.state = TaskState::Progress;
            s.total = total;
            s.step = step;
            s.errors = errors;
        });
    }

    /// Progress including the PID-resolution counter (order assembly).
    pub fn progress_verified(
        &self,
        total: Option<usize>,
        step: usize,
        verified: usize,
        errors: usize,
    ) {
        self.update(|s| {
            s.state = TaskState::Progress;
            s.total = total;
            s.step = step;
            s.verified = Some(verified);
            s.errors = errors;
        });
    }

    pub fn complete(&self, result: Value) {
        self.update(|s| {
            s.state = TaskState::Completed;
            s.result = Some(result);
        });
    }

    pub fn fail(&self, messages: Vec<String>) {
        self.update(|s| {
            s.state = TaskState::Failed;
            s.failure = Some(messages);
        });
    }
}

/// Report a structural task failure.
///
/// Logs the catalog error, attaches it to the payload, relays the payload
/// to the import manager (unless suppressed) and marks the task FAILED.
pub async fn notify_error(
    code: ErrorCode,
    payload: &mut RequestPayload,
    backdoor: bool,
    ctx: &TaskContext,
    notifier: &Notifier,
    subject: Option<String>,
    extra: Option<String>,
) {
    let mut message = code.to_string();
    if let Some(subject) = subject.as_deref() {
        message = format!("{message}. [{subject}]");
    }
    error!("{message}");
    if let Some(extra) = extra.as_deref() {
        error!("{extra}");
    }

    payload.errors = Some(vec![ErrorEntry::new(code, subject)]);
    notifier.post(payload, backdoor).await;

    let mut messages = vec![message];
    if let Some(extra) = extra {
        messages.push(extra);
    }
    ctx.fail(messages);
}

/// Bounded-retry combinator with fixed backoff.
///
/// Used for PID assignment and other calls where a handful of quick
/// retries is cheaper than surfacing a transient failure.
pub async fn retry_n<T, E, F, Fut>(attempts: usize, backoff: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(err);
                }
                sleep(backoff).await;
            }
        }
    }
}

/// A downloaded archive that passed every verification step.
pub struct VerifiedArchive {
    /// The archive file inside `local_dir`.
    pub archive: PathBuf,
    /// Scratch directory holding the extracted entries.
    pub scratch_dir: PathBuf,
}

/// Download a partner archive and verify it, in strict order: checksum,
/// size, decompression, extracted file count.
///
/// Any failure maps to its distinct catalog code; the first failing step
/// aborts. Nothing is committed to the storage backend here.
pub async fn download_and_verify(
    client: &reqwest::Client,
    download_path: &str,
    file_name: &str,
    expected_checksum: &str,
    expected_size: u64,
    expected_count: usize,
    local_dir: &Path,
) -> Result<VerifiedArchive, (ErrorCode, Option<String>)> {
    let download_url = format!("{}/{}", download_path.trim_end_matches('/'), file_name);
    info!("downloading file from {}", download_url);

    let response = client
        .get(&download_url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .map_err(|err| {
            error!("download failed: {err}");
            (
                ErrorCode::UNREACHABLE_DOWNLOAD_PATH,
                Some(download_url.clone()),
            )
        })?;

    if response.status().as_u16() != 200 {
        return Err((
            ErrorCode::UNREACHABLE_DOWNLOAD_PATH,
            Some(download_url.clone()),
        ));
    }

    fs::create_dir_all(local_dir)
        .await
        .map_err(|_| (ErrorCode::UNEXPECTED_ERROR, Some(file_name.to_string())))?;
    let archive = local_dir.join(file_name);

    // 1 - stream to disk, hashing as we go
    let mut digest = Md5Context::new();
    let mut file = fs::File::create(&archive)
        .await
        .map_err(|_| (ErrorCode::UNEXPECTED_ERROR, Some(file_name.to_string())))?;
    let mut response = response;
    loop {
        let chunk = response
            .chunk()
            .await
            .map_err(|_| (ErrorCode::UNREACHABLE_DOWNLOAD_PATH, Some(download_url.clone())))?;
        let Some(chunk) = chunk else { break };
        digest.consume(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|_| (ErrorCode::UNEXPECTED_ERROR, Some(file_name.to_string())))?;
    }
    file.flush()
        .await
        .map_err(|_| (ErrorCode::UNEXPECTED_ERROR, Some(file_name.to_string())))?;
    drop(file);

    // 2 - verify checksum
    let local_checksum = format!("{:x}", digest.compute());
    if !local_checksum.eq_ignore_ascii_case(expected_checksum) {
        return Err((
            ErrorCode::CHECKSUM_DOESNT_MATCH,
            Some(file_name.to_string()),
        ));
    }
    info!("file checksum verified for {}", archive.display());

    // 3 - verify size
    let local_size = fs::metadata(&archive)
        .await
        .map(|m| m.len())
        .map_err(|_| (ErrorCode::UNEXPECTED_ERROR, Some(file_name.to_string())))?;
    if local_size != expected_size {
        error!(
            "file size {} for {}, expected {}",
            local_size,
            archive.display(),
            expected_size
        );
        return Err((
            ErrorCode::FILESIZE_DOESNT_MATCH,
            Some(file_name.to_string()),
        ));
    }
    info!("file size verified for {}", archive.display());

    // 4 - decompress into a scratch directory
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "scratch".into());
    let scratch_dir = local_dir.join(stem);
    if fs::try_exists(&scratch_dir).await.unwrap_or(false) {
        let _ = fs::remove_dir_all(&scratch_dir).await;
    }

    let extracted = zips::extract(&archive, &scratch_dir).await.map_err(|err| {
        let code = match err {
            zips::ZipError::FileNotFound(_) => ErrorCode::UNZIP_ERROR_FILE_NOT_FOUND,
            zips::ZipError::InvalidArchive(_) => ErrorCode::UNZIP_ERROR_INVALID_FILE,
            _ => ErrorCode::UNEXPECTED_ERROR,
        };
        (code, Some(file_name.to_string()))
    })?;
    info!("unzipped {} files from {}", extracted, archive.display());

    // 5 - verify extracted file count
    if extracted != expected_count {
        error!("expected {} files for {}", expected_count, archive.display());
        let _ = fs::remove_dir_all(&scratch_dir).await;
        return Err((
            ErrorCode::UNZIP_ERROR_WRONG_FILECOUNT,
            Some(file_name.to_string()),
        ));
    }
    info!("file count verified for {}", archive.display());

    Ok(VerifiedArchive {
        archive,
        scratch_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retry_n_stops_after_bound() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), &str> = retry_n(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_n_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let result: Result<usize, &str> = retry_n(5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("again") } else { Ok(n) } }
        })
        .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn runner_tracks_status_to_completion() {
        let runner = TaskRunner::new();
        let id = runner.submit(|ctx| async move {
            ctx.progress(Some(2), 1, 0);
            ctx.complete(serde_json::json!({"done": true}));
        });

        // submission publishes a status before the task even runs
        assert!(runner.status(&id).is_some());

        // poll until the spawned task publishes its final state
        for _ in 0..50 {
            if let Some(status) = runner.status(&id) {
                if status.state == TaskState::Completed {
                    assert_eq!(status.result, Some(serde_json::json!({"done": true})));
                    return;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("task never completed");
    }
}
