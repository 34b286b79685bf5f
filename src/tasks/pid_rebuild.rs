//! PID cache rebuild.
//!
//! Walks a storage-backend collection and backfills the PID cache from
//! the `PID` metadata mirrored onto each production object. Files already
//! cached are skipped; files without a PID count as errors.

use crate::{
    services::Services,
    tasks::{TaskContext, retry_n},
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

const METADATA_RETRIES: usize = 2;
const METADATA_BACKOFF: Duration = Duration::from_millis(200);

/// Every data object under `collection`, depth first.
async fn collect_files(svc: &Services, collection: &str) -> Vec<String> {
    let mut files = Vec::new();
    let mut pending = vec![collection.to_string()];
    while let Some(path) = pending.pop() {
        match svc.storage.list(&path).await {
            Ok(entries) => {
                for entry in entries {
                    if entry.is_dataobject() {
                        files.push(entry.path);
                    } else {
                        pending.push(entry.path);
                    }
                }
            }
            Err(err) => warn!("cannot list {}: {err}", path),
        }
    }
    files
}

pub async fn rebuild_pid_cache(ctx: TaskContext, svc: Arc<Services>, collection: String) {
    info!("task {} (rebuild_pid_cache) on {}", ctx.id(), collection);

    let files = collect_files(&svc, &collection).await;
    let total = files.len();
    info!("found {} files", total);
    ctx.starting(Some(total));

    let mut skipped = 0usize;
    let mut cached = 0usize;
    let mut errors = 0usize;

    for (n, file) in files.iter().enumerate() {
        if let Ok(Some(pid)) = svc.cache.peek(file).await {
            skipped += 1;
            info!("{}: file {} already cached with PID {}", n + 1, file, pid);
            ctx.progress(Some(total), cached, errors);
            continue;
        }

        let storage = svc.storage.clone();
        let metadata = retry_n(METADATA_RETRIES, METADATA_BACKOFF, move || {
            let storage = storage.clone();
            let file = file.clone();
            async move { storage.get_metadata(&file).await }
        })
        .await;

        let pid = metadata.ok().and_then(|m| m.get("PID").cloned());
        let Some(pid) = pid else {
            errors += 1;
            warn!("{}: file {} has no PID assigned", n + 1, file);
            ctx.progress(Some(total), cached, errors);
            continue;
        };

        if let Err(err) = svc.cache.write_through(&pid, file).await {
            errors += 1;
            warn!("cache write failed for {}: {err}", pid);
            ctx.progress(Some(total), cached, errors);
            continue;
        }
        cached += 1;
        ctx.progress(Some(total), cached, errors);
    }

    info!(
        "rebuild finished: total={} skipped={} cached={} errors={}",
        total, skipped, cached, errors
    );
    ctx.complete(json!({
        "total": total,
        "skipped": skipped,
        "cached": cached,
        "errors": errors,
    }));
}
