//! Batch ingestion task.
//!
//! Downloads a partner-supplied archive, verifies it (checksum, size,
//! extracted file count, in that order) and commits the original archive
//! into the batch's storage-backend collection. Any failed verification
//! aborts the task with its own catalog code and leaves nothing in the
//! backend.

use crate::{
    errors::ErrorCode,
    models::payload::RequestPayload,
    services::Services,
    tasks::{COMMIT_TIMEOUT, TaskContext, download_and_verify, notify_error},
};
use serde_json::json;
use std::sync::Arc;
use tokio::{fs, time::timeout};
use tracing::info;

pub async fn ingest_batch(
    ctx: TaskContext,
    svc: Arc<Services>,
    batch_id: String,
    mut payload: RequestPayload,
) {
    info!("task {} (ingest_batch) for batch {}", ctx.id(), batch_id);

    if !payload.parameters.is_object() {
        return notify_error(
            ErrorCode::MISSING_BATCHES_PARAMETER,
            &mut payload,
            false,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    }
    let backdoor = payload.take_backdoor();

    // structural parameter checks abort the task immediately
    if payload.str_param("batch_number").is_none() {
        return notify_error(
            ErrorCode::MISSING_BATCH_NUMBER_PARAM,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    }
    let Some(download_path) = payload.str_param("download_path") else {
        return notify_error(
            ErrorCode::MISSING_DOWNLOAD_PATH_PARAM,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    };
    if download_path.is_empty() {
        return notify_error(
            ErrorCode::EMPTY_DOWNLOAD_PATH_PARAM,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    }
    let file_count = match payload.int_param("data_file_count") {
        None => {
            return notify_error(
                ErrorCode::MISSING_FILECOUNT_PARAM,
                &mut payload,
                backdoor,
                &ctx,
                &svc.notifier,
                None,
                None,
            )
            .await;
        }
        Some(Err(())) => {
            return notify_error(
                ErrorCode::INVALID_FILECOUNT_PARAM,
                &mut payload,
                backdoor,
                &ctx,
                &svc.notifier,
                None,
                None,
            )
            .await;
        }
        Some(Ok(n)) => n.max(0) as usize,
    };
    let Some(file_name) = payload.str_param("file_name") else {
        return notify_error(
            ErrorCode::MISSING_FILENAME_PARAM,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    };
    let file_size = match payload.int_param("file_size") {
        None => {
            return notify_error(
                ErrorCode::MISSING_FILESIZE_PARAM,
                &mut payload,
                backdoor,
                &ctx,
                &svc.notifier,
                None,
                None,
            )
            .await;
        }
        Some(Err(())) => {
            return notify_error(
                ErrorCode::INVALID_FILESIZE_PARAM,
                &mut payload,
                backdoor,
                &ctx,
                &svc.notifier,
                None,
                None,
            )
            .await;
        }
        Some(Ok(n)) => n.max(0) as u64,
    };
    let Some(file_checksum) = payload.str_param("file_checksum") else {
        return notify_error(
            ErrorCode::MISSING_CHECKSUM_PARAM,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    };

    let collection = svc.config.batch_collection(&batch_id);
    match svc.storage.is_collection(&collection).await {
        Ok(true) => {}
        Ok(false) => {
            return notify_error(
                ErrorCode::BATCH_NOT_FOUND,
                &mut payload,
                backdoor,
                &ctx,
                &svc.notifier,
                None,
                None,
            )
            .await;
        }
        Err(err) => {
            return notify_error(
                ErrorCode::UNEXPECTED_ERROR,
                &mut payload,
                backdoor,
                &ctx,
                &svc.notifier,
                None,
                Some(err.to_string()),
            )
            .await;
        }
    }

    let local_dir = svc.config.batch_staging(&batch_id);
    let verified = match download_and_verify(
        &svc.http,
        &download_path,
        &file_name,
        &file_checksum,
        file_size,
        file_count,
        &local_dir,
    )
    .await
    {
        Ok(verified) => verified,
        Err((code, subject)) => {
            return notify_error(code, &mut payload, backdoor, &ctx, &svc.notifier, subject, None)
                .await;
        }
    };

    // the extracted entries were only needed for the count check
    let _ = fs::remove_dir_all(&verified.scratch_dir).await;

    // commit the original archive; a failure here leaves the verified
    // local copy in place (at-least-once boundary, no rollback)
    let remote = format!("{}/{}", collection, file_name);
    let commit = timeout(
        COMMIT_TIMEOUT,
        svc.storage.put(&verified.archive, &remote),
    )
    .await;
    match commit {
        Ok(Ok(())) => info!("copied: {}", remote),
        Ok(Err(err)) => {
            return notify_error(
                ErrorCode::UNEXPECTED_ERROR,
                &mut payload,
                backdoor,
                &ctx,
                &svc.notifier,
                Some(verified.archive.display().to_string()),
                Some(err.to_string()),
            )
            .await;
        }
        Err(_) => {
            return notify_error(
                ErrorCode::UNEXPECTED_ERROR,
                &mut payload,
                backdoor,
                &ctx,
                &svc.notifier,
                Some(verified.archive.display().to_string()),
                Some("storage backend commit timed out".into()),
            )
            .await;
        }
    }

    let delivered = svc.notifier.post(&mut payload, backdoor).await;
    info!("import manager call = {}", delivered);
    ctx.complete(json!({ "batch_id": batch_id, "file_name": file_name }));
}
