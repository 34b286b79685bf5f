//! Order assembly tasks.
//!
//! Unrestricted orders resolve PIDs against the cache (with durable-store
//! fallback) and zip the resolved production files. Restricted orders
//! take partner-uploaded zips directly and merge them into any archive
//! the order already has, writing a `.bak` backup before the destructive
//! overwrite. Archives over the size limit are split into numbered parts
//! by the external `zipsplit` utility; entries too large to split are
//! segregated into single-entry archives.

use crate::{
    errors::ErrorCode,
    models::payload::{ErrorEntry, RequestPayload},
    services::{Services, zips},
    tasks::{COMMIT_TIMEOUT, TaskContext, download_and_verify, notify_error},
};
use serde_json::{Value, json};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, time::timeout};
use tracing::{info, warn};

/// Canonical name of an order archive:
/// `order_<id>_<restricted|unrestricted>[<index>].zip`.
pub fn order_zip_file_name(order_id: &str, restricted: bool, index: Option<&str>) -> String {
    let label = if restricted { "restricted" } else { "unrestricted" };
    match index {
        Some(index) => format!("order_{order_id}_{label}{index}.zip"),
        None => format!("order_{order_id}_{label}.zip"),
    }
}

/// Upload every split part, renaming by the trailing-index convention.
///
/// Returns the number of uploaded parts. A name without a parseable index
/// or a failed upload aborts the whole step.
async fn upload_split_parts(
    svc: &Services,
    split_dir: &Path,
    base_filename: &str,
    order_collection: &str,
) -> Result<usize, (ErrorCode, Option<String>, Option<String>)> {
    let mut uploaded = 0usize;
    let mut dir = fs::read_dir(split_dir)
        .await
        .map_err(|err| (ErrorCode::UNEXPECTED_ERROR, None, Some(err.to_string())))?;

    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|err| (ErrorCode::UNEXPECTED_ERROR, None, Some(err.to_string())))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(index) = zips::split_index(&name) else {
            return Err((
                ErrorCode::INVALID_ZIP_SPLIT_OUTPUT,
                None,
                Some(format!("cannot extract index from zip name: {name}")),
            ));
        };

        let part_name = format!("{base_filename}{index}.zip");
        let remote = format!("{order_collection}/{part_name}");
        info!("uploading {} -> {}", entry.path().display(), remote);
        let put = timeout(COMMIT_TIMEOUT, svc.storage.put(&entry.path(), &remote)).await;
        match put {
            Ok(Ok(())) => uploaded += 1,
            Ok(Err(err)) => {
                return Err((
                    ErrorCode::UNEXPECTED_ERROR,
                    Some(entry.path().display().to_string()),
                    Some(err.to_string()),
                ));
            }
            Err(_) => {
                return Err((
                    ErrorCode::UNEXPECTED_ERROR,
                    Some(entry.path().display().to_string()),
                    Some("storage backend upload timed out".into()),
                ));
            }
        }
    }
    Ok(uploaded)
}

fn map_split_error(err: zips::ZipError, input: &Path) -> (ErrorCode, Option<String>, Option<String>) {
    match err {
        zips::ZipError::SplitEntryTooLarge { detail } => {
            (ErrorCode::ZIP_SPLIT_ENTRY_TOO_LARGE, None, detail)
        }
        other => (
            ErrorCode::ZIP_SPLIT_ERROR,
            None,
            Some(format!("{} ({})", other, input.display())),
        ),
    }
}

pub async fn unrestricted_order(
    ctx: TaskContext,
    svc: Arc<Services>,
    order_id: String,
    mut payload: RequestPayload,
) {
    info!("task {} (unrestricted_order) for order {}", ctx.id(), order_id);

    let backdoor = payload.take_backdoor();
    let pids: Vec<String> = payload
        .parameters
        .get("pids")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let total = pids.len();
    ctx.starting(Some(total));

    let zip_file_name = order_zip_file_name(&order_id, false, None);
    let order_dir = svc.config.order_local(&order_id);
    let local_zip_dir = order_dir.join("tobezipped");
    let oversize_dir = order_dir.join("oversize_files");
    if let Err(err) = fs::create_dir_all(&local_zip_dir).await {
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

    // --- resolve PIDs: cache hit first, durable-store fallback ---
    info!("retrieving paths for {} PIDs", total);
    let mut files: Vec<(String, String)> = Vec::new();
    let mut errors: Vec<ErrorEntry> = Vec::new();
    let mut counter = 0usize;
    let mut verified = 0usize;

    for pid in &pids {
        // malformed identifiers are silently skipped
        if !pid.contains('/') || pid.len() < 10 {
            continue;
        }

        match svc.cache.resolve(pid).await {
            Ok(Some(path)) => {
                files.push((pid.clone(), path));
                verified += 1;
                ctx.progress_verified(Some(total), counter, verified, errors.len());
            }
            Ok(None) => {
                warn!("PID not found: {}", pid);
                errors.push(ErrorEntry::new(ErrorCode::PID_NOT_FOUND, Some(pid.clone())));
                ctx.progress_verified(Some(total), counter, verified, errors.len());
            }
            Err(err) => {
                warn!("PID resolution failed for {}: {}", pid, err);
                errors.push(ErrorEntry::new(ErrorCode::PID_NOT_FOUND, Some(pid.clone())));
                ctx.progress_verified(Some(total), counter, verified, errors.len());
            }
        }
    }
    info!("retrieved paths for {} PIDs", files.len());

    // --- recover files into the to-be-zipped scratch directory ---
    for (pid, path) in &files {
        let filename = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        let local_file = local_zip_dir.join(&filename);

        let already = fs::metadata(&local_file).await.map(|m| m.len()).unwrap_or(0);
        if already == 0 {
            if let Err(err) = svc.storage.get(path, &local_file).await {
                warn!("unable to fetch {} for {}: {}", path, pid, err);
                errors.push(ErrorEntry::new(
                    ErrorCode::UNABLE_TO_DOWNLOAD_FILE,
                    Some(pid.clone()),
                ));
                ctx.progress_verified(Some(total), counter, verified, errors.len());
                continue;
            }
        }

        counter += 1;
        if counter % 1000 == 0 {
            ctx.progress_verified(Some(total), counter, verified, errors.len());
            info!("{} pids already processed", counter);
        }
    }

    let zip_path = order_dir.join(&zip_file_name);
    let mut subzip_counter = 0usize;

    if counter > 0 {
        let split_dir = order_dir.join("unrestricted_zip_split");
        let base_filename = zip_file_name.trim_end_matches(".zip").to_string();
        let order_collection = svc.config.order_collection(&order_id);

        // --- zip the scratch directory ---
        let existing = fs::metadata(&zip_path).await.map(|m| m.len()).unwrap_or(0);
        if existing == 0 {
            if let Err(err) = zips::archive_dir(&local_zip_dir, &zip_path).await {
                return notify_error(
                    ErrorCode::UNABLE_TO_CREATE_ZIP_FILE,
                    &mut payload,
                    backdoor,
                    &ctx,
                    &svc.notifier,
                    Some(zip_file_name.clone()),
                    Some(err.to_string()),
                )
                .await;
            }
            info!("compressed in: {}", zip_path.display());
        }

        let zip_size = fs::metadata(&zip_path).await.map(|m| m.len()).unwrap_or(0);
        if zip_size > svc.config.max_zip_size {
            warn!("zip too large, splitting {}", zip_path.display());

            // segregate entries that can never fit a split part
            let mut moved_oversize = 0usize;
            if let Ok(mut dir) = fs::read_dir(&local_zip_dir).await {
                while let Ok(Some(entry)) = dir.next_entry().await {
                    let len = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                    if len >= svc.config.max_zip_size {
                        let _ = fs::create_dir_all(&oversize_dir).await;
                        let _ = fs::rename(
                            entry.path(),
                            oversize_dir.join(entry.file_name()),
                        )
                        .await;
                        moved_oversize += 1;
                    }
                }
            }

            let remaining = match fs::read_dir(&local_zip_dir).await {
                Ok(mut dir) => {
                    let mut n = 0usize;
                    while let Ok(Some(_)) = dir.next_entry().await {
                        n += 1;
                    }
                    n
                }
                Err(_) => 0,
            };

            let tmp_zip = order_dir.join(format!("{base_filename}_tmp.zip"));
            let to_split: Option<PathBuf> = if moved_oversize > 0 {
                info!("{} oversize files found", moved_oversize);
                if remaining > 0 {
                    if let Err(err) = zips::archive_dir(&local_zip_dir, &tmp_zip).await {
                        return notify_error(
                            ErrorCode::UNABLE_TO_CREATE_ZIP_FILE,
                            &mut payload,
                            backdoor,
                            &ctx,
                            &svc.notifier,
                            Some(zip_file_name.clone()),
                            Some(err.to_string()),
                        )
                        .await;
                    }
                    Some(tmp_zip.clone())
                } else {
                    // everything is oversize, nothing left to split
                    None
                }
            } else {
                Some(zip_path.clone())
            };

            let _ = fs::remove_dir_all(&split_dir).await;
            if let Err(err) = fs::create_dir_all(&split_dir).await {
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

            if let Some(input) = to_split {
                if let Err(err) = zips::split(
                    &svc.config.zipsplit_bin,
                    svc.config.max_zip_size,
                    &split_dir,
                    &input,
                )
                .await
                {
                    let (code, subject, extra) = map_split_error(err, &input);
                    return notify_error(
                        code, &mut payload, backdoor, &ctx, &svc.notifier, subject, extra,
                    )
                    .await;
                }
            }

            // oversize entries become single-entry archives of their own
            if moved_oversize > 0 {
                let mut index = {
                    let mut n = 0usize;
                    if let Ok(mut dir) = fs::read_dir(&split_dir).await {
                        while let Ok(Some(_)) = dir.next_entry().await {
                            n += 1;
                        }
                    }
                    n + 1
                };
                if let Ok(mut dir) = fs::read_dir(&oversize_dir).await {
                    while let Ok(Some(entry)) = dir.next_entry().await {
                        let dest = split_dir.join(format!("oversize{index}.zip"));
                        if let Err(err) = zips::archive_single(&entry.path(), &dest).await {
                            return notify_error(
                                ErrorCode::UNABLE_TO_CREATE_ZIP_FILE,
                                &mut payload,
                                backdoor,
                                &ctx,
                                &svc.notifier,
                                Some(entry.file_name().to_string_lossy().to_string()),
                                Some(err.to_string()),
                            )
                            .await;
                        }
                        index += 1;
                    }
                }
                let _ = fs::remove_dir_all(&oversize_dir).await;
            }

            match upload_split_parts(&svc, &split_dir, &base_filename, &order_collection).await {
                Ok(count) => subzip_counter = count,
                Err((code, subject, extra)) => {
                    return notify_error(
                        code, &mut payload, backdoor, &ctx, &svc.notifier, subject, extra,
                    )
                    .await;
                }
            }
            let _ = fs::remove_dir_all(&split_dir).await;
            let _ = fs::remove_file(&tmp_zip).await;
        } else {
            // single archive, committed as-is
            let remote = format!("{order_collection}/{zip_file_name}");
            let put = timeout(COMMIT_TIMEOUT, svc.storage.put(&zip_path, &remote)).await;
            if !matches!(put, Ok(Ok(()))) {
                return notify_error(
                    ErrorCode::UNEXPECTED_ERROR,
                    &mut payload,
                    backdoor,
                    &ctx,
                    &svc.notifier,
                    Some(zip_file_name.clone()),
                    None,
                )
                .await;
            }
        }
    }

    // scratch data is no longer needed
    info!("deleting the temp dir: {}", local_zip_dir.display());
    let _ = fs::remove_dir_all(&local_zip_dir).await;

    // --- import-manager notification ---
    let zipcount = if subzip_counter > 0 {
        subzip_counter
    } else if counter > 0 {
        1
    } else {
        0
    };
    let zipfile_label = payload
        .str_param("file_name")
        .unwrap_or_else(|| zip_file_name.clone());
    let original_request_id = payload.request_id.clone();
    payload.parameters = json!({
        "request_id": original_request_id,
        "order_number": order_id,
        "zipfile_name": zipfile_label,
        "file_count": counter,
        "zipfile_count": zipcount,
    });
    payload.request_id = ctx.id().to_string();
    if !errors.is_empty() {
        payload.errors = Some(errors.clone());
    }
    let delivered = svc.notifier.post(&mut payload, backdoor).await;
    info!("import manager call = {}", delivered);

    ctx.complete(json!({
        "total": total,
        "step": counter,
        "verified": verified,
        "errors": errors.len(),
        "zip": zip_path.display().to_string(),
    }));
}

/// Fetch the existing order archive, append the freshly extracted entries
/// and overwrite it, backing the previous version up first.
///
/// The `.bak` write strictly precedes the destructive overwrite.
pub async fn merge_into_existing(
    svc: &Services,
    remote_zip: &str,
    local_final: &Path,
    scratch_dir: &Path,
) -> Result<(), (ErrorCode, Option<String>, Option<String>)> {
    info!("already exists, merge zip files");

    let fetched = timeout(COMMIT_TIMEOUT, svc.storage.get(remote_zip, local_final)).await;
    if !matches!(fetched, Ok(Ok(()))) {
        return Err((
            ErrorCode::UNEXPECTED_ERROR,
            Some(remote_zip.to_string()),
            None,
        ));
    }

    if let Err(err) = zips::append_dir(local_final, scratch_dir).await {
        let code = match err {
            zips::ZipError::FileNotFound(_) => ErrorCode::UNZIP_ERROR_FILE_NOT_FOUND,
            zips::ZipError::InvalidArchive(_) => ErrorCode::UNZIP_ERROR_INVALID_FILE,
            _ => ErrorCode::UNABLE_TO_CREATE_ZIP_FILE,
        };
        return Err((code, Some(remote_zip.to_string()), None));
    }

    info!("creating a backup copy of the final zip");
    let backup_zip = format!("{}.bak", remote_zip.trim_end_matches(".zip"));
    let backup = timeout(COMMIT_TIMEOUT, async {
        if svc.storage.is_dataobject(&backup_zip).await? {
            info!("{} already exists, removing previous backup", backup_zip);
            svc.storage.remove(&backup_zip, false).await?;
        }
        svc.storage.move_to(remote_zip, &backup_zip).await?;
        info!("uploading final updated zip");
        svc.storage.put(local_final, remote_zip).await
    })
    .await;
    if !matches!(backup, Ok(Ok(()))) {
        return Err((
            ErrorCode::UNEXPECTED_ERROR,
            Some(remote_zip.to_string()),
            None,
        ));
    }

    Ok(())
}

pub async fn restricted_order(
    ctx: TaskContext,
    svc: Arc<Services>,
    order_id: String,
    mut payload: RequestPayload,
) {
    info!("task {} (restricted_order) for order {}", ctx.id(), order_id);

    payload.adopt_request_id(&ctx.id().to_string());
    let backdoor = payload.take_backdoor();

    let order_collection = svc.config.order_collection(&order_id);
    match svc.storage.is_collection(&order_collection).await {
        Ok(true) => {}
        _ => {
            return notify_error(
                ErrorCode::ORDER_NOT_FOUND,
                &mut payload,
                backdoor,
                &ctx,
                &svc.notifier,
                None,
                None,
            )
            .await;
        }
    }

    // --- structural parameter checks ---
    let required: [(&str, ErrorCode); 7] = [
        ("order_number", ErrorCode::MISSING_ORDER_NUMBER_PARAM),
        ("download_path", ErrorCode::MISSING_DOWNLOAD_PATH_PARAM),
        ("zipfile_name", ErrorCode::MISSING_ZIPFILENAME_PARAM),
        ("file_name", ErrorCode::MISSING_FILENAME_PARAM),
        ("file_size", ErrorCode::MISSING_FILESIZE_PARAM),
        ("data_file_count", ErrorCode::MISSING_FILECOUNT_PARAM),
        ("file_checksum", ErrorCode::MISSING_CHECKSUM_PARAM),
    ];
    for (key, code) in required {
        if payload.parameters.get(key).is_none() {
            return notify_error(code, &mut payload, backdoor, &ctx, &svc.notifier, None, None)
                .await;
        }
        if key == "download_path" && payload.str_param(key).as_deref() == Some("") {
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
    }

    let download_path = payload.str_param("download_path").unwrap_or_default();
    let mut zipfile_name = payload.str_param("zipfile_name").unwrap_or_default();
    if zipfile_name.ends_with(".zip") {
        warn!("{} already contains extension .zip", zipfile_name);
    } else {
        zipfile_name.push_str(".zip");
    }
    let base_filename = zipfile_name.trim_end_matches(".zip").to_string();
    let final_remote = format!("{order_collection}/{zipfile_name}");

    let mut file_name = payload.str_param("file_name").unwrap_or_default();
    if !file_name.ends_with(".zip") {
        file_name.push_str(".zip");
    }
    let file_size = match payload.int_param("file_size") {
        Some(Ok(n)) => n.max(0) as u64,
        _ => {
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
    };
    let file_count = match payload.int_param("data_file_count") {
        Some(Ok(n)) => n.max(0) as usize,
        _ => {
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
    };
    let file_checksum = payload.str_param("file_checksum").unwrap_or_default();

    info!("order_id = {}", order_id);
    info!("final_zip = {}", final_remote);
    ctx.progress(None, 0, 0);

    // --- download and verify the partner zip ---
    let local_dir = svc.config.order_local(&order_id);
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

    // --- first delivery is a plain upload; repeats merge ---
    let local_final: PathBuf;
    match svc.storage.exists(&final_remote).await {
        Ok(false) => {
            info!("final zip does not exist, copying partial zip");
            let put = timeout(
                COMMIT_TIMEOUT,
                svc.storage.put(&verified.archive, &final_remote),
            )
            .await;
            match put {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!("upload failed: {err}");
                    return notify_error(
                        ErrorCode::BACKEND_UPLOAD_ERROR,
                        &mut payload,
                        backdoor,
                        &ctx,
                        &svc.notifier,
                        Some(file_name.clone()),
                        None,
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
                        Some(file_name.clone()),
                        Some("storage backend upload timed out".into()),
                    )
                    .await;
                }
            }
            local_final = verified.archive.clone();
        }
        Ok(true) => {
            local_final = local_dir.join(&zipfile_name);
            if let Err((code, subject, extra)) =
                merge_into_existing(&svc, &final_remote, &local_final, &verified.scratch_dir).await
            {
                return notify_error(
                    code, &mut payload, backdoor, &ctx, &svc.notifier, subject, extra,
                )
                .await;
            }
        }
        Err(err) => {
            return notify_error(
                ErrorCode::UNEXPECTED_ERROR,
                &mut payload,
                backdoor,
                &ctx,
                &svc.notifier,
                Some(final_remote.clone()),
                Some(err.to_string()),
            )
            .await;
        }
    }

    let _ = fs::remove_dir_all(&verified.scratch_dir).await;

    // --- split the merged archive when it grows past the limit ---
    let final_size = fs::metadata(&local_final).await.map(|m| m.len()).unwrap_or(0);
    if final_size > svc.config.max_zip_size {
        warn!("zip too large, splitting {}", local_final.display());

        let split_dir = local_dir.join("restricted_zip_split");
        let _ = fs::remove_dir_all(&split_dir).await;
        if let Err(err) = fs::create_dir_all(&split_dir).await {
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

        if let Err(err) = zips::split(
            &svc.config.zipsplit_bin,
            svc.config.max_zip_size,
            &split_dir,
            &local_final,
        )
        .await
        {
            let (code, subject, extra) = map_split_error(err, &local_final);
            return notify_error(code, &mut payload, backdoor, &ctx, &svc.notifier, subject, extra)
                .await;
        }

        if let Err((code, subject, extra)) =
            upload_split_parts(&svc, &split_dir, &base_filename, &order_collection).await
        {
            return notify_error(code, &mut payload, backdoor, &ctx, &svc.notifier, subject, extra)
                .await;
        }
        let _ = fs::remove_dir_all(&split_dir).await;
    }

    let delivered = svc.notifier.post(&mut payload, backdoor).await;
    info!("import manager call = {}", delivered);

    ctx.complete(json!({
        "order_id": order_id,
        "zip": final_remote,
    }));
}
