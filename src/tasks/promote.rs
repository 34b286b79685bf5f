//! Production promotion and PID assignment.
//!
//! Copies verified batch files into the production collection, assigns
//! each a globally unique PID, writes the PID cache through and attaches
//! the domain metadata. Entries are processed independently: one entry's
//! failure is recorded and the task moves on to the next.

use crate::{
    errors::ErrorCode,
    models::payload::{ErrorEntry, METADATA_KEYS, MISSING_METADATA_VALUE, RequestPayload},
    services::{Services, records::RecordError},
    tasks::{COMMIT_TIMEOUT, MAX_PID_RETRIES, TaskContext, notify_error, retry_n},
};
use serde_json::{Value, json};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{fs, time::timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Sentinel PID used when the backdoor skips assignment entirely.
const BACKDOOR_PID: &str = "NO_PID_WITH_BACKDOOR";

const PID_RETRY_BACKOFF: Duration = Duration::from_millis(100);

pub async fn promote_batch(
    ctx: TaskContext,
    svc: Arc<Services>,
    batch_id: String,
    mut payload: RequestPayload,
) {
    info!("task {} (promote_batch) for batch {}", ctx.id(), batch_id);
    ctx.starting(None);

    let backdoor = payload.take_backdoor();

    let Some(elements) = payload
        .parameters
        .get("pids")
        .and_then(Value::as_array)
        .cloned()
    else {
        return notify_error(
            ErrorCode::MISSING_PIDS_LIST,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    };

    let total = elements.len();
    let staging = svc.config.batch_staging(&batch_id);
    let mut errors: Vec<ErrorEntry> = Vec::new();
    let mut out_data: Vec<Value> = Vec::new();
    let mut step = 0usize;
    ctx.progress(Some(total), step, errors.len());

    for mut element in elements {
        let temp_id = element
            .get("temp_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let record_id = element
            .get("format_n_code")
            .and_then(Value::as_str)
            .map(str::to_string);

        // 1. the source must exist and be a non-empty file
        let source = staging.join(&temp_id);
        let source_len = fs::metadata(&source)
            .await
            .map(|m| if m.is_file() { m.len() } else { 0 })
            .unwrap_or(0);
        if temp_id.is_empty() || source_len == 0 {
            error!("NOT found: {}", source.display());
            errors.push(ErrorEntry::new(
                ErrorCode::INGESTION_FILE_NOT_FOUND,
                record_id,
            ));
            ctx.progress(Some(total), step, errors.len());
            continue;
        }
        info!("found: {}", source.display());

        // 2. copy into the production collection
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| temp_id.clone());
        let production_path = svc.config.production_path(&file_name);
        let copied = timeout(COMMIT_TIMEOUT, svc.storage.put(&source, &production_path)).await;
        if !matches!(copied, Ok(Ok(()))) {
            error!("cannot copy {} into production", source.display());
            errors.push(ErrorEntry::new(
                ErrorCode::UNABLE_TO_MOVE_IN_PRODUCTION,
                record_id,
            ));
            ctx.progress(Some(total), step, errors.len());
            continue;
        }
        info!("file copied to production: {}", production_path);

        // 3. assign a PID; uid collisions regenerate and retry
        let pid = if backdoor {
            warn!("backdoor enabled: skipping PID request");
            BACKDOOR_PID.to_string()
        } else {
            let records = svc.records.clone();
            let prefix = svc.config.uid_prefix.clone();
            let path = production_path.clone();
            let assigned = retry_n(MAX_PID_RETRIES, PID_RETRY_BACKOFF, move || {
                let records = records.clone();
                let candidate = format!("{}/{}", prefix, Uuid::new_v4());
                let path = path.clone();
                async move { records.create(&candidate, &path).await }
            })
            .await;

            let record = match assigned {
                Ok(record) => record,
                Err(err) => {
                    if !matches!(err, RecordError::DuplicateUid) {
                        error!("PID assignment failed: {err}");
                    }
                    errors.push(ErrorEntry::new(ErrorCode::UNABLE_TO_ASSIGN_PID, record_id));
                    ctx.progress(Some(total), step, errors.len());
                    continue;
                }
            };

            // 4. write the cache through in both directions
            if let Err(err) = svc.cache.write_through(&record.uid, &production_path).await {
                error!("PID cache write failed: {err}");
                errors.push(ErrorEntry::new(ErrorCode::UNABLE_TO_ASSIGN_PID, record_id));
                ctx.progress(Some(total), step, errors.len());
                continue;
            }
            record.uid
        };
        info!("PID: {}", pid);

        // 5. attach the domain metadata
        let mut content: HashMap<String, String> = HashMap::new();
        for key in METADATA_KEYS {
            let value = element
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(MISSING_METADATA_VALUE);
            content.insert(key.to_string(), value.to_string());
        }
        content.insert("PID".into(), pid.clone());

        if !backdoor {
            if let Err(err) = svc.records.attach_metadata(&pid, &content).await {
                error!("metadata attach failed for {pid}: {err}");
                errors.push(ErrorEntry::new(
                    ErrorCode::UNABLE_TO_SET_METADATA,
                    record_id,
                ));
                ctx.progress(Some(total), step, errors.len());
                continue;
            }
            // mirror the PID onto the production object itself so the
            // cache can be rebuilt from storage alone
            if let Err(err) = svc
                .storage
                .set_metadata(&production_path, "PID", &pid)
                .await
            {
                warn!("could not mirror PID metadata onto {production_path}: {err}");
            }
        }

        if let Some(map) = element.as_object_mut() {
            map.insert("pid".into(), Value::String(pid));
        }
        out_data.push(element);

        step += 1;
        ctx.progress(Some(total), step, errors.len());
    }

    if let Some(map) = payload.parameters.as_object_mut() {
        map.insert("pids".into(), Value::Array(out_data.clone()));
    }
    if !errors.is_empty() {
        payload.errors = Some(errors.clone());
    }
    let delivered = svc.notifier.post(&mut payload, backdoor).await;
    info!("import manager call = {}", delivered);

    ctx.complete(json!({
        "total": total,
        "step": step,
        "errors": errors.len(),
        "out": out_data,
    }));
}
