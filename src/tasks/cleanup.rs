//! Batch and order deletion tasks.
//!
//! Each id in the request is processed independently; failures accumulate
//! and processing continues. Eviction of cache/record entries for files
//! under a deleted tree is configurable and off by default.

use crate::{
    errors::ErrorCode,
    models::payload::{ErrorEntry, RequestPayload},
    services::Services,
    tasks::{REMOVE_TIMEOUT, TaskContext, notify_error},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::{fs, time::timeout};
use tracing::{info, warn};

fn take_id_list(payload: &mut RequestPayload, key: &str) -> Option<Vec<String>> {
    let list = payload.parameters.as_object_mut()?.remove(key)?;
    let list = list.as_array()?;
    Some(
        list.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

/// Drop cache pairs and records for every path under `prefix`.
async fn evict_under(svc: &Services, prefix: &str) {
    let records = match svc.records.find_by_path_prefix(prefix).await {
        Ok(records) => records,
        Err(err) => {
            warn!("eviction lookup failed for {prefix}: {err}");
            return;
        }
    };
    for record in records {
        if let Err(err) = svc.cache.evict(&record.uid, &record.path).await {
            warn!("cache eviction failed for {}: {err}", record.uid);
        }
        if let Err(err) = svc.records.delete_by_uid(&record.uid).await {
            warn!("record eviction failed for {}: {err}", record.uid);
        }
    }
}

pub async fn delete_batches(ctx: TaskContext, svc: Arc<Services>, mut payload: RequestPayload) {
    info!("task {} (delete_batches)", ctx.id());

    if !payload.parameters.is_object() {
        payload.parameters = json!({});
    }
    let backdoor = payload.take_backdoor();

    if payload.request_id.is_empty() {
        return notify_error(
            ErrorCode::MISSING_REQUEST_ID,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    }
    payload.adopt_request_id(&ctx.id().to_string());

    let Some(batches) = take_id_list(&mut payload, "batches") else {
        return notify_error(
            ErrorCode::MISSING_BATCHES_PARAMETER,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    };
    let total = batches.len();
    if total == 0 {
        return notify_error(
            ErrorCode::EMPTY_BATCHES_PARAMETER,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    }

    let mut errors: Vec<ErrorEntry> = Vec::new();
    let mut counter = 0usize;
    for batch in batches {
        counter += 1;
        ctx.progress(Some(total), counter, errors.len());

        let collection = svc.config.batch_collection(&batch);
        let local_path = svc.config.batch_staging(&batch);
        info!("delete request for batch collection {}", collection);

        let removed = timeout(REMOVE_TIMEOUT, async {
            if !svc.storage.is_collection(&collection).await? {
                return Ok(false);
            }
            svc.storage.remove(&collection, true).await.map(|_| true)
        })
        .await;

        match removed {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                errors.push(ErrorEntry::new(ErrorCode::BATCH_NOT_FOUND, Some(batch.clone())));
                ctx.progress(Some(total), counter, errors.len());
                continue;
            }
            Ok(Err(err)) => {
                warn!("batch removal failed: {err}");
                errors.push(ErrorEntry::new(ErrorCode::UNEXPECTED_ERROR, Some(batch.clone())));
                ctx.progress(Some(total), counter, errors.len());
                continue;
            }
            Err(_) => {
                warn!("batch removal timed out");
                errors.push(ErrorEntry::new(ErrorCode::UNEXPECTED_ERROR, Some(batch.clone())));
                ctx.progress(Some(total), counter, errors.len());
                continue;
            }
        }

        if fs::metadata(&local_path).await.map(|m| m.is_dir()).unwrap_or(false) {
            let _ = fs::remove_dir_all(&local_path).await;
        }

        if svc.config.evict_on_delete {
            evict_under(&svc, &collection).await;
        }
    }

    if !errors.is_empty() {
        payload.errors = Some(errors.clone());
    }
    let delivered = svc.notifier.post(&mut payload, backdoor).await;
    info!("import manager call = {}", delivered);

    ctx.complete(json!({
        "total": total,
        "step": counter,
        "errors": errors.len(),
    }));
}

pub async fn delete_orders(ctx: TaskContext, svc: Arc<Services>, mut payload: RequestPayload) {
    info!("task {} (delete_orders)", ctx.id());

    if !payload.parameters.is_object() {
        payload.parameters = json!({});
    }
    let backdoor = payload.take_backdoor();

    if payload.request_id.is_empty() {
        return notify_error(
            ErrorCode::MISSING_REQUEST_ID,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    }
    payload.adopt_request_id(&ctx.id().to_string());

    let Some(orders) = take_id_list(&mut payload, "orders") else {
        return notify_error(
            ErrorCode::MISSING_ORDERS_PARAMETER,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    };
    let total = orders.len();
    if total == 0 {
        return notify_error(
            ErrorCode::EMPTY_ORDERS_PARAMETER,
            &mut payload,
            backdoor,
            &ctx,
            &svc.notifier,
            None,
            None,
        )
        .await;
    }

    let mut errors: Vec<ErrorEntry> = Vec::new();
    let mut counter = 0usize;
    for order in orders {
        counter += 1;
        ctx.progress(Some(total), counter, errors.len());

        let local_path = svc.config.order_local(&order);
        info!("delete request for order path: {}", local_path.display());

        let is_dir = fs::metadata(&local_path).await.map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            errors.push(ErrorEntry::new(ErrorCode::ORDER_NOT_FOUND, Some(order.clone())));
            ctx.progress(Some(total), counter, errors.len());
            continue;
        }
        // removing the order directory also drops its token seed
        let _ = fs::remove_dir_all(&local_path).await;

        let collection = svc.config.order_collection(&order);
        let removed = timeout(REMOVE_TIMEOUT, async {
            if svc.storage.is_collection(&collection).await? {
                svc.storage.remove(&collection, true).await?;
            }
            Ok::<_, crate::services::storage::StorageError>(())
        })
        .await;
        if !matches!(removed, Ok(Ok(()))) {
            warn!("order collection removal failed for {}", collection);
            errors.push(ErrorEntry::new(ErrorCode::UNEXPECTED_ERROR, Some(order.clone())));
            ctx.progress(Some(total), counter, errors.len());
            continue;
        }

        if svc.config.evict_on_delete {
            evict_under(&svc, &collection).await;
        }
    }

    if !errors.is_empty() {
        payload.errors = Some(errors.clone());
    }
    let delivered = svc.notifier.post(&mut payload, backdoor).await;
    info!("import manager call = {}", delivered);

    ctx.complete(json!({
        "total": total,
        "step": counter,
        "errors": errors.len(),
    }));
}
