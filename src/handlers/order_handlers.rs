//! Order endpoints: assembly dispatch, download listing and the
//! token-authorized anonymous download.

use crate::{
    AppState,
    errors::AppError,
    handlers::batch_handlers::async_id_response,
    models::payload::RequestPayload,
    tasks::{cleanup, orders},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tokio::fs;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

#[derive(Serialize)]
struct DownloadEntry {
    name: String,
    url: String,
    size: u64,
}

/// Split an archive name back into its `(restricted, index)` parts.
/// Only names following the `order_<id>_<label>[index].zip` convention
/// are downloadable.
fn parse_order_zip(order_id: &str, name: &str) -> Option<(bool, Option<String>)> {
    let rest = name
        .strip_prefix(&format!("order_{order_id}_"))?
        .strip_suffix(".zip")?;
    let (restricted, index) = if let Some(index) = rest.strip_prefix("unrestricted") {
        (false, index)
    } else if let Some(index) = rest.strip_prefix("restricted") {
        (true, index)
    } else {
        return None;
    };
    if index.is_empty() {
        Some((restricted, None))
    } else if index.chars().all(|c| c.is_ascii_digit()) {
        Some((restricted, Some(index.to_string())))
    } else {
        None
    }
}

/// `GET /api/orders/{order_id}` — list the order's archives with
/// tokenized download URLs.
pub async fn list_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let svc = &state.services;
    let collection = svc.config.order_collection(&order_id);
    if !svc
        .storage
        .is_collection(&collection)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?
    {
        return Err(AppError::not_found(format!("order {order_id} not found")));
    }

    let order_dir = svc.config.order_local(&order_id);
    let mut downloads = Vec::new();
    let listing = svc
        .storage
        .list(&collection)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;

    for entry in listing {
        if !entry.is_dataobject() {
            continue;
        }
        let Some((restricted, index)) = parse_order_zip(&order_id, &entry.name) else {
            continue;
        };

        let relative = format!("{}/{}", order_id, entry.name);
        let token = svc
            .vault
            .issue(&order_dir, &relative)
            .await
            .map_err(|err| AppError::internal(err.to_string()))?;

        // two-character file-type tag: restricted flag + part index
        let mut ftype = String::new();
        ftype.push(if restricted { '1' } else { '0' });
        ftype.push_str(index.as_deref().unwrap_or("0"));

        downloads.push(DownloadEntry {
            url: format!("/api/orders/{order_id}/download/{ftype}/c/{token}"),
            name: entry.name,
            size: entry.content_length,
        });
    }

    Ok(Json(json!({ "order_id": order_id, "downloads": downloads })))
}

/// `GET /api/orders/{order_id}/download/{ftype}/c/{token}` — verify the
/// token against the order's current seed and stream the archive.
///
/// Any mismatch — tampered token, rotated seed, foreign order — is a
/// plain 401; path correctness alone never authorizes a download.
pub async fn download_order(
    State(state): State<AppState>,
    Path((order_id, _ftype, token)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let svc = &state.services;
    let orders_root = svc.config.staging_root.join(&svc.config.orders_coll);

    let relative = svc
        .vault
        .verify(&orders_root, &token)
        .await
        .map_err(|_| AppError::unauthorized("invalid download token"))?;
    if !relative.starts_with(&format!("{order_id}/")) {
        return Err(AppError::unauthorized("invalid download token"));
    }

    let zip_name = relative
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let remote = format!("{}/{}", svc.config.orders_coll, relative);

    // fetch to a scratch file, unlink it and stream from the open handle
    let scratch = svc
        .config
        .order_local(&order_id)
        .join(format!(".dl-{}", Uuid::new_v4()));
    svc.storage
        .get(&remote, &scratch)
        .await
        .map_err(|_| AppError::not_found(format!("archive {zip_name} not found")))?;
    let file = fs::File::open(&scratch)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;
    let _ = fs::remove_file(&scratch).await;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{zip_name}\"")) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `POST /api/orders/{order_id}` — create the order locations and start
/// the unrestricted assembly task.
pub async fn create_unrestricted(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(payload): Json<RequestPayload>,
) -> Result<impl IntoResponse, AppError> {
    let svc = state.services.clone();
    prepare_order(&state, &order_id).await?;
    let id = state
        .runner
        .submit(move |ctx| orders::unrestricted_order(ctx, svc, order_id, payload));
    Ok(async_id_response(id))
}

/// `POST /api/orders/{order_id}/restricted` — start the restricted
/// (partner-zip) assembly task.
pub async fn create_restricted(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(payload): Json<RequestPayload>,
) -> Result<impl IntoResponse, AppError> {
    let svc = state.services.clone();
    prepare_order(&state, &order_id).await?;
    let id = state
        .runner
        .submit(move |ctx| orders::restricted_order(ctx, svc, order_id, payload));
    Ok(async_id_response(id))
}

async fn prepare_order(state: &AppState, order_id: &str) -> Result<(), AppError> {
    let svc = &state.services;
    svc.storage
        .create_collection(&svc.config.order_collection(order_id))
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;
    fs::create_dir_all(svc.config.order_local(order_id))
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;
    Ok(())
}

/// `DELETE /api/orders` — delete the orders named in the payload.
pub async fn delete_orders(
    State(state): State<AppState>,
    Json(payload): Json<RequestPayload>,
) -> Result<impl IntoResponse, AppError> {
    let svc = state.services.clone();
    let id = state
        .runner
        .submit(move |ctx| cleanup::delete_orders(ctx, svc, payload));
    Ok(async_id_response(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_zip_names_parse_back() {
        assert_eq!(parse_order_zip("o1", "order_o1_unrestricted.zip"), Some((false, None)));
        assert_eq!(
            parse_order_zip("o1", "order_o1_restricted3.zip"),
            Some((true, Some("3".into())))
        );
        assert_eq!(parse_order_zip("o1", "order_o2_unrestricted.zip"), None);
        assert_eq!(parse_order_zip("o1", "order_o1_unrestricted.bak"), None);
        assert_eq!(parse_order_zip("o1", "random.zip"), None);
    }
}
