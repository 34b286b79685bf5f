//! Defines routes for the batch/order lifecycle API.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /healthz` — liveness
//!   - `GET    /readyz`  — readiness (DB + disk)
//!
//! - **Batches**
//!   - `GET    /api/batches/{batch_id}` — readiness state + file listing
//!   - `POST   /api/batches/{batch_id}` — dispatch ingestion
//!   - `POST   /api/batches/{batch_id}/approve` — dispatch promotion
//!   - `DELETE /api/batches` — dispatch batch deletion
//!
//! - **Orders**
//!   - `GET    /api/orders/{order_id}` — archives + tokenized URLs
//!   - `POST   /api/orders/{order_id}` — dispatch unrestricted assembly
//!   - `POST   /api/orders/{order_id}/restricted` — dispatch restricted assembly
//!   - `GET    /api/orders/{order_id}/download/{ftype}/c/{token}` — download
//!   - `DELETE /api/orders` — dispatch order deletion
//!
//! - **Maintenance**
//!   - `GET    /api/requests/{task_id}` — task status polling
//!   - `POST   /api/pidcache` — rebuild the PID cache

use crate::{
    AppState,
    handlers::{
        batch_handlers::{
            approve_batch, create_batch, delete_batches, get_batch, rebuild_pid_cache,
        },
        health_handlers::{healthz, readyz},
        order_handlers::{
            create_restricted, create_unrestricted, delete_orders, download_order, list_order,
        },
        request_handlers::request_status,
    },
};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Build and return the router for the whole API surface.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // batches
        .route("/api/batches/{batch_id}", get(get_batch).post(create_batch))
        .route("/api/batches/{batch_id}/approve", post(approve_batch))
        .route("/api/batches", delete(delete_batches))
        // orders
        .route(
            "/api/orders/{order_id}",
            get(list_order).post(create_unrestricted),
        )
        .route("/api/orders/{order_id}/restricted", post(create_restricted))
        .route(
            "/api/orders/{order_id}/download/{ftype}/c/{token}",
            get(download_order),
        )
        .route("/api/orders", delete(delete_orders))
        // maintenance
        .route("/api/requests/{task_id}", get(request_status))
        .route("/api/pidcache", post(rebuild_pid_cache))
}
