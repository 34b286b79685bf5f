//! Lifecycle management for partner-submitted scientific data batches:
//! integrity-verified ingestion, promotion into production under
//! persistent identifiers, downloadable order assembly and token-based
//! download authorization.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod tasks;

use services::Services;
use std::sync::Arc;
use tasks::TaskRunner;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub runner: TaskRunner,
}

/// Build the application router over an opened service bundle.
pub fn build_router(services: Arc<Services>) -> axum::Router {
    let state = AppState {
        services,
        runner: TaskRunner::new(),
    };
    routes::routes::routes().with_state(state)
}
