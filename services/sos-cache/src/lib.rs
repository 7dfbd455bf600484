//! Content cache service library.
//!
//! Hosts the content cache controller and exposes its admin API.

pub mod admin;
pub mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};

use state::AppState;

/// Build the admin router. Metrics are routed by the binary, which owns the
/// Prometheus recorder.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/admin/cache/status", get(admin::status_handler))
        .route("/admin/cache/refresh", post(admin::refresh_handler))
        .route(
            "/admin/cache/interval",
            get(admin::get_interval_handler).put(admin::put_interval_handler),
        )
        .route("/admin/cache/summary", get(admin::summary_handler))
        .route("/health", get(admin::health_handler))
        .layer(Extension(state))
}
