//! Admin API endpoints for the content cache.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use content_cache::{CacheSummary, ControllerStatus};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use sos_common::SosError;
use tracing::{error, info};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatusResponse {
    #[serde(flatten)]
    pub controller: ControllerStatus,
    pub interval_minutes: u64,
    pub periodic_update_scheduled: bool,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub message: String,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalBody {
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshQuery {
    /// Return once the rebuild is admitted instead of when it finishes.
    #[serde(default)]
    pub background: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Error response carrying the service error's status and exception code.
pub struct ApiError(SosError);

impl From<SosError> for ApiError {
    fn from(err: SosError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            code: self.0.ows_exception_code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /admin/cache/status
pub async fn status_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(CacheStatusResponse {
        controller: state.controller.status(),
        interval_minutes: state.trigger.interval_minutes(),
        periodic_update_scheduled: state.trigger.is_scheduled(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// POST /admin/cache/refresh
///
/// Forces a complete update regardless of the periodic timer.
pub async fn refresh_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<RefreshQuery>,
) -> Result<Response, ApiError> {
    if query.background {
        let controller = state.controller.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.refresh().await {
                error!(error = %e, "Background cache refresh failed");
            }
        });
        info!("Cache refresh requested in background");

        let body = RefreshResponse {
            success: true,
            message: "Complete cache update scheduled".to_string(),
            duration_ms: None,
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let started = Instant::now();
    state
        .controller
        .refresh()
        .await
        .map_err(SosError::from)?;

    let duration_ms = started.elapsed().as_millis() as u64;
    info!(duration_ms = duration_ms, "Cache refresh completed via admin API");

    Ok(Json(RefreshResponse {
        success: true,
        message: "Complete cache update finished".to_string(),
        duration_ms: Some(duration_ms),
    })
    .into_response())
}

/// GET /admin/cache/interval
pub async fn get_interval_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<IntervalBody> {
    Json(IntervalBody {
        interval_minutes: state.trigger.interval_minutes(),
    })
}

/// PUT /admin/cache/interval
///
/// `0` disables periodic updates.
pub async fn put_interval_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<IntervalBody>,
) -> Json<IntervalBody> {
    let previous = state.trigger.interval_minutes();
    state.trigger.reconfigure(body.interval_minutes);
    info!(
        previous_minutes = previous,
        interval_minutes = body.interval_minutes,
        "Cache update interval changed via admin API"
    );

    Json(IntervalBody {
        interval_minutes: state.trigger.interval_minutes(),
    })
}

/// GET /admin/cache/summary
pub async fn summary_handler(Extension(state): Extension<Arc<AppState>>) -> Json<CacheSummary> {
    Json(state.controller.get_cache().summary())
}

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (StatusCode::OK, handle.render())
}
