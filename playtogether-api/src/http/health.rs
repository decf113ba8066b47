//! Health check and metrics endpoints

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use playtogether_core::metrics::gather_metrics;

use super::{AppError, AppResult, AppState};

/// Health and metrics router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
}

/// Liveness: OK while the session driver is running.
pub async fn health_check(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    if !state.session.is_running() {
        return Err(AppError::service_unavailable("Session driver stopped"));
    }
    Ok("OK")
}

/// Prometheus text exposition.
pub async fn metrics() -> AppResult<impl IntoResponse> {
    let body = gather_metrics().map_err(|e| {
        tracing::error!("Failed to encode metrics: {}", e);
        AppError::internal_server_error("Failed to encode metrics")
    })?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
