//! Health Routes
//!
//! Health check endpoints for monitoring and Kubernetes probes.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (first sync pass completed)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// GET /health/live
///
/// Kubernetes liveness probe.
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Kubernetes readiness probe.
/// Returns 200 once a sync pass has succeeded, so queries see the bucket.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.sync.status().await.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health
///
/// Full health status with sync details.
pub async fn full_health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let sync_state = state.sync.status().await;
    let ready = sync_state.is_ready();

    let status = match (ready, sync_state.last_error.is_some()) {
        (false, _) => "starting",
        (true, true) => "degraded",
        (true, false) => "healthy",
    };

    Ok(Json(HealthResponse {
        status: status.to_string(),
        ready,
        blocks: state.registry.count()?,
        last_error: sync_state.last_error,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}
