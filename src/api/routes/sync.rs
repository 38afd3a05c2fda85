//! Sync Routes
//!
//! Endpoints for block synchronization.
//!
//! - POST /api/v1/sync - Run a sync pass now
//! - GET /api/v1/sync/status - Get sync status

use axum::{extract::State, Json};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

use crate::api::dto::{SyncResponse, SyncStatusResponse};
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// POST /api/v1/sync
///
/// Run one reconciliation pass. Waits for an in-flight background pass first.
pub async fn trigger_sync(State(state): State<Arc<AppState>>) -> Json<SyncResponse> {
    let (cancel, _guard) = state.request_token();

    match state.sync.sync_blocks(&cancel).await {
        Ok(status) => {
            tracing::info!(
                added = status.added,
                removed = status.removed,
                duration_ms = status.duration_ms,
                "Manual sync completed"
            );

            Json(SyncResponse {
                status: "success".to_string(),
                result: Some(status),
                error: None,
            })
        }
        Err(e) => {
            tracing::error!(error = %e, "Manual sync failed");

            Json(SyncResponse {
                status: "failed".to_string(),
                result: None,
                error: Some(e.to_string()),
            })
        }
    }
}

/// GET /api/v1/sync/status
pub async fn get_sync_status(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<SyncStatusResponse>> {
    let sync_state = state.sync.status().await;

    let last_sync = if sync_state.last_sync_timestamp > 0 {
        Utc.timestamp_millis_opt(sync_state.last_sync_timestamp)
            .single()
            .map(|dt| dt.to_rfc3339())
    } else {
        None
    };

    Ok(Json(SyncStatusResponse {
        passes: sync_state.passes,
        last_sync,
        last_status: sync_state.last_sync_status,
        last_error: sync_state.last_error,
        blocks: state.registry.count()?,
    }))
}
