//! Bucketstore REST API
//!
//! HTTP API layer for the block gateway, built with Axum.
//!
//! # Endpoints
//!
//! ## Query
//! - `GET /api/v1/series?match=&start=&end=` - Series with their chunks
//! - `GET /api/v1/label/:name/values?match=&start=&end=` - Label values
//! - `GET /api/v1/labels?match=&start=&end=` - Label names
//! - `GET /api/v1/info` - Global time bound and external label sets
//!
//! ## Blocks
//! - `GET /api/v1/blocks` - List registered blocks
//! - `GET /api/v1/blocks/:id` - Get one block
//!
//! ## Sync
//! - `POST /api/v1/sync` - Run a sync pass now
//! - `GET /api/v1/sync/status` - Get sync status
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use bucketstore::api::{serve, AppState};
//! use bucketstore::bucket::{Bucket, ObjectStoreBucket};
//! use bucketstore::config::ApiConfig;
//! use bucketstore::store::{BucketStore, QueryConfig, SyncConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bucket: Arc<dyn Bucket> = Arc::new(ObjectStoreBucket::in_memory());
//!     let store = BucketStore::new(bucket, SyncConfig::default(), QueryConfig::default(), None);
//!     let shutdown = CancellationToken::new();
//!     let config = ApiConfig::default();
//!
//!     let state = AppState::new(&store, config.clone(), shutdown.clone());
//!     serve(state, &config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use crate::config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Query routes
        .route("/series", get(routes::query::series))
        .route("/label/:name/values", get(routes::query::label_values))
        .route("/labels", get(routes::query::label_names))
        .route("/info", get(routes::query::info))
        // Block routes
        .route("/blocks", get(routes::blocks::list_blocks))
        .route("/blocks/:id", get(routes::blocks::get_block))
        // Sync routes
        .route("/sync", post(routes::sync::trigger_sync))
        .route("/sync/status", get(routes::sync::get_sync_status));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config.cors_origins);

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

/// Permissive when no origins are configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server
///
/// Returns after a shutdown signal, or when `state.shutdown` is cancelled.
/// Either way the shutdown token is cancelled on return so in-flight queries
/// and the sync loop stop.
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let shutdown = state.shutdown.clone();
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Bucketstore API listening on {}", addr);

    let token = shutdown.clone();
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = token.cancelled() => {}
            }
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)));

    shutdown.cancel();
    result?;

    tracing::info!("Bucketstore API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockBuilder, BlockId, Chunk, Labels, TimeRange};
    use crate::bucket::{Bucket, ObjectStoreBucket};
    use crate::store::{BucketStore, QueryConfig, SyncConfig};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    fn chunk(min_time: i64, max_time: i64) -> Chunk {
        Chunk {
            min_time,
            max_time,
            data: vec![1, 2, 3],
        }
    }

    /// Two blocks over [0, 100] with external labels ext=v and ext=w
    async fn seeded_store() -> BucketStore {
        let bucket: Arc<dyn Bucket> = Arc::new(ObjectStoreBucket::in_memory());

        for (ts, ext) in [(1_000, "v"), (2_000, "w")] {
            let mut builder = BlockBuilder::new(BlockId::generate(ts), TimeRange::new(0, 100))
                .external_label("ext", ext);
            builder.add_series(Labels::from_pairs([("a", "1"), ("b", ext)]), vec![chunk(0, 50)]);
            builder.upload(bucket.as_ref()).await.unwrap();
        }

        BucketStore::new(bucket, SyncConfig::default(), QueryConfig::default(), None)
    }

    async fn create_test_app(synced: bool) -> Router {
        let store = seeded_store().await;
        if synced {
            store
                .sync()
                .sync_blocks(&CancellationToken::new())
                .await
                .unwrap();
        }
        let state = AppState::new(&store, ApiConfig::default(), CancellationToken::new());
        build_router(state)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_live() {
        let app = create_test_app(false).await;
        let (status, _) = get(app, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready_after_sync() {
        let (status, _) = get(create_test_app(false).await, "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = get(create_test_app(true).await, "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (status, json) = get(create_test_app(true).await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["blocks"], 2);
    }

    #[tokio::test]
    async fn test_series_with_external_label() {
        let app = create_test_app(true).await;

        // %7Ba%3D%221%22%7D = {a="1"}
        let (status, json) = get(app.clone(), "/api/v1/series?match=%7Ba%3D%221%22%7D").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);

        // {a="1",ext="v"}
        let (status, json) = get(
            app.clone(),
            "/api/v1/series?match=%7Ba%3D%221%22%2Cext%3D%22v%22%7D",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["labels"]["ext"], "v");
        assert_eq!(data[0]["chunks"][0]["max_time"], 50);

        // {ext="nope"}
        let (status, json) = get(app, "/api/v1/series?match=%7Bext%3D%22nope%22%7D").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_series_invalid_selector() {
        let app = create_test_app(true).await;
        let (status, json) = get(app.clone(), "/api/v1/series?match=%7Ba%3D1%7D").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "INVALID_SELECTOR");

        let (status, _) = get(app, "/api/v1/series?start=10&end=5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_label_values_and_names() {
        let app = create_test_app(true).await;

        let (status, json) = get(app.clone(), "/api/v1/label/b/values").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"], serde_json::json!(["v", "w"]));

        let (_, json) = get(app.clone(), "/api/v1/label/ext/values").await;
        assert_eq!(json["data"], serde_json::json!(["v", "w"]));

        let (_, json) = get(app, "/api/v1/labels").await;
        assert_eq!(json["data"], serde_json::json!(["a", "b", "ext"]));
    }

    #[tokio::test]
    async fn test_time_range_excludes_blocks() {
        let app = create_test_app(true).await;
        let (status, json) = get(app, "/api/v1/series?start=101&end=200").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocks_and_info() {
        let app = create_test_app(true).await;

        let (status, json) = get(app.clone(), "/api/v1/blocks").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 2);

        let id = json["blocks"][0]["id"].as_str().unwrap().to_string();
        let (status, json) = get(app.clone(), &format!("/api/v1/blocks/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["external_labels"]["ext"], "v");

        let missing = BlockId::generate(9_000);
        let (status, _) = get(app.clone(), &format!("/api/v1/blocks/{}", missing)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = get(app, "/api/v1/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["blocks"], 2);
        assert_eq!(json["min_time"], 0);
        assert_eq!(json["max_time"], 100);
    }

    #[tokio::test]
    async fn test_manual_sync() {
        let app = create_test_app(false).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["result"]["added"], 2);

        let (_, json) = get(app, "/api/v1/sync/status").await;
        assert_eq!(json["blocks"], 2);
        assert!(json["last_sync"].is_string());
    }

    #[test]
    fn test_cors_layer_ignores_invalid_origins() {
        let _ = cors_layer(&[]);
        let _ = cors_layer(&["http://localhost:3000".to_string(), "bad\norigin".to_string()]);
    }
}
