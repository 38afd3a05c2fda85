//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use crate::config::ApiConfig;
use crate::store::{BlockRegistry, BucketStore, QueryExecutor, SyncManager};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Blocks currently served
    pub registry: Arc<BlockRegistry>,
    /// Sync manager for manual passes and status
    pub sync: Arc<SyncManager>,
    /// Query executor for series and label queries
    pub executor: Arc<QueryExecutor>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Fires on server shutdown; request tokens are children of it
    pub shutdown: CancellationToken,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: &BucketStore, config: ApiConfig, shutdown: CancellationToken) -> Self {
        Self {
            registry: store.registry().clone(),
            sync: store.sync().clone(),
            executor: store.executor().clone(),
            config: Arc::new(config),
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Token for one request, cancelled when the returned guard drops
    pub fn request_token(&self) -> (CancellationToken, tokio_util::sync::DropGuard) {
        let token = self.shutdown.child_token();
        let guard = token.clone().drop_guard();
        (token, guard)
    }
}
