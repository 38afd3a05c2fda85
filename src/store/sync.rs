//! Sync Manager
//!
//! Reconciles the block registry with the bucket on a fixed interval and
//! reports the global time bound whenever it changes.
//!
//! One pass:
//! 1. List block ids in the bucket (failure aborts the pass)
//! 2. Fetch `meta.json` for unseen blocks, concurrently
//! 3. Admit the loaded blocks and drop entries whose id is no longer listed
//! 4. Recompute the bound and invoke the callback if it changed
//!
//! Cancellation during steps 1 and 2 abandons the pass with the registry
//! untouched. Steps 3 and 4 never wait, so a pass is applied whole or not at all.

use crate::block::descriptor::BlockDescriptor;
use crate::block::error::{StoreError, StoreResult};
use crate::block::types::BlockId;
use crate::bucket::Bucket;
use crate::store::registry::BlockRegistry;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Receives `(min_time, max_time)` of all known blocks
pub type BoundsCallback = Arc<dyn Fn(i64, i64) + Send + Sync>;

/// Bound reported while the registry is empty
pub const EMPTY_BOUNDS: (i64, i64) = (i64::MAX, i64::MIN);

/// Configuration for sync behavior
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between the start of two passes
    pub interval: Duration,
    /// Maximum concurrent `meta.json` fetches per pass
    pub meta_fetch_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            meta_fetch_concurrency: 20,
        }
    }
}

/// Current state of the sync manager
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncState {
    /// Number of passes attempted
    pub passes: u64,
    /// Timestamp of the last successful pass
    pub last_sync_timestamp: i64,
    /// Status of the last successful pass
    pub last_sync_status: Option<SyncStatus>,
    /// Error of the last failed pass, cleared on success
    pub last_error: Option<String>,
}

impl SyncState {
    /// At least one pass has completed
    pub fn is_ready(&self) -> bool {
        self.last_sync_status.is_some()
    }
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// When the pass completed
    pub timestamp: i64,
    /// How long the pass took
    pub duration_ms: u64,
    /// Block ids returned by the listing
    pub listed: usize,
    /// Blocks admitted this pass
    pub added: usize,
    /// Blocks evicted this pass
    pub removed: usize,
    /// Blocks whose metadata could not be loaded
    pub failed: usize,
    /// Global bound after the pass, None when no blocks are known
    pub bounds: Option<(i64, i64)>,
    /// Whether the bounds callback fired
    pub bounds_changed: bool,
}

/// Keeps the registry in step with the bucket
pub struct SyncManager {
    bucket: Arc<dyn Bucket>,
    registry: Arc<BlockRegistry>,
    on_bounds: Option<BoundsCallback>,
    config: SyncConfig,
    /// Serializes passes; holds the last reported bound
    pass: Mutex<Option<(i64, i64)>>,
    state: RwLock<SyncState>,
}

impl SyncManager {
    pub fn new(
        bucket: Arc<dyn Bucket>,
        registry: Arc<BlockRegistry>,
        on_bounds: Option<BoundsCallback>,
        config: SyncConfig,
    ) -> Self {
        Self {
            bucket,
            registry,
            on_bounds,
            config,
            pass: Mutex::new(None),
            state: RwLock::new(SyncState::default()),
        }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    /// Spawn the periodic sync loop
    ///
    /// The first pass runs immediately. The loop exits when `cancel` fires,
    /// observed between passes and while a pass is still fetching.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            bucket = self.bucket.name(),
            "Starting block sync"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.sync_blocks(&cancel).await {
                    Ok(_) => {}
                    Err(StoreError::Cancelled) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Block sync pass failed, retrying next interval");
                    }
                }
            }

            tracing::info!("Block sync stopped");
        })
    }

    /// Run one reconciliation pass
    pub async fn sync_blocks(&self, cancel: &CancellationToken) -> StoreResult<SyncStatus> {
        let mut last_bounds = self.pass.lock().await;
        let start = std::time::Instant::now();
        self.state.write().await.passes += 1;

        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let listed = match self.bucket.list_blocks().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, bucket = self.bucket.name(), "Block listing failed");
                self.state.write().await.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let mut unseen = Vec::new();
        for id in &listed {
            if !self.registry.contains(id)? {
                unseen.push(id.clone());
            }
        }

        let (loaded, failed) = self.load_unseen(unseen, cancel).await?;

        let mut added = 0;
        for block in loaded {
            let id = block.id().clone();
            if self.registry.upsert(Arc::new(block))? {
                tracing::info!(block = %id, "Block added");
                added += 1;
            }
        }

        let listed_set: HashSet<&BlockId> = listed.iter().collect();
        let mut removed = 0;
        for id in self.registry.ids()? {
            if !listed_set.contains(&id) && self.registry.remove(&id)? {
                tracing::info!(block = %id, "Block removed");
                removed += 1;
            }
        }

        let bounds = self.registry.time_bounds()?;
        let reported = bounds.unwrap_or(EMPTY_BOUNDS);
        let bounds_changed = *last_bounds != Some(reported);
        if bounds_changed {
            *last_bounds = Some(reported);
            tracing::info!(min_time = reported.0, max_time = reported.1, "Global time bound changed");
            if let Some(callback) = &self.on_bounds {
                callback(reported.0, reported.1);
            }
        }
        drop(last_bounds);

        let status = SyncStatus {
            timestamp: Utc::now().timestamp_millis(),
            duration_ms: start.elapsed().as_millis() as u64,
            listed: listed.len(),
            added,
            removed,
            failed,
            bounds,
            bounds_changed,
        };

        if added > 0 || removed > 0 || failed > 0 {
            tracing::info!(
                listed = status.listed,
                added,
                removed,
                failed,
                duration_ms = status.duration_ms,
                "Block sync completed"
            );
        } else {
            tracing::debug!(listed = status.listed, duration_ms = status.duration_ms, "Block sync completed");
        }

        let mut state = self.state.write().await;
        state.last_sync_timestamp = status.timestamp;
        state.last_sync_status = Some(status.clone());
        state.last_error = None;

        Ok(status)
    }

    /// Fetch metadata of unseen blocks; returns the loaded blocks and the failure count
    async fn load_unseen(
        &self,
        unseen: Vec<BlockId>,
        cancel: &CancellationToken,
    ) -> StoreResult<(Vec<BlockDescriptor>, usize)> {
        let concurrency = self.config.meta_fetch_concurrency.max(1);
        let mut loads = std::pin::pin!(stream::iter(unseen)
            .map(|id| {
                let bucket = self.bucket.clone();
                async move {
                    let result = BlockDescriptor::load(bucket, &id).await;
                    (id, result)
                }
            })
            .buffer_unordered(concurrency));

        let mut loaded = Vec::new();
        let mut failed = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                next = loads.next() => next,
            };

            match next {
                None => break,
                Some((_, Ok(block))) => loaded.push(block),
                Some((id, Err(e))) if e.is_corruption() => {
                    tracing::warn!(block = %id, error = %e, "Skipping corrupt block");
                    failed += 1;
                }
                Some((id, Err(e))) => {
                    tracing::warn!(block = %id, error = %e, "Failed to load block metadata, will retry");
                    failed += 1;
                }
            }
        }
        Ok((loaded, failed))
    }

    /// Get current sync status
    pub async fn status(&self) -> SyncState {
        self.state.read().await.clone()
    }
}
