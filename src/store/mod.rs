//! Block registry and query engine
//!
//! - **matcher**: Label matchers and the block pruning evaluator
//! - **registry**: Concurrent set of known blocks
//! - **sync**: Periodic reconciliation with the bucket
//! - **query**: Series, label-values and label-names queries
//!
//! # Architecture
//!
//! ```text
//! Sync:
//!   Bucket listing → meta.json fetch → BlockRegistry (upsert/remove) → bounds callback
//!
//! Query:
//!   BlockRegistry snapshot → prune → index/chunks fetch → SeriesStream
//! ```

pub mod matcher;
pub mod query;
pub mod registry;
pub mod sync;

pub use matcher::{matches_labels, prune, MatchOp, Matcher, Pruned};
pub use query::{
    LabelNamesRequest, LabelValuesRequest, QueryConfig, QueryExecutor, SeriesRequest,
    SeriesStream, StoreInfo,
};
pub use registry::BlockRegistry;
pub use sync::{BoundsCallback, SyncConfig, SyncManager, SyncState, SyncStatus};

use crate::bucket::Bucket;
use std::sync::Arc;

/// Registry, sync manager and query executor wired to one bucket
pub struct BucketStore {
    registry: Arc<BlockRegistry>,
    sync: Arc<SyncManager>,
    executor: Arc<QueryExecutor>,
}

impl BucketStore {
    pub fn new(
        bucket: Arc<dyn Bucket>,
        sync_config: SyncConfig,
        query_config: QueryConfig,
        on_bounds: Option<BoundsCallback>,
    ) -> Self {
        let registry = Arc::new(BlockRegistry::new());
        let sync = Arc::new(SyncManager::new(
            bucket,
            registry.clone(),
            on_bounds,
            sync_config,
        ));
        let executor = Arc::new(QueryExecutor::new(registry.clone(), query_config));
        Self {
            registry,
            sync,
            executor,
        }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn sync(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }
}
