//! # Bucketstore
//!
//! A block gateway that serves series and label queries over immutable
//! time-series blocks kept in an object store.
//!
//! ## Features
//!
//! - **Block sync**: Periodic reconciliation of the bucket listing with an in-memory registry
//! - **Pruning**: Blocks are skipped by time range and external labels before any index is read
//! - **Streaming queries**: Series are fetched from several blocks concurrently and streamed
//! - **Cancellation**: Every query observes a cancellation token and an optional deadline
//!
//! ## Modules
//!
//! - [`block`]: Block identifiers, metadata and the on-bucket format
//! - [`bucket`]: Object store access
//! - [`store`]: Registry, sync manager and query executor
//! - [`selector`]: Label selector parser
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bucketstore::bucket::{Bucket, ObjectStoreBucket};
//! use bucketstore::selector::parse_selector;
//! use bucketstore::store::{BucketStore, QueryConfig, SeriesRequest, SyncConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bucket: Arc<dyn Bucket> = Arc::new(ObjectStoreBucket::local("./bucket", "")?);
//!     let store = BucketStore::new(bucket, SyncConfig::default(), QueryConfig::default(), None);
//!
//!     let cancel = CancellationToken::new();
//!     store.sync().sync_blocks(&cancel).await?;
//!
//!     let series = store
//!         .executor()
//!         .series(
//!             SeriesRequest {
//!                 min_time: i64::MIN,
//!                 max_time: i64::MAX,
//!                 matchers: parse_selector(r#"{job="api"}"#)?,
//!             },
//!             &cancel,
//!         )
//!         .collect_all()
//!         .await?;
//!
//!     println!("Found {} series", series.len());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod block;
pub mod bucket;
pub mod config;
pub mod selector;
pub mod store;

// Re-export top-level types for convenience
pub use block::{
    BlockBuilder, BlockDescriptor, BlockId, BlockMeta, Chunk, Label, Labels, Series, StoreError,
    StoreResult, TimeRange,
};

pub use bucket::{create_bucket, Bucket, ObjectStoreBucket};

pub use store::{
    BlockRegistry, BoundsCallback, BucketStore, LabelNamesRequest, LabelValuesRequest, MatchOp,
    Matcher, QueryConfig, QueryExecutor, SeriesRequest, SeriesStream, StoreInfo, SyncConfig,
    SyncManager, SyncState, SyncStatus,
};

pub use selector::{parse_selector, parse_selectors};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{ApiConfig, BucketBackend, BucketConfig, Config, ConfigError, LoggingConfig};
