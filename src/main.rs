//! Bucketstore Server
//!
//! Run with: cargo run --bin bucketstore -- [CONFIG]
//!
//! # Configuration
//!
//! Reads the TOML file given as the first argument, or the first of
//! `~/.config/bucketstore/config.toml`, `/etc/bucketstore/config.toml` and
//! `./config.toml` that exists. `BUCKETSTORE_*` environment variables
//! override file values and `RUST_LOG` overrides the log level.

use bucketstore::api::{serve, AppState};
use bucketstore::bucket::create_bucket;
use bucketstore::config::{Config, LoggingConfig};
use bucketstore::store::{BoundsCallback, BucketStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Config::load_with_env(&path)?,
        None => Config::load_default(),
    };

    init_tracing(&config.logging);

    tracing::info!("Starting Bucketstore v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        backend = ?config.bucket.backend,
        prefix = %config.bucket.prefix,
        "Opening bucket"
    );

    let bucket = create_bucket(&config.bucket)?;

    // Advertised store bound
    let on_bounds: BoundsCallback = Arc::new(|min_time, max_time| {
        tracing::info!(min_time, max_time, "Store time bounds updated");
    });

    let store = BucketStore::new(
        bucket,
        config.sync.to_sync_config(),
        config.query.to_query_config(),
        Some(on_bounds),
    );

    let shutdown = CancellationToken::new();
    let sync_handle = store.sync().clone().start(shutdown.child_token());

    let state = AppState::new(&store, config.api.clone(), shutdown.clone());
    let result = serve(state, &config.api).await;

    // serve() cancels the token on return, stopping the sync loop
    shutdown.cancel();
    if let Err(e) = sync_handle.await {
        tracing::warn!(error = %e, "Sync task ended abnormally");
    }

    result?;
    tracing::info!("Bucketstore stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("bucketstore={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
