//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `BUCKETSTORE_*` environment overrides.

use crate::store::{QueryConfig, SyncConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bucket: BucketConfig,

    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub query: QuerySection,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketBackend {
    Memory,
    Local,
    S3,
}

impl std::str::FromStr for BucketBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            other => Err(ConfigError::Invalid(format!("unknown bucket backend '{}'", other))),
        }
    }
}

/// Where blocks are read from
#[derive(Debug, Clone, Deserialize)]
pub struct BucketConfig {
    #[serde(default = "default_backend")]
    pub backend: BucketBackend,

    /// Root directory for the `local` backend
    #[serde(default = "default_bucket_path")]
    pub path: PathBuf,

    /// Bucket name for the `s3` backend
    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Key prefix under which block directories live
    #[serde(default)]
    pub prefix: String,
}

fn default_backend() -> BucketBackend {
    BucketBackend::Local
}

fn default_bucket_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("bucketstore").join("bucket"))
        .unwrap_or_else(|| PathBuf::from("./bucket"))
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_bucket_path(),
            bucket: String::new(),
            region: default_region(),
            prefix: String::new(),
        }
    }
}

/// Block sync settings
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_sync_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_meta_fetch_concurrency")]
    pub meta_fetch_concurrency: usize,
}

fn default_sync_interval() -> u64 {
    30_000
}

fn default_meta_fetch_concurrency() -> usize {
    20
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            interval_ms: default_sync_interval(),
            meta_fetch_concurrency: default_meta_fetch_concurrency(),
        }
    }
}

impl SyncSection {
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            interval: Duration::from_millis(self.interval_ms.max(1)),
            meta_fetch_concurrency: self.meta_fetch_concurrency.max(1),
        }
    }
}

/// Query execution limits
#[derive(Debug, Clone, Deserialize)]
pub struct QuerySection {
    #[serde(default = "default_block_concurrency")]
    pub block_concurrency: usize,

    #[serde(default = "default_series_buffer")]
    pub series_buffer: usize,

    /// 0 disables the deadline
    #[serde(default = "default_query_timeout")]
    pub timeout_ms: u64,
}

fn default_block_concurrency() -> usize {
    8
}

fn default_series_buffer() -> usize {
    64
}

fn default_query_timeout() -> u64 {
    120_000
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            block_concurrency: default_block_concurrency(),
            series_buffer: default_series_buffer(),
            timeout_ms: default_query_timeout(),
        }
    }
}

impl QuerySection {
    pub fn to_query_config(&self) -> QueryConfig {
        QueryConfig {
            block_concurrency: self.block_concurrency.max(1),
            series_buffer: self.series_buffer.max(1),
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10905
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("bucketstore").join("config.toml")),
            Some(PathBuf::from("/etc/bucketstore/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `BUCKETSTORE_*` overrides from a lookup function
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Bucket overrides
        if let Some(backend) = var("BUCKETSTORE_BUCKET_BACKEND") {
            match backend.parse() {
                Ok(b) => self.bucket.backend = b,
                Err(e) => tracing::warn!("Ignoring BUCKETSTORE_BUCKET_BACKEND: {}", e),
            }
        }
        if let Some(path) = var("BUCKETSTORE_BUCKET_PATH") {
            self.bucket.path = PathBuf::from(path);
        }
        if let Some(bucket) = var("BUCKETSTORE_BUCKET_NAME") {
            self.bucket.bucket = bucket;
        }
        if let Some(region) = var("BUCKETSTORE_BUCKET_REGION") {
            self.bucket.region = region;
        }
        if let Some(prefix) = var("BUCKETSTORE_BUCKET_PREFIX") {
            self.bucket.prefix = prefix;
        }

        // Sync overrides
        if let Some(interval) = var("BUCKETSTORE_SYNC_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.sync.interval_ms = interval;
        }

        // API overrides
        if let Some(host) = var("BUCKETSTORE_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = var("BUCKETSTORE_API_PORT").and_then(|v| v.parse().ok()) {
            self.api.port = port;
        }

        // Logging overrides
        if let Some(level) = var("BUCKETSTORE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("BUCKETSTORE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Bucketstore Configuration
#
# Environment variables override these settings:
# - BUCKETSTORE_BUCKET_BACKEND
# - BUCKETSTORE_BUCKET_PATH
# - BUCKETSTORE_BUCKET_NAME
# - BUCKETSTORE_BUCKET_REGION
# - BUCKETSTORE_BUCKET_PREFIX
# - BUCKETSTORE_SYNC_INTERVAL_MS
# - BUCKETSTORE_API_HOST
# - BUCKETSTORE_API_PORT
# - BUCKETSTORE_LOG_LEVEL
# - BUCKETSTORE_LOG_FORMAT

[bucket]
# Backend: memory, local or s3
backend = "local"

# Root directory for the local backend
path = "./bucket"

# Bucket name and region for the s3 backend
# (credentials come from the standard AWS environment variables)
bucket = ""
region = "us-east-1"

# Key prefix under which block directories live
prefix = ""

[sync]
# Time between block sync passes (ms)
interval_ms = 30000

# Concurrent meta.json fetches per pass
meta_fetch_concurrency = 20

[query]
# Blocks opened concurrently per query
block_concurrency = 8

# Series buffered per streaming query
series_buffer = 64

# Query deadline (ms), 0 disables it
timeout_ms = 120000

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 10905

# Allowed CORS origins (empty allows any)
cors_origins = []

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
