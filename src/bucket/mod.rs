//! Object store access for block artifacts
//!
//! Blocks live in a bucket under `<prefix>/<ulid>/<file>`. The gateway only
//! needs to enumerate block directories and fetch whole objects; uploads are
//! used by the block builder and the demo tooling.

use crate::block::error::{StoreError, StoreResult};
use crate::block::types::BlockId;
use crate::config::{BucketBackend, BucketConfig};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

/// Read/write access to block directories in an object store
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Identifiers of every block directory currently present
    async fn list_blocks(&self) -> StoreResult<Vec<BlockId>>;

    /// Fetch a whole object from a block directory
    async fn get(&self, block: &BlockId, name: &str) -> StoreResult<Bytes>;

    /// Store a whole object in a block directory
    async fn put(&self, block: &BlockId, name: &str, data: Bytes) -> StoreResult<()>;

    /// Delete every object of a block directory
    async fn delete_block(&self, block: &BlockId) -> StoreResult<()>;

    /// Human readable name used in logs
    fn name(&self) -> &str;
}

/// [`Bucket`] backed by any `object_store` implementation
pub struct ObjectStoreBucket {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    name: String,
}

impl ObjectStoreBucket {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, name: impl Into<String>) -> Self {
        Self {
            store,
            prefix: Path::from(prefix),
            name: name.into(),
        }
    }

    /// Process-local bucket, mostly for tests and demos
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), "", "memory")
    }

    /// Bucket rooted at a local directory, created if missing
    pub fn local(path: impl AsRef<std::path::Path>, prefix: &str) -> StoreResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(path).map_err(|e| {
            StoreError::Bucket(format!(
                "Failed to create local filesystem store at {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::new(
            Arc::new(store),
            prefix,
            format!("file://{}", path.display()),
        ))
    }

    /// S3 bucket; credentials come from the standard AWS environment variables
    pub fn s3(bucket: &str, region: &str, prefix: &str) -> StoreResult<Self> {
        let store = object_store::aws::AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| StoreError::Bucket(format!("Failed to create S3 store: {}", e)))?;
        Ok(Self::new(Arc::new(store), prefix, format!("s3://{}", bucket)))
    }

    fn block_dir(&self, block: &BlockId) -> Path {
        self.prefix.child(block.as_str())
    }

    fn object_path(&self, block: &BlockId, name: &str) -> Path {
        self.block_dir(block).child(name)
    }
}

#[async_trait]
impl Bucket for ObjectStoreBucket {
    async fn list_blocks(&self) -> StoreResult<Vec<BlockId>> {
        let prefix = if self.prefix.as_ref().is_empty() {
            None
        } else {
            Some(&self.prefix)
        };
        let listing = self.store.list_with_delimiter(prefix).await?;

        let mut ids: Vec<BlockId> = listing
            .common_prefixes
            .iter()
            .filter_map(|dir| dir.filename())
            .filter_map(|name| match BlockId::parse(name) {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::debug!(bucket = %self.name, entry = name, "Ignoring non-block entry");
                    None
                }
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get(&self, block: &BlockId, name: &str) -> StoreResult<Bytes> {
        let path = self.object_path(block, name);
        let data = self.store.get(&path).await?.bytes().await?;
        Ok(data)
    }

    async fn put(&self, block: &BlockId, name: &str, data: Bytes) -> StoreResult<()> {
        let path = self.object_path(block, name);
        self.store.put(&path, PutPayload::from(data)).await?;
        Ok(())
    }

    async fn delete_block(&self, block: &BlockId) -> StoreResult<()> {
        let dir = self.block_dir(block);
        let objects: Vec<_> = self.store.list(Some(&dir)).try_collect().await?;
        for object in objects {
            self.store.delete(&object.location).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build the bucket described by the configuration
pub fn create_bucket(config: &BucketConfig) -> StoreResult<Arc<dyn Bucket>> {
    let bucket: Arc<dyn Bucket> = match config.backend {
        BucketBackend::Memory => Arc::new(ObjectStoreBucket::in_memory()),
        BucketBackend::Local => Arc::new(ObjectStoreBucket::local(&config.path, &config.prefix)?),
        BucketBackend::S3 => Arc::new(ObjectStoreBucket::s3(
            &config.bucket,
            &config.region,
            &config.prefix,
        )?),
    };
    tracing::info!(bucket = bucket.name(), prefix = %config.prefix, "Bucket configured");
    Ok(bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let bucket = ObjectStoreBucket::in_memory();
        let id = BlockId::generate(1_000);

        bucket
            .put(&id, "meta.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        let data = bucket.get(&id, "meta.json").await.unwrap();
        assert_eq!(&data[..], b"{}");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let bucket = ObjectStoreBucket::in_memory();
        let err = bucket
            .get(&BlockId::generate(1), "index")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_list_skips_foreign_entries() {
        let store: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        let bucket = ObjectStoreBucket::new(store.clone(), "blocks", "test");

        let a = BlockId::generate(1_000);
        let b = BlockId::generate(2_000);
        bucket.put(&b, "meta.json", Bytes::new()).await.unwrap();
        bucket.put(&a, "meta.json", Bytes::new()).await.unwrap();
        store
            .put(
                &Path::from("blocks/debug/notes.txt"),
                PutPayload::from_static(b"x"),
            )
            .await
            .unwrap();
        store
            .put(
                &Path::from("elsewhere/01ARZ3NDEKTSV4RRFFQ69G5FAV/meta.json"),
                PutPayload::from_static(b"x"),
            )
            .await
            .unwrap();

        let ids = bucket.list_blocks().await.unwrap();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn test_delete_block() {
        let bucket = ObjectStoreBucket::in_memory();
        let id = BlockId::generate(5);
        bucket.put(&id, "meta.json", Bytes::new()).await.unwrap();
        bucket.put(&id, "index", Bytes::new()).await.unwrap();

        bucket.delete_block(&id).await.unwrap();
        assert!(bucket.list_blocks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_bucket() {
        let dir = TempDir::new().unwrap();
        let bucket = ObjectStoreBucket::local(dir.path().join("bucket"), "").unwrap();
        let id = BlockId::generate(7);

        bucket
            .put(&id, "chunks", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(bucket.list_blocks().await.unwrap(), vec![id.clone()]);
        assert_eq!(&bucket.get(&id, "chunks").await.unwrap()[..], b"abc");
    }
}
