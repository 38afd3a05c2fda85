//! Block descriptor
//!
//! The registry's view of one immutable block: its validated metadata plus
//! the bucket handle needed to open the index and chunk readers on demand.

use crate::block::error::StoreResult;
use crate::block::format::{ChunkReader, IndexReader};
use crate::block::meta::{BlockMeta, CHUNKS_FILENAME, INDEX_FILENAME, META_FILENAME};
use crate::block::types::{BlockId, TimeRange};
use crate::bucket::Bucket;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Immutable description of a block known to the gateway
pub struct BlockDescriptor {
    meta: BlockMeta,
    bucket: Arc<dyn Bucket>,
}

impl BlockDescriptor {
    /// Wrap metadata that has already been validated for this block
    pub fn new(meta: BlockMeta, bucket: Arc<dyn Bucket>) -> Self {
        Self { meta, bucket }
    }

    /// Fetch and validate `meta.json` for `id`
    ///
    /// Only the metadata object is read; index and chunks stay remote until a
    /// query opens them.
    pub async fn load(bucket: Arc<dyn Bucket>, id: &BlockId) -> StoreResult<Self> {
        let raw = bucket.get(id, META_FILENAME).await?;
        let meta = BlockMeta::parse(&raw, id)?;
        Ok(Self::new(meta, bucket))
    }

    pub fn id(&self) -> &BlockId {
        &self.meta.ulid
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    pub fn time_range(&self) -> TimeRange {
        self.meta.time_range()
    }

    pub fn external_labels(&self) -> &BTreeMap<String, String> {
        self.meta.external_labels()
    }

    /// Fetch and decode the series index
    pub async fn open_index_reader(&self) -> StoreResult<IndexReader> {
        let raw = self.bucket.get(self.id(), INDEX_FILENAME).await?;
        IndexReader::from_bytes(&raw)
    }

    /// Fetch the chunks object for random access by chunk reference
    pub async fn open_chunk_reader(&self) -> StoreResult<ChunkReader> {
        let raw = self.bucket.get(self.id(), CHUNKS_FILENAME).await?;
        ChunkReader::new(raw)
    }
}

impl fmt::Debug for BlockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDescriptor")
            .field("id", self.id())
            .field("min_time", &self.meta.min_time)
            .field("max_time", &self.meta.max_time)
            .field("external_labels", self.external_labels())
            .field("bucket", &self.bucket.name())
            .finish()
    }
}
