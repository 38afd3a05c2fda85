//! Block file format: index and chunks objects
//!
//! Index object:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (16 bytes)                       │
//! │   magic: [u8; 4] = "BIDX"               │
//! │   version: u16                          │
//! │   reserved: [u8; 2]                     │
//! │   payload_len: u32                      │
//! │   payload_checksum: u32                 │
//! ├─────────────────────────────────────────┤
//! │ PAYLOAD                                 │
//! │   LZ4(bincode(series table))            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Chunks object:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (8 bytes)                        │
//! │   magic: [u8; 4] = "BCHK"               │
//! │   version: u16                          │
//! │   reserved: [u8; 2]                     │
//! ├─────────────────────────────────────────┤
//! │ RECORDS (variable)                      │
//! │   len: u32                              │
//! │   data: [u8; len]                       │
//! │   checksum: u32                         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A chunk reference is the byte offset of its record in the chunks object.

use crate::block::compression::{compress_index, decompress_index};
use crate::block::error::{StoreError, StoreResult};
use crate::block::meta::{BlockMeta, BlockStats, CHUNKS_FILENAME, INDEX_FILENAME, META_FILENAME};
use crate::block::types::{BlockId, Chunk, Labels, TimeRange};
use crate::bucket::Bucket;
use crate::store::matcher::{matches_labels, MatchOp, Matcher};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Magic bytes of the index object
const INDEX_MAGIC: [u8; 4] = *b"BIDX";

/// Magic bytes of the chunks object
const CHUNKS_MAGIC: [u8; 4] = *b"BCHK";

/// Current file format version
const FORMAT_VERSION: u16 = 1;

const INDEX_HEADER_SIZE: usize = 16;

const CHUNKS_HEADER_SIZE: usize = 8;

/// Location and time span of one chunk of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Byte offset of the chunk record in the chunks object
    pub chunk_ref: u64,
    pub min_time: i64,
    pub max_time: i64,
}

impl ChunkMeta {
    pub fn overlaps(&self, min_time: i64, max_time: i64) -> bool {
        self.max_time >= min_time && self.min_time <= max_time
    }
}

/// One row of the series table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub labels: Labels,
    /// Sorted by min_time
    pub chunks: Vec<ChunkMeta>,
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Serialize a series table into an index object
pub fn encode_index(entries: &[SeriesEntry]) -> StoreResult<Vec<u8>> {
    let payload = compress_index(entries)?;
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization("index payload exceeds 4 GiB".to_string()))?;

    let mut buf = Vec::with_capacity(INDEX_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&INDEX_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&[0u8; 2]);
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Parse and verify an index object
pub fn decode_index(data: &[u8]) -> StoreResult<Vec<SeriesEntry>> {
    if data.len() < INDEX_HEADER_SIZE {
        return Err(StoreError::Corruption(format!(
            "index too short: {} bytes",
            data.len()
        )));
    }
    if data[0..4] != INDEX_MAGIC {
        return Err(StoreError::Corruption(format!(
            "invalid index magic: {:?}",
            &data[0..4]
        )));
    }
    let version = read_u16(data, 4);
    if version == 0 || version > FORMAT_VERSION {
        return Err(StoreError::Corruption(format!(
            "unsupported index version: {}",
            version
        )));
    }

    let payload_len = read_u32(data, 8) as usize;
    let stored_checksum = read_u32(data, 12);
    let payload = &data[INDEX_HEADER_SIZE..];
    if payload.len() != payload_len {
        return Err(StoreError::Corruption(format!(
            "index payload length mismatch: header={}, actual={}",
            payload_len,
            payload.len()
        )));
    }

    let computed_checksum = crc32fast::hash(payload);
    if stored_checksum != computed_checksum {
        return Err(StoreError::Corruption(format!(
            "index checksum mismatch: stored={}, computed={}",
            stored_checksum, computed_checksum
        )));
    }

    let entries = decompress_index(payload)?;
    for window in entries.windows(2) {
        if window[0].labels >= window[1].labels {
            return Err(StoreError::Corruption(format!(
                "series {} out of order",
                window[1].labels
            )));
        }
    }
    for entry in &entries {
        if !entry.labels.is_sorted() {
            return Err(StoreError::Corruption(format!(
                "series {} has unsorted labels",
                entry.labels
            )));
        }
    }
    Ok(entries)
}

/// In-memory view of a block's series table
///
/// Keeps an inverted index `name -> value -> series positions` so equality
/// matchers narrow the candidate set before the remaining matchers run.
#[derive(Debug)]
pub struct IndexReader {
    series: Vec<SeriesEntry>,
    postings: BTreeMap<String, BTreeMap<String, Vec<u32>>>,
}

impl IndexReader {
    pub fn new(series: Vec<SeriesEntry>) -> Self {
        let mut postings: BTreeMap<String, BTreeMap<String, Vec<u32>>> = BTreeMap::new();
        for (pos, entry) in series.iter().enumerate() {
            for label in entry.labels.iter() {
                postings
                    .entry(label.name.clone())
                    .or_default()
                    .entry(label.value.clone())
                    .or_default()
                    .push(pos as u32);
            }
        }
        Self { series, postings }
    }

    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        Ok(Self::new(decode_index(data)?))
    }

    /// All series in label-sorted order
    pub fn series(&self) -> &[SeriesEntry] {
        &self.series
    }

    /// Sorted distinct label names
    pub fn label_names(&self) -> Vec<String> {
        self.postings.keys().cloned().collect()
    }

    /// Sorted distinct values of one label
    pub fn label_values(&self, name: &str) -> Vec<String> {
        self.postings
            .get(name)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Series satisfying every matcher, in label-sorted order
    pub fn select(&self, matchers: &[Matcher]) -> Vec<&SeriesEntry> {
        let narrowing = matchers
            .iter()
            .find(|m| m.op() == MatchOp::Equal && !m.value().is_empty());

        match narrowing {
            Some(m) => self
                .postings
                .get(m.name())
                .and_then(|values| values.get(m.value()))
                .map(|positions| {
                    positions
                        .iter()
                        .map(|&pos| &self.series[pos as usize])
                        .filter(|entry| matches_labels(&entry.labels, matchers))
                        .collect()
                })
                .unwrap_or_default(),
            None => self
                .series
                .iter()
                .filter(|entry| matches_labels(&entry.labels, matchers))
                .collect(),
        }
    }

    /// Sorted distinct label names over the series selected by `matchers`
    pub fn label_names_for(&self, matchers: &[Matcher]) -> Vec<String> {
        if matchers.is_empty() {
            return self.label_names();
        }
        let names: BTreeSet<&str> = self
            .select(matchers)
            .into_iter()
            .flat_map(|entry| entry.labels.names())
            .collect();
        names.into_iter().map(str::to_string).collect()
    }

    /// Sorted distinct values of `name` over the series selected by `matchers`
    pub fn label_values_for(&self, name: &str, matchers: &[Matcher]) -> Vec<String> {
        if matchers.is_empty() {
            return self.label_values(name);
        }
        let values: BTreeSet<&str> = self
            .select(matchers)
            .into_iter()
            .filter_map(|entry| entry.labels.get(name))
            .collect();
        values.into_iter().map(str::to_string).collect()
    }
}

/// Appends chunk records and hands out their references
#[derive(Debug)]
pub struct ChunksWriter {
    buf: Vec<u8>,
}

impl Default for ChunksWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunksWriter {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(&CHUNKS_MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&[0u8; 2]);
        Self { buf }
    }

    /// Append one chunk, returning its reference
    pub fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let len = u32::try_from(data.len())
            .map_err(|_| StoreError::Serialization("chunk exceeds 4 GiB".to_string()))?;
        let chunk_ref = self.buf.len() as u64;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        Ok(chunk_ref)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Random access to the chunk records of one block
#[derive(Debug, Clone)]
pub struct ChunkReader {
    data: Bytes,
}

impl ChunkReader {
    pub fn new(data: Bytes) -> StoreResult<Self> {
        if data.len() < CHUNKS_HEADER_SIZE {
            return Err(StoreError::Corruption(format!(
                "chunks object too short: {} bytes",
                data.len()
            )));
        }
        if data[0..4] != CHUNKS_MAGIC {
            return Err(StoreError::Corruption(format!(
                "invalid chunks magic: {:?}",
                &data[0..4]
            )));
        }
        let version = read_u16(&data, 4);
        if version == 0 || version > FORMAT_VERSION {
            return Err(StoreError::Corruption(format!(
                "unsupported chunks version: {}",
                version
            )));
        }
        Ok(Self { data })
    }

    /// Payload of the chunk record at `chunk_ref`
    pub fn chunk(&self, chunk_ref: u64) -> StoreResult<Bytes> {
        let start = usize::try_from(chunk_ref)
            .ok()
            .filter(|&start| {
                start >= CHUNKS_HEADER_SIZE
                    && start.checked_add(4).is_some_and(|end| end <= self.data.len())
            })
            .ok_or_else(|| {
                StoreError::Corruption(format!("chunk ref {} out of bounds", chunk_ref))
            })?;

        let len = read_u32(&self.data, start) as usize;
        let body = start + 4;
        if body + len + 4 > self.data.len() {
            return Err(StoreError::Corruption(format!(
                "chunk {} with length {} runs past end of object",
                chunk_ref, len
            )));
        }

        let payload = self.data.slice(body..body + len);
        let stored_checksum = read_u32(&self.data, body + len);
        if crc32fast::hash(&payload) != stored_checksum {
            return Err(StoreError::Corruption(format!(
                "chunk {} checksum mismatch",
                chunk_ref
            )));
        }
        Ok(payload)
    }
}

/// Writes a complete block (chunks, index, meta.json) into a bucket
///
/// `meta.json` is uploaded last so a block becomes loadable only once its
/// data objects exist.
#[derive(Debug)]
pub struct BlockBuilder {
    meta: BlockMeta,
    series: BTreeMap<Labels, Vec<Chunk>>,
}

impl BlockBuilder {
    pub fn new(id: BlockId, range: TimeRange) -> Self {
        Self {
            meta: BlockMeta::new(id, range),
            series: BTreeMap::new(),
        }
    }

    pub fn external_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta = self.meta.external_label(name, value);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.meta.thanos.source = source.into();
        self
    }

    /// Add chunks to a series, creating it if needed
    pub fn add_series(&mut self, labels: Labels, chunks: Vec<Chunk>) -> &mut Self {
        self.series.entry(labels).or_default().extend(chunks);
        self
    }

    pub fn id(&self) -> &BlockId {
        &self.meta.ulid
    }

    /// Encode the block and upload it, returning the stored metadata
    pub async fn upload(self, bucket: &dyn Bucket) -> StoreResult<BlockMeta> {
        let BlockBuilder { mut meta, series } = self;
        let range = meta.time_range();

        let mut writer = ChunksWriter::new();
        let mut entries = Vec::with_capacity(series.len());
        let mut num_chunks = 0u64;

        for (labels, mut chunks) in series {
            chunks.sort_by_key(|c| (c.min_time, c.max_time));
            let mut metas = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                if chunk.min_time > chunk.max_time
                    || !range.contains(chunk.min_time)
                    || !range.contains(chunk.max_time)
                {
                    return Err(StoreError::InvalidMeta(format!(
                        "chunk [{}, {}] of {} outside block range [{}, {}]",
                        chunk.min_time, chunk.max_time, labels, range.min_time, range.max_time
                    )));
                }
                metas.push(ChunkMeta {
                    chunk_ref: writer.append(&chunk.data)?,
                    min_time: chunk.min_time,
                    max_time: chunk.max_time,
                });
            }
            num_chunks += metas.len() as u64;
            entries.push(SeriesEntry {
                labels,
                chunks: metas,
            });
        }

        meta.stats = BlockStats {
            num_series: entries.len() as u64,
            num_chunks,
        };

        let id = meta.ulid.clone();
        bucket
            .put(&id, CHUNKS_FILENAME, Bytes::from(writer.finish()))
            .await?;
        bucket
            .put(&id, INDEX_FILENAME, Bytes::from(encode_index(&entries)?))
            .await?;
        bucket
            .put(&id, META_FILENAME, Bytes::from(meta.to_json()?))
            .await?;

        tracing::debug!(
            block = %id,
            series = meta.stats.num_series,
            chunks = meta.stats.num_chunks,
            "Block uploaded"
        );
        Ok(meta)
    }
}
