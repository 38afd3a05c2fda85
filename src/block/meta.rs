//! Block metadata (`meta.json`)
//!
//! The metadata record is readable without touching the index or chunk files.
//! It carries the block's time range and its external labels.
//!
//! ```text
//! {
//!   "ulid": "01H8...",
//!   "minTime": 1700000000000,
//!   "maxTime": 1700007200000,
//!   "version": 1,
//!   "stats": { "numSeries": 4, "numChunks": 4 },
//!   "thanos": { "labels": { "replica": "r0" }, "source": "sidecar" }
//! }
//! ```

use crate::block::error::{StoreError, StoreResult};
use crate::block::types::{BlockId, TimeRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Object name of the metadata record inside a block directory
pub const META_FILENAME: &str = "meta.json";

/// Object name of the series index inside a block directory
pub const INDEX_FILENAME: &str = "index";

/// Object name of the chunk file inside a block directory
pub const CHUNKS_FILENAME: &str = "chunks";

/// Highest metadata version this reader understands
pub const META_VERSION: u32 = 1;

/// Per-block statistics recorded at creation time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStats {
    #[serde(default)]
    pub num_series: u64,
    #[serde(default)]
    pub num_chunks: u64,
}

/// Gateway-specific section: external labels and the producer of the block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMeta {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub source: String,
}

/// Metadata of one immutable block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    pub ulid: BlockId,
    pub min_time: i64,
    pub max_time: i64,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub stats: BlockStats,
    #[serde(default)]
    pub thanos: ExternalMeta,
}

fn default_version() -> u32 {
    META_VERSION
}

impl BlockMeta {
    pub fn new(ulid: BlockId, range: TimeRange) -> Self {
        Self {
            ulid,
            min_time: range.min_time,
            max_time: range.max_time,
            version: META_VERSION,
            stats: BlockStats::default(),
            thanos: ExternalMeta::default(),
        }
    }

    /// Builder: attach an external label
    pub fn external_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.thanos.labels.insert(name.into(), value.into());
        self
    }

    /// Parse and validate a metadata record fetched for block `expected`
    pub fn parse(bytes: &[u8], expected: &BlockId) -> StoreResult<Self> {
        let meta: BlockMeta = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::InvalidMeta(format!("block {}: {}", expected, e)))?;
        meta.validate(expected)?;
        Ok(meta)
    }

    /// Check block invariants; violations are reported as corruption
    pub fn validate(&self, expected: &BlockId) -> StoreResult<()> {
        if &self.ulid != expected {
            return Err(StoreError::InvalidMeta(format!(
                "block {} carries metadata for {}",
                expected, self.ulid
            )));
        }
        if self.min_time > self.max_time {
            return Err(StoreError::InvalidMeta(format!(
                "block {}: minTime {} > maxTime {}",
                expected, self.min_time, self.max_time
            )));
        }
        if self.version == 0 || self.version > META_VERSION {
            return Err(StoreError::InvalidMeta(format!(
                "block {}: unsupported version {}",
                expected, self.version
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            min_time: self.min_time,
            max_time: self.max_time,
        }
    }

    pub fn external_labels(&self) -> &BTreeMap<String, String> {
        &self.thanos.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_id() -> BlockId {
        BlockId::parse("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap()
    }

    #[test]
    fn test_meta_json_roundtrip_with_labels() {
        let meta = BlockMeta::new(sample_id(), TimeRange::new(100, 200))
            .external_label("replica", "r0");
        let json = meta.to_json().unwrap();

        let text = String::from_utf8(json.clone()).unwrap();
        assert!(text.contains("\"minTime\": 100"));
        assert!(text.contains("\"replica\": \"r0\""));

        let parsed = BlockMeta::parse(&json, &sample_id()).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_meta_defaults_for_missing_sections() {
        let json = br#"{"ulid":"01ARZ3NDEKTSV4RRFFQ69G5FAV","minTime":1,"maxTime":2}"#;
        let meta = BlockMeta::parse(json, &sample_id()).unwrap();
        assert_eq!(meta.version, META_VERSION);
        assert!(meta.external_labels().is_empty());
    }

    #[test]
    fn test_meta_rejects_inverted_range() {
        let json = br#"{"ulid":"01ARZ3NDEKTSV4RRFFQ69G5FAV","minTime":300,"maxTime":200}"#;
        let err = BlockMeta::parse(json, &sample_id()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_meta_rejects_foreign_ulid() {
        let other = BlockId::generate(42);
        let meta = BlockMeta::new(other, TimeRange::new(1, 2));
        let json = meta.to_json().unwrap();
        assert!(BlockMeta::parse(&json, &sample_id()).is_err());
    }

    #[test]
    fn test_meta_rejects_malformed_json() {
        let err = BlockMeta::parse(b"{not json", &sample_id()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMeta(_)));
    }
}
