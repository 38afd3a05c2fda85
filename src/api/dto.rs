//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::block::{BlockDescriptor, Chunk, Series};
use crate::store::SyncStatus;

// ============================================
// QUERY DTOs
// ============================================

/// Query string shared by the series and label endpoints
#[derive(Debug, Default, Deserialize)]
pub struct SelectorParams {
    /// Series selector, e.g. `{job="api",env=~"prod|staging"}`
    #[serde(default, rename = "match")]
    pub selector: Option<String>,
    /// Inclusive start (ms since epoch), unbounded when absent
    #[serde(default)]
    pub start: Option<i64>,
    /// Inclusive end (ms since epoch), unbounded when absent
    #[serde(default)]
    pub end: Option<i64>,
}

impl SelectorParams {
    /// Resolved `(start, end)` with open ends widened to the full range
    pub fn time_range(&self) -> (i64, i64) {
        (self.start.unwrap_or(i64::MIN), self.end.unwrap_or(i64::MAX))
    }
}

/// Chunk in a series response
#[derive(Debug, Serialize)]
pub struct ChunkDto {
    pub min_time: i64,
    pub max_time: i64,
    pub data: Vec<u8>,
}

impl From<Chunk> for ChunkDto {
    fn from(chunk: Chunk) -> Self {
        Self {
            min_time: chunk.min_time,
            max_time: chunk.max_time,
            data: chunk.data,
        }
    }
}

/// One series in a series response
#[derive(Debug, Serialize)]
pub struct SeriesDto {
    pub labels: BTreeMap<String, String>,
    pub chunks: Vec<ChunkDto>,
}

impl From<Series> for SeriesDto {
    fn from(series: Series) -> Self {
        Self {
            labels: series
                .labels
                .into_vec()
                .into_iter()
                .map(|l| (l.name, l.value))
                .collect(),
            chunks: series.chunks.into_iter().map(ChunkDto::from).collect(),
        }
    }
}

/// Series query response
#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub status: String,
    pub data: Vec<SeriesDto>,
}

/// Label names or label values response
#[derive(Debug, Serialize)]
pub struct LabelsResponse {
    pub status: String,
    pub data: Vec<String>,
}

// ============================================
// BLOCK DTOs
// ============================================

/// Summary of one registered block
#[derive(Debug, Serialize)]
pub struct BlockDto {
    pub id: String,
    pub min_time: i64,
    pub max_time: i64,
    pub num_series: u64,
    pub num_chunks: u64,
    pub external_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
}

impl From<&BlockDescriptor> for BlockDto {
    fn from(block: &BlockDescriptor) -> Self {
        let meta = block.meta();
        Self {
            id: block.id().to_string(),
            min_time: meta.min_time,
            max_time: meta.max_time,
            num_series: meta.stats.num_series,
            num_chunks: meta.stats.num_chunks,
            external_labels: meta.external_labels().clone(),
            source: meta.thanos.source.clone(),
        }
    }
}

/// Block listing response
#[derive(Debug, Serialize)]
pub struct BlockListResponse {
    pub blocks: Vec<BlockDto>,
    pub total: usize,
}

// ============================================
// SYNC DTOs
// ============================================

/// Manual sync response
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    /// "success" or "failed"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SyncStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sync status response
#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub passes: u64,
    /// Last successful pass as RFC 3339, if any
    pub last_sync: Option<String>,
    pub last_status: Option<SyncStatus>,
    pub last_error: Option<String>,
    pub blocks: usize,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy", "degraded" or "starting"
    pub status: String,
    pub ready: bool,
    pub blocks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub uptime_seconds: u64,
    pub version: String,
}
