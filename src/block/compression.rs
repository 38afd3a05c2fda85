//! Index payload encoding
//!
//! The series table of a block is stored compactly:
//! 1. Intern every label name and value into a string table
//! 2. Store each series as (name_idx, value_idx) pairs plus its chunk metas
//! 3. Delta-encode chunk min times within a series
//! 4. Serialize with bincode, then LZ4 compress the result

use crate::block::error::{StoreError, StoreResult};
use crate::block::format::{ChunkMeta, SeriesEntry};
use crate::block::types::{Label, Labels};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Intermediate format of the series table
#[derive(Debug, Serialize, Deserialize)]
struct EncodedIndex {
    /// String intern table
    strings: Vec<String>,
    /// One entry per series, in label-sorted order
    series: Vec<EncodedSeries>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EncodedSeries {
    /// (name_idx, value_idx) pairs
    labels: Vec<(u32, u32)>,
    /// Chunk refs
    refs: Vec<u64>,
    /// First chunk min time, then deltas from the previous chunk's min time
    min_deltas: Vec<i64>,
    /// max_time - min_time per chunk
    spans: Vec<i64>,
}

#[derive(Default)]
struct StringTable {
    strings: Vec<String>,
    lookup: HashMap<String, u32>,
}

impl StringTable {
    /// Intern a string, returning its index
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.lookup.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.lookup.insert(s.to_string(), idx);
        idx
    }
}

/// Encode a series table (already sorted by the caller) into LZ4-compressed bytes
pub fn compress_index(entries: &[SeriesEntry]) -> StoreResult<Vec<u8>> {
    let mut table = StringTable::default();
    let mut series = Vec::with_capacity(entries.len());

    for entry in entries {
        let labels = entry
            .labels
            .iter()
            .map(|l| (table.intern(&l.name), table.intern(&l.value)))
            .collect();

        let mut min_deltas = Vec::with_capacity(entry.chunks.len());
        let mut prev = 0i64;
        for (i, chunk) in entry.chunks.iter().enumerate() {
            let delta = if i == 0 {
                chunk.min_time
            } else {
                chunk.min_time.wrapping_sub(prev)
            };
            min_deltas.push(delta);
            prev = chunk.min_time;
        }

        series.push(EncodedSeries {
            labels,
            refs: entry.chunks.iter().map(|c| c.chunk_ref).collect(),
            min_deltas,
            spans: entry
                .chunks
                .iter()
                .map(|c| c.max_time.wrapping_sub(c.min_time))
                .collect(),
        });
    }

    let encoded = EncodedIndex {
        strings: table.strings,
        series,
    };

    let serialized =
        bincode::serialize(&encoded).map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(lz4_flex::compress_prepend_size(&serialized))
}

const MAX_LZ4_RATIO: usize = 255;

/// Decode bytes produced by [`compress_index`]
///
/// Any decoding failure means the stored index is corrupt.
pub fn decompress_index(data: &[u8]) -> StoreResult<Vec<SeriesEntry>> {
    let declared = data
        .get(..4)
        .and_then(|prefix| <[u8; 4]>::try_from(prefix).ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| StoreError::Corruption("index payload too short".to_string()))?;
    // LZ4 cannot expand a block by more than 255x
    let limit = (data.len() - 4).saturating_mul(MAX_LZ4_RATIO).saturating_add(16);
    if declared as usize > limit {
        return Err(StoreError::Corruption(format!(
            "declared index size {} exceeds {} for a {} byte payload",
            declared,
            limit,
            data.len()
        )));
    }

    let decompressed = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| StoreError::Corruption(format!("LZ4 decompression failed: {}", e)))?;

    let encoded: EncodedIndex = bincode::deserialize(&decompressed)
        .map_err(|e| StoreError::Corruption(format!("index decode failed: {}", e)))?;

    let lookup = |idx: u32| -> StoreResult<&String> {
        encoded.strings.get(idx as usize).ok_or_else(|| {
            StoreError::Corruption(format!("string index {} out of range", idx))
        })
    };

    let mut entries = Vec::with_capacity(encoded.series.len());
    for series in &encoded.series {
        if series.refs.len() != series.min_deltas.len() || series.refs.len() != series.spans.len()
        {
            return Err(StoreError::Corruption(
                "chunk meta columns have different lengths".to_string(),
            ));
        }

        let mut labels = Vec::with_capacity(series.labels.len());
        for &(name, value) in &series.labels {
            labels.push((lookup(name)?.clone(), lookup(value)?.clone()));
        }

        let mut chunks = Vec::with_capacity(series.refs.len());
        let mut min_time = 0i64;
        for i in 0..series.refs.len() {
            min_time = if i == 0 {
                series.min_deltas[i]
            } else {
                min_time.wrapping_add(series.min_deltas[i])
            };
            chunks.push(ChunkMeta {
                chunk_ref: series.refs[i],
                min_time,
                max_time: min_time.wrapping_add(series.spans[i]),
            });
        }

        entries.push(SeriesEntry {
            labels: labels_from_vec(labels),
            chunks,
        });
    }

    Ok(entries)
}

fn labels_from_vec(pairs: Vec<(String, String)>) -> Labels {
    // Keep the stored order; the index reader validates sortedness.
    let labels: Vec<Label> = pairs.into_iter().map(|(n, v)| Label::new(n, v)).collect();
    Labels::from_sorted_unchecked(labels)
}
