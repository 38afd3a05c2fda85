//! Core data types for the block layer
//!
//! - `BlockId`: ULID identifying one immutable block
//! - `TimeRange`: closed millisecond interval
//! - `Label` / `Labels`: sorted label sets
//! - `Chunk` / `Series`: query result units

use crate::block::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

/// Crockford base32 alphabet used by ULIDs
const ULID_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Encoded ULID length
const ULID_LEN: usize = 26;

/// Low 80 bits of a ULID carry entropy, the high 48 the timestamp
const ENTROPY_MASK: u128 = (1u128 << 80) - 1;
const TIME_MASK: u128 = (1u128 << 48) - 1;

/// Process-wide generator behind [`BlockId::generate`]
static GENERATOR: Mutex<BlockIdGenerator> = Mutex::new(BlockIdGenerator::new());

/// Identifier of an immutable block
///
/// A 128-bit ULID rendered as 26 Crockford base32 characters. The first 48 bits
/// are the creation time in milliseconds, so lexicographic order is creation order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockId(String);

impl BlockId {
    /// Generate a fresh identifier for a block created at `timestamp_ms`
    ///
    /// Identifiers generated in this process for the same timestamp sort in
    /// generation order.
    pub fn generate(timestamp_ms: u64) -> Self {
        GENERATOR
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate(timestamp_ms)
    }

    /// Parse and validate an identifier (case-insensitive, stored upper-case)
    pub fn parse(s: &str) -> StoreResult<Self> {
        let upper = s.to_ascii_uppercase();
        decode_ulid(&upper)?;
        Ok(Self(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time embedded in the identifier
    pub fn timestamp_ms(&self) -> u64 {
        decode_ulid(&self.0).map(|v| (v >> 80) as u64).unwrap_or(0)
    }
}

/// Monotonic ULID source
///
/// Within one millisecond the previous entropy is incremented instead of
/// drawing fresh random bits.
#[derive(Debug, Default)]
pub struct BlockIdGenerator {
    last: Option<u128>,
}

impl BlockIdGenerator {
    pub const fn new() -> Self {
        Self { last: None }
    }

    pub fn generate(&mut self, timestamp_ms: u64) -> BlockId {
        let time = (timestamp_ms as u128 & TIME_MASK) << 80;
        let value = match self.last {
            Some(last) if last & !ENTROPY_MASK == time && last & ENTROPY_MASK != ENTROPY_MASK => {
                last + 1
            }
            _ => time | (uuid::Uuid::new_v4().as_u128() & ENTROPY_MASK),
        };
        self.last = Some(value);
        BlockId(encode_ulid(value))
    }
}

fn encode_ulid(value: u128) -> String {
    (0..ULID_LEN)
        .map(|i| {
            let shift = 5 * (ULID_LEN - 1 - i);
            ULID_ALPHABET[((value >> shift) & 0x1f) as usize] as char
        })
        .collect()
}

fn decode_ulid(s: &str) -> StoreResult<u128> {
    if s.len() != ULID_LEN {
        return Err(StoreError::InvalidMeta(format!(
            "block id {:?} must be {} characters",
            s, ULID_LEN
        )));
    }

    let mut value: u128 = 0;
    for (i, c) in s.bytes().enumerate() {
        let digit = ULID_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| {
                StoreError::InvalidMeta(format!("block id {:?} has invalid character", s))
            })?;
        // The leading character only carries 3 bits
        if i == 0 && digit > 7 {
            return Err(StoreError::InvalidMeta(format!(
                "block id {:?} overflows 128 bits",
                s
            )));
        }
        value = (value << 5) | digit as u128;
    }
    Ok(value)
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlockId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BlockId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BlockId> for String {
    fn from(id: BlockId) -> Self {
        id.0
    }
}

/// Time range for blocks, chunks and queries (closed interval: [min_time, max_time])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    /// First covered timestamp (inclusive), in milliseconds
    pub min_time: i64,
    /// Last covered timestamp (inclusive), in milliseconds
    pub max_time: i64,
}

impl TimeRange {
    /// Create a new time range
    ///
    /// # Panics
    /// Panics if min_time > max_time
    pub fn new(min_time: i64, max_time: i64) -> Self {
        assert!(
            min_time <= max_time,
            "TimeRange: min_time must not exceed max_time"
        );
        Self { min_time, max_time }
    }

    /// Create a time range, returning None if invalid
    pub fn try_new(min_time: i64, max_time: i64) -> Option<Self> {
        if min_time <= max_time {
            Some(Self { min_time, max_time })
        } else {
            None
        }
    }

    /// The whole representable timeline
    pub fn all() -> Self {
        Self {
            min_time: i64::MIN,
            max_time: i64::MAX,
        }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.min_time && timestamp <= self.max_time
    }

    /// Check if `[min_time, max_time]` shares at least one instant with this range
    pub fn overlaps(&self, min_time: i64, max_time: i64) -> bool {
        max_time >= self.min_time && min_time <= self.max_time
    }

    /// Smallest range covering both
    pub fn union(&self, other: &TimeRange) -> Self {
        Self {
            min_time: self.min_time.min(other.min_time),
            max_time: self.max_time.max(other.max_time),
        }
    }
}

/// A single label name/value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A label set, sorted by name with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from name/value pairs; later duplicates overwrite earlier ones
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let map: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(n, v)| (n.into(), v.into()))
            .collect();
        Self::from_map(&map)
    }

    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        Self(
            map.iter()
                .map(|(n, v)| Label::new(n.clone(), v.clone()))
                .collect(),
        )
    }

    /// Wrap labels that are already sorted by name
    pub(crate) fn from_sorted_unchecked(labels: Vec<Label>) -> Self {
        Self(labels)
    }

    /// Get the value of a label
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|l| l.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that labels are strictly sorted by name
    pub fn is_sorted(&self) -> bool {
        self.0.windows(2).all(|w| w[0].name < w[1].name)
    }

    /// Overlay block-wide external labels; external values win on conflict
    pub fn with_external(&self, external: &BTreeMap<String, String>) -> Self {
        if external.is_empty() {
            return self.clone();
        }
        let mut map: BTreeMap<String, String> = self
            .0
            .iter()
            .map(|l| (l.name.clone(), l.value.clone()))
            .collect();
        for (name, value) in external {
            map.insert(name.clone(), value.clone());
        }
        Self::from_map(&map)
    }

    pub fn into_vec(self) -> Vec<Label> {
        self.0
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

/// An opaquely encoded run of samples for one series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub min_time: i64,
    pub max_time: i64,
    pub data: Vec<u8>,
}

/// One query result: a label set and its chunks in time order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub labels: Labels,
    pub chunks: Vec<Chunk>,
}
