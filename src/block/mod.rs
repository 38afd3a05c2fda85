//! Immutable blocks
//!
//! - **types**: Core data structures (BlockId, TimeRange, Labels, Series)
//! - **meta**: `meta.json` record and its validation
//! - **compression**: Series table encoding (string interning + LZ4)
//! - **format**: Index and chunks objects, readers and the block builder
//! - **descriptor**: Registry entry with on-demand reader access
//! - **error**: Error types
//!
//! # Layout
//!
//! ```text
//! <prefix>/<ulid>/meta.json   time range, external labels, stats
//! <prefix>/<ulid>/index       series table (labels -> chunk metas)
//! <prefix>/<ulid>/chunks      opaque chunk payloads
//! ```

pub mod compression;
pub mod descriptor;
pub mod error;
pub mod format;
pub mod meta;
pub mod types;

pub use descriptor::BlockDescriptor;
pub use error::{StoreError, StoreResult};
pub use format::{BlockBuilder, ChunkMeta, ChunkReader, IndexReader, SeriesEntry};
pub use meta::{BlockMeta, BlockStats, ExternalMeta};
pub use types::{BlockId, BlockIdGenerator, Chunk, Label, Labels, Series, TimeRange};
