//! Index structures.
//!
//! - [`adjacency`] - Chunked, per-edge-type adjacency lists
//! - [`hash`] - Hash index for equality lookups
//! - [`btree`] - Ordered index for range lookups
//! - [`zone_map`] - Per-block min/max summaries for scan pruning

pub mod adjacency;
pub mod btree;
pub mod hash;
pub mod zone_map;

pub use adjacency::ChunkedAdjacency;
pub use btree::BTreeIndex;
pub use hash::HashIndex;
pub use zone_map::{CompareOp, ZoneMapEntry};
