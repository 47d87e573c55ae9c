//! # quiver-core
//!
//! Core layer for Quiver: the property graph store, index structures,
//! columnar encodings, statistics and the push-based execution engine.
//!
//! This crate depends only on `quiver-common`.
//!
//! ## Modules
//!
//! - [`graph`] - The labeled property graph store with MVCC versions
//! - [`index`] - Index structures (Hash, BTree, Chunked Adjacency, Zone Maps)
//! - [`execution`] - Pipelines, operators and morsel scheduling
//! - [`statistics`] - Statistics collection for query optimization
//! - [`storage`] - Compressed column blocks

pub mod execution;
pub mod graph;
pub mod index;
pub mod statistics;
pub mod storage;

// Re-export commonly used types
pub use graph::Direction;
pub use graph::lpg::{Edge, IndexKind, LpgStore, Node};
pub use index::adjacency::ChunkedAdjacency;
pub use statistics::{ColumnStatistics, EdgeTypeStatistics, Histogram, LabelStatistics, Statistics};
pub use storage::{ColumnBlock, CompressionCodec};
