//! The labeled property graph store.
//!
//! Nodes and edges live in slot arenas indexed by their ids, so records
//! refer to each other by id only. Labels and edge existence are versioned
//! per record; properties are versioned per value in columnar storage.

mod arena;
mod edge;
mod image;
mod node;
mod property;
mod store;

pub use edge::{Edge, EdgeRecord};
pub use image::{AdjacencyImage, EdgeImage, IndexKind, NodeImage, StoreImage};
pub use node::{Node, NodeRecord};
pub use property::{ColumnHandle, EntityId, PropertyColumn, PropertyStorage};
pub use store::{EdgeScan, GcStats, LpgStore, LpgStoreConfig, NodeCandidates, NodeScan};
