//! Serializable images of the store, written by checkpoints.
//!
//! An image holds exactly the state visible at one committed epoch. Ids
//! keep their slots so property columns can be stored as encoded blocks
//! indexed by slot.

use quiver_common::types::PropertyKey;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::storage::ColumnBlock;

/// Kind of a secondary property index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Equality lookups.
    Hash,
    /// Equality and range lookups.
    BTree,
}

/// Nodes, their labels and their property columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeImage {
    /// Label names by label id.
    pub label_names: Vec<String>,
    /// Slot of each live node.
    pub ids: Vec<u64>,
    /// Label ids per node, parallel to `ids`.
    pub labels: Vec<SmallVec<[u32; 4]>>,
    /// One past the highest slot ever allocated.
    pub high_water: u64,
    /// Encoded property columns, indexed by slot.
    pub columns: Vec<(PropertyKey, Vec<ColumnBlock>)>,
    /// Property indexes to rebuild on load.
    pub indexes: Vec<(PropertyKey, IndexKind)>,
}

/// Edges and their property columns, stored column-wise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeImage {
    /// Edge type names by type id.
    pub type_names: Vec<String>,
    /// Slot of each live edge.
    pub ids: Vec<u64>,
    /// Source slots, parallel to `ids`.
    pub src: Vec<u64>,
    /// Destination slots, parallel to `ids`.
    pub dst: Vec<u64>,
    /// Type ids, parallel to `ids`.
    pub types: Vec<u32>,
    /// One past the highest slot ever allocated.
    pub high_water: u64,
    /// Encoded property columns, indexed by slot.
    pub columns: Vec<(PropertyKey, Vec<ColumnBlock>)>,
}

/// Forward adjacency lists: `(node, edge type, [(neighbor, edge)])`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjacencyImage {
    /// One entry per node and edge type.
    pub lists: Vec<(u64, u32, Vec<(u64, u64)>)>,
}

/// A full store image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreImage {
    /// Node part.
    pub nodes: NodeImage,
    /// Edge part.
    pub edges: EdgeImage,
    /// Adjacency part.
    pub adjacency: AdjacencyImage,
}
