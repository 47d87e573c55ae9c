//! Edge records and views.

use std::collections::BTreeMap;
use std::sync::Arc;

use quiver_common::mvcc::VersionChain;
use quiver_common::types::{EdgeId, EdgeTypeId, NodeId, PropertyKey, Value};

/// The immutable part of an edge. Only existence is versioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRecord {
    /// Source node.
    pub src: NodeId,
    /// Destination node.
    pub dst: NodeId,
    /// Edge type.
    pub edge_type: EdgeTypeId,
}

impl EdgeRecord {
    /// The endpoint opposite to `node`.
    #[must_use]
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if self.src == node { self.dst } else { self.src }
    }
}

/// Arena slot of one edge.
#[derive(Debug)]
pub(crate) struct EdgeSlot {
    pub(crate) record: EdgeRecord,
    pub(crate) chain: VersionChain<()>,
}

/// An edge as seen by one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Edge id.
    pub id: EdgeId,
    /// Source node.
    pub src: NodeId,
    /// Destination node.
    pub dst: NodeId,
    /// Edge type name.
    pub edge_type: Arc<str>,
    /// Visible properties, ordered by key.
    pub properties: BTreeMap<PropertyKey, Value>,
}

impl Edge {
    /// Returns a property value.
    #[must_use]
    pub fn get_property(&self, key: &str) -> Option<&Value> {
        self.properties.get(&PropertyKey::new(key))
    }
}
