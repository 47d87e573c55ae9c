//! Node records and views.

use std::collections::BTreeMap;
use std::sync::Arc;

use quiver_common::mvcc::VersionChain;
use quiver_common::types::{LabelId, NodeId, PropertyKey, Value};
use smallvec::SmallVec;

/// The versioned part of a node: its labels. Properties live in columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeRecord {
    /// Label ids, kept sorted.
    pub labels: SmallVec<[LabelId; 4]>,
}

impl NodeRecord {
    /// Creates a record with the given labels.
    #[must_use]
    pub fn new(mut labels: SmallVec<[LabelId; 4]>) -> Self {
        labels.sort_unstable();
        labels.dedup();
        Self { labels }
    }

    /// Returns true if the node carries `label`.
    #[must_use]
    pub fn has_label(&self, label: LabelId) -> bool {
        self.labels.binary_search(&label).is_ok()
    }
}

/// Arena slot of one node.
#[derive(Debug, Default)]
pub(crate) struct NodeSlot {
    pub(crate) chain: VersionChain<NodeRecord>,
}

/// A node as seen by one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node id.
    pub id: NodeId,
    /// Label names.
    pub labels: SmallVec<[Arc<str>; 2]>,
    /// Visible properties, ordered by key.
    pub properties: BTreeMap<PropertyKey, Value>,
}

impl Node {
    /// Returns true if the node has the label.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.as_ref() == label)
    }

    /// Returns a property value.
    #[must_use]
    pub fn get_property(&self, key: &str) -> Option<&Value> {
        self.properties.get(&PropertyKey::new(key))
    }
}
