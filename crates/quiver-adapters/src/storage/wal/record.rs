//! WAL record types.

use quiver_common::types::{EdgeId, EpochId, NodeId, PropertyKey, TxId, Value};
use quiver_core::graph::lpg::IndexKind;
use serde::{Deserialize, Serialize};

/// A redo record in the write-ahead log.
///
/// Mutations carry the id of the transaction that made them; recovery
/// applies a transaction's mutations only if its [`TxCommit`] is found.
/// Entity ids are logged so replay reproduces the original allocation.
///
/// [`TxCommit`]: WalRecord::TxCommit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecord {
    /// Create a node.
    CreateNode {
        /// Owning transaction.
        tx_id: TxId,
        /// Node id.
        id: NodeId,
        /// Labels.
        labels: Vec<String>,
        /// Initial properties.
        properties: Vec<(PropertyKey, Value)>,
    },

    /// Delete a node, with its edges if `detach`.
    DeleteNode {
        /// Owning transaction.
        tx_id: TxId,
        /// Node id.
        id: NodeId,
        /// Whether incident edges were deleted with it.
        detach: bool,
    },

    /// Create an edge.
    CreateEdge {
        /// Owning transaction.
        tx_id: TxId,
        /// Edge id.
        id: EdgeId,
        /// Source node.
        src: NodeId,
        /// Destination node.
        dst: NodeId,
        /// Edge type.
        edge_type: String,
        /// Initial properties.
        properties: Vec<(PropertyKey, Value)>,
    },

    /// Delete an edge.
    DeleteEdge {
        /// Owning transaction.
        tx_id: TxId,
        /// Edge id.
        id: EdgeId,
    },

    /// Set a node property; `Null` removes it.
    SetNodeProperty {
        /// Owning transaction.
        tx_id: TxId,
        /// Node id.
        id: NodeId,
        /// Property key.
        key: PropertyKey,
        /// New value.
        value: Value,
    },

    /// Set an edge property; `Null` removes it.
    SetEdgeProperty {
        /// Owning transaction.
        tx_id: TxId,
        /// Edge id.
        id: EdgeId,
        /// Property key.
        key: PropertyKey,
        /// New value.
        value: Value,
    },

    /// Add a label to a node.
    AddNodeLabel {
        /// Owning transaction.
        tx_id: TxId,
        /// Node id.
        id: NodeId,
        /// Label to add.
        label: String,
    },

    /// Remove a label from a node.
    RemoveNodeLabel {
        /// Owning transaction.
        tx_id: TxId,
        /// Node id.
        id: NodeId,
        /// Label to remove.
        label: String,
    },

    /// Create a property index.
    CreateIndex {
        /// Owning transaction.
        tx_id: TxId,
        /// Indexed key.
        key: PropertyKey,
        /// Index kind.
        kind: IndexKind,
    },

    /// Drop a property index.
    DropIndex {
        /// Owning transaction.
        tx_id: TxId,
        /// Indexed key.
        key: PropertyKey,
    },

    /// Transaction commit.
    TxCommit {
        /// Transaction ID.
        tx_id: TxId,
        /// Commit epoch.
        epoch: EpochId,
    },

    /// Transaction abort.
    TxAbort {
        /// Transaction ID.
        tx_id: TxId,
    },

    /// Checkpoint marker: everything up to `epoch` is in the base files.
    Checkpoint {
        /// Epoch captured by the checkpoint.
        epoch: EpochId,
    },
}

impl WalRecord {
    /// The transaction a record belongs to; `None` for checkpoint markers.
    #[must_use]
    pub fn tx_id(&self) -> Option<TxId> {
        match self {
            Self::CreateNode { tx_id, .. }
            | Self::DeleteNode { tx_id, .. }
            | Self::CreateEdge { tx_id, .. }
            | Self::DeleteEdge { tx_id, .. }
            | Self::SetNodeProperty { tx_id, .. }
            | Self::SetEdgeProperty { tx_id, .. }
            | Self::AddNodeLabel { tx_id, .. }
            | Self::RemoveNodeLabel { tx_id, .. }
            | Self::CreateIndex { tx_id, .. }
            | Self::DropIndex { tx_id, .. }
            | Self::TxCommit { tx_id, .. }
            | Self::TxAbort { tx_id } => Some(*tx_id),
            Self::Checkpoint { .. } => None,
        }
    }

    /// Returns true for records that change data, as opposed to
    /// transaction and checkpoint markers.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::TxCommit { .. } | Self::TxAbort { .. } | Self::Checkpoint { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(record: &WalRecord) -> WalRecord {
        let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard()).unwrap();
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .unwrap()
            .0
    }

    #[test]
    fn test_create_node_with_nested_values() {
        let record = WalRecord::CreateNode {
            tx_id: TxId::new(4),
            id: NodeId::new(1),
            labels: vec!["Person".to_string(), "Employee".to_string()],
            properties: vec![
                (PropertyKey::new("tags"), Value::list([Value::from("a"), Value::Int64(2)])),
                (PropertyKey::new("age"), Value::Int64(30)),
            ],
        };
        assert_eq!(roundtrip(&record), record);
    }

    #[test]
    fn test_tx_id_of_markers() {
        let commit = WalRecord::TxCommit {
            tx_id: TxId::new(9),
            epoch: EpochId::new(3),
        };
        assert_eq!(commit.tx_id(), Some(TxId::new(9)));
        assert!(!commit.is_mutation());
        assert_eq!(WalRecord::Checkpoint { epoch: EpochId::new(3) }.tx_id(), None);

        let delete = WalRecord::DeleteEdge {
            tx_id: TxId::new(9),
            id: EdgeId::new(1),
        };
        assert!(delete.is_mutation());
    }
}
