//! ValueVector: one column of a [`DataChunk`](super::DataChunk).
//!
//! Columns of node or edge references are kept as plain id arrays so
//! expansion and property lookups never box ids into [`Value`]s. Any other
//! column holds values.

use std::cmp::Ordering;

use quiver_common::types::{EdgeId, LogicalType, NodeId, Value, ValueKey};
use serde::{Deserialize, Serialize};

/// A single cell of a row: an entity reference or a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    /// A node reference.
    Node(NodeId),
    /// An edge reference.
    Edge(EdgeId),
    /// A property or computed value.
    Value(Value),
}

impl Cell {
    /// The cell as a value. References become their integer ids.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Node(id) => Value::Int64(id.as_u64() as i64),
            Self::Edge(id) => Value::Int64(id.as_u64() as i64),
            Self::Value(v) => v.clone(),
        }
    }

    /// Converts the cell into a value. References become their integer ids.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(v) => v,
            other => other.to_value(),
        }
    }

    /// The node reference, if this is one.
    #[must_use]
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns true for a null value.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    /// A total order across all cells: nodes, then edges, then values.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Node(a), Self::Node(b)) => a.cmp(b),
            (Self::Edge(a), Self::Edge(b)) => a.cmp(b),
            (Self::Value(a), Self::Value(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Node(_) => 0,
            Self::Edge(_) => 1,
            Self::Value(_) => 2,
        }
    }

    /// A hashable key with query equality: integral floats equal the
    /// matching integer.
    #[must_use]
    pub fn key(&self) -> CellKey {
        match self {
            Self::Node(id) => CellKey::Node(*id),
            Self::Edge(id) => CellKey::Edge(*id),
            Self::Value(v) => CellKey::Value(ValueKey(v.clone())),
        }
    }

    /// Rough in-memory footprint in bytes.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        match self {
            Self::Value(v) => v.estimated_size(),
            _ => std::mem::size_of::<Self>(),
        }
    }
}

/// Hash and equality key of a [`Cell`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellKey {
    /// A node reference.
    Node(NodeId),
    /// An edge reference.
    Edge(EdgeId),
    /// A value.
    Value(ValueKey),
}

/// Physical storage of a vector.
#[derive(Debug, Clone, PartialEq)]
enum VectorData {
    Nodes(Vec<NodeId>),
    Edges(Vec<EdgeId>),
    Values(Vec<Value>),
}

/// A typed column of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueVector {
    data_type: LogicalType,
    data: VectorData,
}

impl ValueVector {
    /// Creates an empty vector of `data_type`.
    #[must_use]
    pub fn new(data_type: LogicalType) -> Self {
        Self::with_capacity(data_type, 0)
    }

    /// Creates an empty vector with room for `capacity` cells.
    #[must_use]
    pub fn with_capacity(data_type: LogicalType, capacity: usize) -> Self {
        let data = match data_type {
            LogicalType::Node => VectorData::Nodes(Vec::with_capacity(capacity)),
            LogicalType::Edge => VectorData::Edges(Vec::with_capacity(capacity)),
            _ => VectorData::Values(Vec::with_capacity(capacity)),
        };
        Self { data_type, data }
    }

    /// A node column.
    #[must_use]
    pub fn from_nodes(ids: Vec<NodeId>) -> Self {
        Self {
            data_type: LogicalType::Node,
            data: VectorData::Nodes(ids),
        }
    }

    /// An edge column.
    #[must_use]
    pub fn from_edges(ids: Vec<EdgeId>) -> Self {
        Self {
            data_type: LogicalType::Edge,
            data: VectorData::Edges(ids),
        }
    }

    /// A value column.
    #[must_use]
    pub fn from_values(data_type: LogicalType, values: Vec<Value>) -> Self {
        let data_type = if data_type.is_entity() {
            LogicalType::Any
        } else {
            data_type
        };
        Self {
            data_type,
            data: VectorData::Values(values),
        }
    }

    /// The declared type of the column.
    #[must_use]
    pub fn data_type(&self) -> LogicalType {
        self.data_type
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.data {
            VectorData::Nodes(v) => v.len(),
            VectorData::Edges(v) => v.len(),
            VectorData::Values(v) => v.len(),
        }
    }

    /// Returns true if the vector has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The node ids, if this is a node column.
    #[must_use]
    pub fn node_ids(&self) -> Option<&[NodeId]> {
        match &self.data {
            VectorData::Nodes(v) => Some(v),
            _ => None,
        }
    }

    /// The values, if this is a value column.
    #[must_use]
    pub fn values(&self) -> Option<&[Value]> {
        match &self.data {
            VectorData::Values(v) => Some(v),
            _ => None,
        }
    }

    /// The node id at `index`.
    #[must_use]
    pub fn get_node_id(&self, index: usize) -> Option<NodeId> {
        match &self.data {
            VectorData::Nodes(v) => v.get(index).copied(),
            _ => None,
        }
    }

    /// The edge id at `index`.
    #[must_use]
    pub fn get_edge_id(&self, index: usize) -> Option<EdgeId> {
        match &self.data {
            VectorData::Edges(v) => v.get(index).copied(),
            _ => None,
        }
    }

    /// The cell at `index`.
    #[must_use]
    pub fn get_cell(&self, index: usize) -> Option<Cell> {
        match &self.data {
            VectorData::Nodes(v) => v.get(index).map(|id| Cell::Node(*id)),
            VectorData::Edges(v) => v.get(index).map(|id| Cell::Edge(*id)),
            VectorData::Values(v) => v.get(index).map(|x| Cell::Value(x.clone())),
        }
    }

    /// The cell at `index` as a value.
    #[must_use]
    pub fn get_value(&self, index: usize) -> Option<Value> {
        match &self.data {
            VectorData::Values(v) => v.get(index).cloned(),
            _ => self.get_cell(index).map(|c| c.to_value()),
        }
    }

    /// Appends a node id.
    pub fn push_node_id(&mut self, id: NodeId) {
        self.push_cell(Cell::Node(id));
    }

    /// Appends an edge id.
    pub fn push_edge_id(&mut self, id: EdgeId) {
        self.push_cell(Cell::Edge(id));
    }

    /// Appends a value.
    pub fn push_value(&mut self, value: Value) {
        self.push_cell(Cell::Value(value));
    }

    /// Appends a cell. A cell that does not fit the column's physical
    /// layout turns the column into a value column.
    pub fn push_cell(&mut self, cell: Cell) {
        let fits = matches!(
            (&self.data, &cell),
            (VectorData::Nodes(_), Cell::Node(_))
                | (VectorData::Edges(_), Cell::Edge(_))
                | (VectorData::Values(_), _)
        );
        if !fits {
            self.degrade();
        }
        match (&mut self.data, cell) {
            (VectorData::Nodes(v), Cell::Node(id)) => v.push(id),
            (VectorData::Edges(v), Cell::Edge(id)) => v.push(id),
            (VectorData::Values(v), cell) => v.push(cell.into_value()),
            _ => {}
        }
    }

    fn degrade(&mut self) {
        let values = (0..self.len())
            .filter_map(|i| self.get_value(i))
            .collect();
        self.data = VectorData::Values(values);
        self.data_type = LogicalType::Any;
    }

    /// Gathers the cells at `indices` into a new vector.
    #[must_use]
    pub fn take(&self, indices: impl Iterator<Item = usize>) -> Self {
        let data = match &self.data {
            VectorData::Nodes(v) => VectorData::Nodes(indices.map(|i| v[i]).collect()),
            VectorData::Edges(v) => VectorData::Edges(indices.map(|i| v[i]).collect()),
            VectorData::Values(v) => VectorData::Values(indices.map(|i| v[i].clone()).collect()),
        };
        Self {
            data_type: self.data_type,
            data,
        }
    }

    /// Appends every cell of `other`.
    pub fn extend_from(&mut self, other: &Self) {
        match (&mut self.data, &other.data) {
            (VectorData::Nodes(a), VectorData::Nodes(b)) => a.extend_from_slice(b),
            (VectorData::Edges(a), VectorData::Edges(b)) => a.extend_from_slice(b),
            (VectorData::Values(a), VectorData::Values(b)) => a.extend_from_slice(b),
            _ => {
                for i in 0..other.len() {
                    if let Some(cell) = other.get_cell(i) {
                        self.push_cell(cell);
                    }
                }
            }
        }
    }

    /// Removes every cell.
    pub fn clear(&mut self) {
        match &mut self.data {
            VectorData::Nodes(v) => v.clear(),
            VectorData::Edges(v) => v.clear(),
            VectorData::Values(v) => v.clear(),
        }
    }

    /// Rough in-memory footprint in bytes.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        match &self.data {
            VectorData::Nodes(v) => v.len() * 8,
            VectorData::Edges(v) => v.len() * 8,
            VectorData::Values(v) => v.iter().map(Value::estimated_size).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_column_stays_compact() {
        let mut v = ValueVector::new(LogicalType::Node);
        v.push_node_id(NodeId::new(3));
        v.push_node_id(NodeId::new(5));
        assert_eq!(v.node_ids(), Some(&[NodeId::new(3), NodeId::new(5)][..]));
        assert_eq!(v.get_value(1), Some(Value::Int64(5)));
    }

    #[test]
    fn test_mismatched_cell_degrades_to_values() {
        let mut v = ValueVector::new(LogicalType::Node);
        v.push_node_id(NodeId::new(1));
        v.push_value(Value::Null);
        assert_eq!(v.data_type(), LogicalType::Any);
        assert_eq!(v.values(), Some(&[Value::Int64(1), Value::Null][..]));
    }

    #[test]
    fn test_take() {
        let v = ValueVector::from_values(
            LogicalType::Int64,
            vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)],
        );
        let t = v.take([2, 0].into_iter());
        assert_eq!(t.values(), Some(&[Value::Int64(3), Value::Int64(1)][..]));
    }

    #[test]
    fn test_keys_equate_integral_floats() {
        assert_eq!(
            Cell::Value(Value::Float64(30.0)).key(),
            Cell::Value(Value::Int64(30)).key()
        );
        assert_ne!(
            Cell::Value(Value::Float64(30.5)).key(),
            Cell::Value(Value::Int64(30)).key()
        );
    }
}
