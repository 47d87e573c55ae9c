//! LPG graph store implementation.
//!
//! Every mutator takes the caller's [`Snapshot`] and [`WriteSet`]: it checks
//! preconditions against the snapshot, writes pending versions stamped with
//! the snapshot's transaction and records the touched keys. Nothing becomes
//! visible to other transactions until [`LpgStore::commit`] restamps the
//! pending versions with a commit epoch.

use std::collections::VecDeque;
use std::ops::{Bound, Range};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use quiver_common::memory::{BufferManager, MemoryGrant, MemoryRegion};
use quiver_common::mvcc::{Snapshot, VersionChain, WriteKey, WriteSet};
use quiver_common::types::{
    EdgeId, EdgeTypeId, EpochId, LabelId, NodeId, PropertyKey, TxId, Value, ValueKey,
};
use quiver_common::utils::error::{Error, Result};
use quiver_common::utils::hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::arena::SlotArena;
use super::edge::{Edge, EdgeRecord, EdgeSlot};
use super::image::{AdjacencyImage, EdgeImage, IndexKind, NodeImage, StoreImage};
use super::node::{Node, NodeRecord, NodeSlot};
use super::property::{EntityId, PropertyStorage};
use crate::graph::Direction;
use crate::index::adjacency::ChunkedAdjacency;
use crate::index::zone_map::CompareOp;
use crate::index::{BTreeIndex, HashIndex};
use crate::storage::BLOCK_SIZE;

/// Approximate fixed cost of a node record.
const NODE_BYTES: usize = 64;

/// Approximate fixed cost of an edge record and its two adjacency entries.
const EDGE_BYTES: usize = 64;

/// Candidates examined per refill of a lazy scan.
const SCAN_BATCH: usize = 256;

/// Configuration for the LPG store.
#[derive(Debug, Clone)]
pub struct LpgStoreConfig {
    /// Edges per adjacency chunk.
    pub chunk_capacity: usize,
}

impl Default for LpgStoreConfig {
    fn default() -> Self {
        Self { chunk_capacity: 64 }
    }
}

/// Interned names (labels or edge types).
#[derive(Debug, Default)]
struct NameTable {
    ids: FxHashMap<Arc<str>, u32>,
    names: Vec<Arc<str>>,
}

impl NameTable {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        let name: Arc<str> = Arc::from(name);
        self.names.push(Arc::clone(&name));
        self.ids.insert(name, id);
        id
    }

    fn get(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    fn name(&self, id: u32) -> Option<Arc<str>> {
        self.names.get(id as usize).cloned()
    }
}

/// A secondary index on one node property.
enum PropertyIndex {
    Hash(HashIndex<NodeId>),
    BTree(BTreeIndex<NodeId>),
}

impl PropertyIndex {
    fn new(kind: IndexKind) -> Self {
        match kind {
            IndexKind::Hash => Self::Hash(HashIndex::new()),
            IndexKind::BTree => Self::BTree(BTreeIndex::new()),
        }
    }

    fn kind(&self) -> IndexKind {
        match self {
            Self::Hash(_) => IndexKind::Hash,
            Self::BTree(_) => IndexKind::BTree,
        }
    }

    fn insert(&self, value: &Value, id: NodeId) {
        match self {
            Self::Hash(index) => index.insert(value, id),
            Self::BTree(index) => index.insert(value, id),
        }
    }

    fn get(&self, value: &Value) -> SmallVec<[NodeId; 2]> {
        match self {
            Self::Hash(index) => index.get(value),
            Self::BTree(index) => index.get(value),
        }
    }

    fn retain(&self, keep: impl FnMut(&Value, NodeId) -> bool) {
        match self {
            Self::Hash(index) => index.retain(keep),
            Self::BTree(index) => index.retain(keep),
        }
    }
}

/// What a scan iterates over: every slot, or an explicit id list.
#[derive(Debug, Clone)]
pub enum NodeCandidates {
    /// Slots `0..n`.
    Slots(u64),
    /// A sorted id list (label scans, index seeks).
    Ids(Arc<[NodeId]>),
}

impl NodeCandidates {
    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Slots(n) => *n as usize,
            Self::Ids(ids) => ids.len(),
        }
    }

    /// Returns true if there are no candidates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one garbage collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Property versions folded into base blocks.
    pub versions_folded: usize,
    /// Node slots reclaimed.
    pub nodes_reclaimed: usize,
    /// Edge slots reclaimed.
    pub edges_reclaimed: usize,
}

/// The main LPG graph store.
///
/// Nodes and edges live in slot arenas indexed by id; relationships are
/// id references kept in forward and backward [`ChunkedAdjacency`]
/// structures. Properties live in versioned columns.
pub struct LpgStore {
    config: LpgStoreConfig,
    nodes: SlotArena<NodeSlot>,
    edges: SlotArena<EdgeSlot>,
    node_properties: PropertyStorage<NodeId>,
    edge_properties: PropertyStorage<EdgeId>,
    labels: RwLock<NameTable>,
    edge_types: RwLock<NameTable>,
    forward_adj: ChunkedAdjacency,
    backward_adj: ChunkedAdjacency,
    /// Superset of the nodes carrying each label; scans re-check.
    label_index: RwLock<FxHashMap<LabelId, FxHashSet<NodeId>>>,
    property_indexes: RwLock<FxHashMap<PropertyKey, Arc<PropertyIndex>>>,
    memory: BufferManager,
    grant: Mutex<MemoryGrant>,
}

impl LpgStore {
    /// Creates a store with default configuration and no memory limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LpgStoreConfig::default(), BufferManager::unlimited())
    }

    /// Creates a store charging its memory to `memory`.
    #[must_use]
    pub fn with_config(config: LpgStoreConfig, memory: BufferManager) -> Self {
        Self {
            nodes: SlotArena::new(),
            edges: SlotArena::new(),
            node_properties: PropertyStorage::new(),
            edge_properties: PropertyStorage::new(),
            labels: RwLock::new(NameTable::default()),
            edge_types: RwLock::new(NameTable::default()),
            forward_adj: ChunkedAdjacency::with_chunk_capacity(config.chunk_capacity),
            backward_adj: ChunkedAdjacency::with_chunk_capacity(config.chunk_capacity),
            label_index: RwLock::new(FxHashMap::default()),
            property_indexes: RwLock::new(FxHashMap::default()),
            grant: Mutex::new(memory.empty_grant(MemoryRegion::GraphStorage)),
            memory,
            config,
        }
    }

    /// The memory manager this store charges.
    #[must_use]
    pub fn memory(&self) -> &BufferManager {
        &self.memory
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &LpgStoreConfig {
        &self.config
    }

    fn charge(&self, bytes: usize, context: &str) -> Result<()> {
        if self.grant.lock().try_grow(bytes) {
            Ok(())
        } else {
            Err(Error::ResourceExhausted {
                context: context.to_string(),
                requested: bytes,
                available: self.memory.available().unwrap_or(0),
            })
        }
    }

    fn release(&self, bytes: usize) {
        self.grant.lock().shrink(bytes);
    }

    fn properties_bytes(properties: &[(PropertyKey, Value)]) -> usize {
        properties
            .iter()
            .map(|(k, v)| k.as_str().len() + v.estimated_size())
            .sum()
    }

    // === Names ===

    /// Interns a label name.
    pub fn intern_label(&self, name: &str) -> LabelId {
        if let Some(id) = self.labels.read().get(name) {
            return LabelId(id);
        }
        LabelId(self.labels.write().intern(name))
    }

    /// Id of an existing label.
    #[must_use]
    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.labels.read().get(name).map(LabelId)
    }

    /// Name of a label id.
    #[must_use]
    pub fn label_name(&self, id: LabelId) -> Option<Arc<str>> {
        self.labels.read().name(id.0)
    }

    /// All label names, in id order.
    #[must_use]
    pub fn label_names(&self) -> Vec<Arc<str>> {
        self.labels.read().names.clone()
    }

    fn intern_edge_type(&self, name: &str) -> EdgeTypeId {
        if let Some(id) = self.edge_types.read().get(name) {
            return EdgeTypeId(id);
        }
        EdgeTypeId(self.edge_types.write().intern(name))
    }

    /// Id of an existing edge type.
    #[must_use]
    pub fn edge_type_id(&self, name: &str) -> Option<EdgeTypeId> {
        self.edge_types.read().get(name).map(EdgeTypeId)
    }

    /// Name of an edge type id.
    #[must_use]
    pub fn edge_type_name(&self, id: EdgeTypeId) -> Option<Arc<str>> {
        self.edge_types.read().name(id.0)
    }

    /// All edge type names, in id order.
    #[must_use]
    pub fn edge_type_names(&self) -> Vec<Arc<str>> {
        self.edge_types.read().names.clone()
    }

    // === Node Operations ===

    /// Creates a node with the given labels and properties.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if the memory limit is reached.
    pub fn create_node(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        labels: &[&str],
        properties: Vec<(PropertyKey, Value)>,
    ) -> Result<NodeId> {
        self.charge(NODE_BYTES + Self::properties_bytes(&properties), "create_node")?;
        Ok(self.insert_node(snapshot.tx_id, writes, None, labels, properties))
    }

    /// Creates a node under a given id (recovery replay).
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if the memory limit is reached.
    pub fn create_node_with_id(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: NodeId,
        labels: &[&str],
        properties: Vec<(PropertyKey, Value)>,
    ) -> Result<NodeId> {
        self.charge(NODE_BYTES + Self::properties_bytes(&properties), "create_node")?;
        Ok(self.insert_node(snapshot.tx_id, writes, Some(id), labels, properties))
    }

    /// Creates many nodes at once. Memory for the whole batch is reserved
    /// up front; if it is not available nothing is created.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if the batch does not fit the memory limit.
    pub fn create_nodes_batch(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        batch: Vec<(Vec<String>, Vec<(PropertyKey, Value)>)>,
    ) -> Result<Vec<NodeId>> {
        let bytes = batch
            .iter()
            .map(|(_, props)| NODE_BYTES + Self::properties_bytes(props))
            .sum();
        self.charge(bytes, "create_nodes_batch")?;
        Ok(batch
            .into_iter()
            .map(|(labels, props)| {
                let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                self.insert_node(snapshot.tx_id, writes, None, &labels, props)
            })
            .collect())
    }

    fn insert_node(
        &self,
        tx: TxId,
        writes: &mut WriteSet,
        id: Option<NodeId>,
        labels: &[&str],
        properties: Vec<(PropertyKey, Value)>,
    ) -> NodeId {
        let label_ids: SmallVec<[LabelId; 4]> =
            labels.iter().map(|l| self.intern_label(l)).collect();
        let record = NodeRecord::new(label_ids);
        let mut chain = VersionChain::new();
        chain.write(tx, Some(record.clone()));
        let slot = match id {
            Some(id) => {
                self.nodes.insert_at(id.as_u64(), NodeSlot { chain });
                id.as_u64()
            }
            None => self.nodes.allocate(NodeSlot { chain }),
        };
        let id = NodeId::new(slot);
        {
            let mut index = self.label_index.write();
            for label in &record.labels {
                index.entry(*label).or_default().insert(id);
            }
        }
        writes.write(WriteKey::Node(id));
        for (key, value) in properties {
            if !value.is_null() {
                self.write_node_property(tx, writes, id, key, Some(value));
            }
        }
        id
    }

    fn node_record(&self, id: NodeId, snapshot: &Snapshot) -> Option<NodeRecord> {
        self.nodes
            .with(id.as_u64(), |s| s.chain.read(snapshot).cloned())
            .flatten()
    }

    fn require_node(&self, id: NodeId, snapshot: &Snapshot) -> Result<NodeRecord> {
        self.node_record(id, snapshot).ok_or(Error::NodeNotFound(id))
    }

    /// Returns true if the node exists at `snapshot`.
    #[must_use]
    pub fn node_exists(&self, id: NodeId, snapshot: &Snapshot) -> bool {
        self.node_record(id, snapshot).is_some()
    }

    /// Returns the node as seen by `snapshot`.
    #[must_use]
    pub fn get_node(&self, id: NodeId, snapshot: &Snapshot) -> Option<Node> {
        let record = self.node_record(id, snapshot)?;
        let labels = {
            let names = self.labels.read();
            record.labels.iter().filter_map(|l| names.name(l.0)).collect()
        };
        Some(Node {
            id,
            labels,
            properties: self.node_properties.get_all(id, snapshot),
        })
    }

    /// Label ids of a node as seen by `snapshot`.
    #[must_use]
    pub fn node_label_ids(
        &self,
        id: NodeId,
        snapshot: &Snapshot,
    ) -> Option<SmallVec<[LabelId; 4]>> {
        self.node_record(id, snapshot).map(|r| r.labels)
    }

    /// One property of a node.
    #[must_use]
    pub fn get_node_property(
        &self,
        id: NodeId,
        key: &PropertyKey,
        snapshot: &Snapshot,
    ) -> Option<Value> {
        if !self.node_exists(id, snapshot) {
            return None;
        }
        self.node_properties.get(id, key, snapshot)
    }

    /// Reads one property of many nodes, one value per id (`Null` when
    /// absent). The column latch is taken once.
    pub fn node_property_batch(
        &self,
        ids: &[NodeId],
        key: &PropertyKey,
        snapshot: &Snapshot,
        out: &mut Vec<Value>,
    ) {
        match self.node_properties.column(key) {
            Some(col) => {
                let col = col.read();
                out.extend(
                    ids.iter()
                        .map(|id| col.get(id.slot(), snapshot).unwrap_or(Value::Null)),
                );
            }
            None => out.extend(std::iter::repeat_n(Value::Null, ids.len())),
        }
    }

    fn write_node_property(
        &self,
        tx: TxId,
        writes: &mut WriteSet,
        id: NodeId,
        key: PropertyKey,
        value: Option<Value>,
    ) {
        if let Some(v) = &value {
            if let Some(index) = self.property_indexes.read().get(&key) {
                index.insert(v, id);
            }
        }
        self.node_properties.write(id, &key, tx, value);
        writes.write(WriteKey::NodeProperty(id, key));
    }

    /// Sets a node property; a `Null` value removes it. Returns the
    /// previous value.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible.
    pub fn set_node_property(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: NodeId,
        key: PropertyKey,
        value: Value,
    ) -> Result<Option<Value>> {
        if value.is_null() {
            return self.remove_node_property(snapshot, writes, id, &key);
        }
        self.require_node(id, snapshot)?;
        self.charge(key.as_str().len() + value.estimated_size(), "set_node_property")?;
        let old = self.node_properties.get(id, &key, snapshot);
        writes.guard(WriteKey::Node(id));
        self.write_node_property(snapshot.tx_id, writes, id, key, Some(value));
        Ok(old)
    }

    /// Removes a node property. Returns the removed value.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible.
    pub fn remove_node_property(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: NodeId,
        key: &PropertyKey,
    ) -> Result<Option<Value>> {
        self.require_node(id, snapshot)?;
        let Some(old) = self.node_properties.get(id, key, snapshot) else {
            return Ok(None);
        };
        writes.guard(WriteKey::Node(id));
        self.write_node_property(snapshot.tx_id, writes, id, key.clone(), None);
        Ok(Some(old))
    }

    /// Adds a label. Returns false if the node already had it.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible.
    pub fn add_label(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: NodeId,
        label: &str,
    ) -> Result<bool> {
        let mut record = self.require_node(id, snapshot)?;
        let label = self.intern_label(label);
        if record.has_label(label) {
            return Ok(false);
        }
        record.labels.push(label);
        let record = NodeRecord::new(record.labels);
        self.nodes
            .with_mut(id.as_u64(), |s| s.chain.write(snapshot.tx_id, Some(record)));
        self.label_index.write().entry(label).or_default().insert(id);
        writes.write(WriteKey::Node(id));
        Ok(true)
    }

    /// Removes a label. Returns false if the node did not have it.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible.
    pub fn remove_label(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: NodeId,
        label: &str,
    ) -> Result<bool> {
        let mut record = self.require_node(id, snapshot)?;
        let Some(label) = self.label_id(label) else {
            return Ok(false);
        };
        if !record.has_label(label) {
            return Ok(false);
        }
        record.labels.retain(|l| *l != label);
        self.nodes
            .with_mut(id.as_u64(), |s| s.chain.write(snapshot.tx_id, Some(record)));
        writes.write(WriteKey::Node(id));
        Ok(true)
    }

    /// Deletes a node. With `detach` its incident edges are deleted in the
    /// same transaction; without it a node with edges is refused. Returns
    /// the number of edges deleted.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not visible and
    /// `EdgeConstraintViolation` if it has edges and `detach` is false.
    pub fn delete_node(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: NodeId,
        detach: bool,
    ) -> Result<usize> {
        self.require_node(id, snapshot)?;
        let mut incident: Vec<EdgeId> = self
            .neighbors_by_type(id, None, Direction::Both, snapshot)
            .into_iter()
            .map(|(e, _)| e)
            .collect();
        incident.sort_unstable();
        incident.dedup();
        if !incident.is_empty() && !detach {
            return Err(Error::EdgeConstraintViolation {
                node: id,
                edges: incident.len(),
            });
        }
        for edge in &incident {
            self.delete_edge(snapshot, writes, *edge)?;
        }
        for key in self.node_properties.get_all(id, snapshot).into_keys() {
            self.write_node_property(snapshot.tx_id, writes, id, key, None);
        }
        self.nodes
            .with_mut(id.as_u64(), |s| s.chain.write(snapshot.tx_id, None));
        writes.write(WriteKey::Node(id));
        writes.guard(WriteKey::Adjacency(id));
        Ok(incident.len())
    }

    // === Edge Operations ===

    /// Creates an edge between two visible nodes.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if either endpoint is not visible and
    /// `ResourceExhausted` if the memory limit is reached.
    pub fn create_edge(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        src: NodeId,
        dst: NodeId,
        edge_type: &str,
        properties: Vec<(PropertyKey, Value)>,
    ) -> Result<EdgeId> {
        self.insert_edge(snapshot, writes, None, src, dst, edge_type, properties)
    }

    /// Creates an edge under a given id (recovery replay).
    ///
    /// # Errors
    ///
    /// As [`create_edge`](Self::create_edge).
    #[allow(clippy::too_many_arguments)]
    pub fn create_edge_with_id(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: EdgeId,
        src: NodeId,
        dst: NodeId,
        edge_type: &str,
        properties: Vec<(PropertyKey, Value)>,
    ) -> Result<EdgeId> {
        self.insert_edge(snapshot, writes, Some(id), src, dst, edge_type, properties)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_edge(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: Option<EdgeId>,
        src: NodeId,
        dst: NodeId,
        edge_type: &str,
        properties: Vec<(PropertyKey, Value)>,
    ) -> Result<EdgeId> {
        self.require_node(src, snapshot)?;
        self.require_node(dst, snapshot)?;
        self.charge(EDGE_BYTES + Self::properties_bytes(&properties), "create_edge")?;

        let record = EdgeRecord {
            src,
            dst,
            edge_type: self.intern_edge_type(edge_type),
        };
        let mut chain = VersionChain::new();
        chain.write(snapshot.tx_id, Some(()));
        let slot = EdgeSlot { record, chain };
        let id = match id {
            Some(id) => {
                self.edges.insert_at(id.as_u64(), slot);
                id
            }
            None => EdgeId::new(self.edges.allocate(slot)),
        };
        self.forward_adj.add_edge(src, dst, record.edge_type, id);
        self.backward_adj.add_edge(dst, src, record.edge_type, id);

        writes.write(WriteKey::Edge(id));
        writes.guard(WriteKey::Node(src));
        writes.guard(WriteKey::Node(dst));
        writes.touch(WriteKey::Adjacency(src));
        writes.touch(WriteKey::Adjacency(dst));
        for (key, value) in properties {
            if !value.is_null() {
                self.edge_properties.write(id, &key, snapshot.tx_id, Some(value));
                writes.write(WriteKey::EdgeProperty(id, key));
            }
        }
        Ok(id)
    }

    fn edge_record(&self, id: EdgeId, snapshot: &Snapshot) -> Option<EdgeRecord> {
        self.edges
            .with(id.as_u64(), |s| s.chain.read(snapshot).map(|()| s.record))
            .flatten()
    }

    fn edge_visible(&self, id: EdgeId, snapshot: &Snapshot) -> bool {
        self.edge_record(id, snapshot).is_some()
    }

    /// Endpoints and type of an edge as seen by `snapshot`.
    #[must_use]
    pub fn get_edge_record(&self, id: EdgeId, snapshot: &Snapshot) -> Option<EdgeRecord> {
        self.edge_record(id, snapshot)
    }

    /// Returns the edge as seen by `snapshot`.
    #[must_use]
    pub fn get_edge(&self, id: EdgeId, snapshot: &Snapshot) -> Option<Edge> {
        let record = self.edge_record(id, snapshot)?;
        Some(Edge {
            id,
            src: record.src,
            dst: record.dst,
            edge_type: self.edge_type_name(record.edge_type)?,
            properties: self.edge_properties.get_all(id, snapshot),
        })
    }

    /// One property of an edge.
    #[must_use]
    pub fn get_edge_property(
        &self,
        id: EdgeId,
        key: &PropertyKey,
        snapshot: &Snapshot,
    ) -> Option<Value> {
        if !self.edge_visible(id, snapshot) {
            return None;
        }
        self.edge_properties.get(id, key, snapshot)
    }

    /// Deletes an edge.
    ///
    /// # Errors
    ///
    /// Returns `EdgeNotFound` if the edge is not visible.
    pub fn delete_edge(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: EdgeId,
    ) -> Result<()> {
        let record = self.edge_record(id, snapshot).ok_or(Error::EdgeNotFound(id))?;
        for key in self.edge_properties.get_all(id, snapshot).into_keys() {
            self.edge_properties.write(id, &key, snapshot.tx_id, None);
            writes.write(WriteKey::EdgeProperty(id, key));
        }
        self.edges
            .with_mut(id.as_u64(), |s| s.chain.write(snapshot.tx_id, None));
        writes.write(WriteKey::Edge(id));
        writes.touch(WriteKey::Adjacency(record.src));
        writes.touch(WriteKey::Adjacency(record.dst));
        Ok(())
    }

    /// Sets an edge property; a `Null` value removes it. Returns the
    /// previous value.
    ///
    /// # Errors
    ///
    /// Returns `EdgeNotFound` if the edge is not visible.
    pub fn set_edge_property(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: EdgeId,
        key: PropertyKey,
        value: Value,
    ) -> Result<Option<Value>> {
        if !self.edge_visible(id, snapshot) {
            return Err(Error::EdgeNotFound(id));
        }
        let old = self.edge_properties.get(id, &key, snapshot);
        if value.is_null() && old.is_none() {
            return Ok(None);
        }
        self.charge(key.as_str().len() + value.estimated_size(), "set_edge_property")?;
        let value = (!value.is_null()).then_some(value);
        self.edge_properties.write(id, &key, snapshot.tx_id, value);
        writes.guard(WriteKey::Edge(id));
        writes.write(WriteKey::EdgeProperty(id, key));
        Ok(old)
    }

    /// Removes an edge property. Returns the removed value.
    ///
    /// # Errors
    ///
    /// Returns `EdgeNotFound` if the edge is not visible.
    pub fn remove_edge_property(
        &self,
        snapshot: &Snapshot,
        writes: &mut WriteSet,
        id: EdgeId,
        key: &PropertyKey,
    ) -> Result<Option<Value>> {
        self.set_edge_property(snapshot, writes, id, key.clone(), Value::Null)
    }

    // === Traversal ===

    /// `(edge, neighbor)` pairs of `node`, optionally restricted to one
    /// edge type. An unknown type name yields nothing.
    #[must_use]
    pub fn neighbors(
        &self,
        node: NodeId,
        edge_type: Option<&str>,
        direction: Direction,
        snapshot: &Snapshot,
    ) -> Vec<(EdgeId, NodeId)> {
        let type_id = match edge_type {
            Some(name) => match self.edge_type_id(name) {
                Some(id) => Some(id),
                None => return Vec::new(),
            },
            None => None,
        };
        self.neighbors_by_type(node, type_id, direction, snapshot)
    }

    /// As [`neighbors`](Self::neighbors), with an interned edge type.
    #[must_use]
    pub fn neighbors_by_type(
        &self,
        node: NodeId,
        edge_type: Option<EdgeTypeId>,
        direction: Direction,
        snapshot: &Snapshot,
    ) -> Vec<(EdgeId, NodeId)> {
        let mut out = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            out.extend(
                self.forward_adj
                    .edges_from(node, edge_type)
                    .into_iter()
                    .filter(|(_, e)| self.edge_visible(*e, snapshot))
                    .map(|(n, e)| (e, n)),
            );
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            out.extend(
                self.backward_adj
                    .edges_from(node, edge_type)
                    .into_iter()
                    .filter(|(_, e)| self.edge_visible(*e, snapshot))
                    .map(|(n, e)| (e, n)),
            );
        }
        out
    }

    /// Number of adjacency entries of `node` regardless of visibility.
    /// Used for fan-out statistics.
    #[must_use]
    pub fn raw_degree(
        &self,
        node: NodeId,
        edge_type: Option<EdgeTypeId>,
        direction: Direction,
    ) -> usize {
        match direction {
            Direction::Outgoing => self.forward_adj.degree(node, edge_type),
            Direction::Incoming => self.backward_adj.degree(node, edge_type),
            Direction::Both => {
                self.forward_adj.degree(node, edge_type) + self.backward_adj.degree(node, edge_type)
            }
        }
    }

    // === Scans ===

    /// Candidates for a node scan, optionally restricted to a label.
    #[must_use]
    pub fn node_candidates(&self, label: Option<&str>) -> NodeCandidates {
        match label {
            None => NodeCandidates::Slots(self.nodes.high_water()),
            Some(name) => {
                let Some(label) = self.label_id(name) else {
                    return NodeCandidates::Ids(Arc::from(Vec::new()));
                };
                let mut ids: Vec<NodeId> = self
                    .label_index
                    .read()
                    .get(&label)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default();
                ids.sort_unstable();
                NodeCandidates::Ids(Arc::from(ids))
            }
        }
    }

    /// Appends the visible nodes among `candidates[range]` that carry
    /// `label` (if given) to `out`, in candidate order.
    pub fn collect_visible_nodes(
        &self,
        candidates: &NodeCandidates,
        range: Range<usize>,
        label: Option<LabelId>,
        snapshot: &Snapshot,
        out: &mut Vec<NodeId>,
    ) {
        let matches = |record: Option<&NodeRecord>| {
            record.is_some_and(|r| label.is_none_or(|l| r.has_label(l)))
        };
        match candidates {
            NodeCandidates::Slots(_) => {
                self.nodes
                    .for_each_in(range.start as u64, range.end as u64, |slot, s| {
                        if matches(s.chain.read(snapshot)) {
                            out.push(NodeId::new(slot));
                        }
                    });
            }
            NodeCandidates::Ids(ids) => {
                let end = range.end.min(ids.len());
                for &id in &ids[range.start.min(end)..end] {
                    let keep = self
                        .nodes
                        .with(id.as_u64(), |s| matches(s.chain.read(snapshot)))
                        .unwrap_or(false);
                    if keep {
                        out.push(id);
                    }
                }
            }
        }
    }

    /// Returns false only if no node in base block `block` can satisfy
    /// `key <op> value`.
    #[must_use]
    pub fn node_block_might_match(
        &self,
        key: &PropertyKey,
        block: usize,
        op: CompareOp,
        value: &Value,
    ) -> bool {
        self.node_properties
            .column(key)
            .is_none_or(|col| col.read().might_match(block, op, value))
    }

    /// Rows per base block, for callers mapping ids to blocks.
    #[must_use]
    pub const fn block_size() -> usize {
        BLOCK_SIZE
    }

    /// Lazily scans the visible nodes, optionally restricted to a label.
    /// The scan is finite; calling this again starts a fresh scan.
    #[must_use]
    pub fn scan_nodes(&self, label: Option<&str>, snapshot: &Snapshot) -> NodeScan<'_> {
        let label_id = label.and_then(|l| self.label_id(l));
        let candidates = if label.is_some() && label_id.is_none() {
            NodeCandidates::Ids(Arc::from(Vec::new()))
        } else {
            self.node_candidates(label)
        };
        NodeScan {
            store: self,
            snapshot: *snapshot,
            candidates,
            label: label_id,
            position: 0,
            buffer: VecDeque::new(),
        }
    }

    /// Lazily scans the visible edges, optionally restricted to a type.
    #[must_use]
    pub fn scan_edges(&self, edge_type: Option<&str>, snapshot: &Snapshot) -> EdgeScan<'_> {
        let type_filter = match edge_type {
            Some(name) => match self.edge_type_id(name) {
                Some(id) => Some(id),
                None => {
                    return EdgeScan {
                        store: self,
                        snapshot: *snapshot,
                        type_filter: None,
                        position: 0,
                        end: 0,
                        buffer: VecDeque::new(),
                    };
                }
            },
            None => None,
        };
        EdgeScan {
            store: self,
            snapshot: *snapshot,
            type_filter,
            position: 0,
            end: self.edges.high_water(),
            buffer: VecDeque::new(),
        }
    }

    /// Number of visible nodes, optionally with a label.
    #[must_use]
    pub fn node_count(&self, label: Option<&str>, snapshot: &Snapshot) -> usize {
        let label_id = label.and_then(|l| self.label_id(l));
        if label.is_some() && label_id.is_none() {
            return 0;
        }
        let candidates = self.node_candidates(label);
        let mut out = Vec::new();
        self.collect_visible_nodes(&candidates, 0..candidates.len(), label_id, snapshot, &mut out);
        out.len()
    }

    /// Number of visible edges.
    #[must_use]
    pub fn edge_count(&self, snapshot: &Snapshot) -> usize {
        let mut count = 0;
        self.edges.for_each_in(0, self.edges.high_water(), |_, s| {
            if s.chain.read(snapshot).is_some() {
                count += 1;
            }
        });
        count
    }

    /// Visible values of one node property across all visible nodes.
    #[must_use]
    pub fn node_property_values(&self, key: &PropertyKey, snapshot: &Snapshot) -> Vec<Value> {
        let candidates = self.node_candidates(None);
        let mut ids = Vec::new();
        self.collect_visible_nodes(&candidates, 0..candidates.len(), None, snapshot, &mut ids);
        let mut values = Vec::with_capacity(ids.len());
        self.node_property_batch(&ids, key, snapshot, &mut values);
        values
    }

    /// Keys of all node property columns.
    #[must_use]
    pub fn node_property_keys(&self) -> Vec<PropertyKey> {
        self.node_properties.keys()
    }

    // === Property indexes ===

    /// Creates a secondary index on a node property and backfills it.
    /// Returns false if an index on `key` already exists.
    pub fn create_property_index(&self, key: PropertyKey, kind: IndexKind) -> bool {
        let mut indexes = self.property_indexes.write();
        if indexes.contains_key(&key) {
            return false;
        }
        let index = PropertyIndex::new(kind);
        for (id, value) in self.node_properties.entries(&key) {
            index.insert(&value, id);
        }
        indexes.insert(key, Arc::new(index));
        true
    }

    /// Drops the index on `key`. Returns false if there was none.
    pub fn drop_property_index(&self, key: &PropertyKey) -> bool {
        self.property_indexes.write().remove(key).is_some()
    }

    /// Kind of the index on `key`, if any.
    #[must_use]
    pub fn property_index_kind(&self, key: &PropertyKey) -> Option<IndexKind> {
        self.property_indexes.read().get(key).map(|i| i.kind())
    }

    /// Indexed keys and their kinds.
    #[must_use]
    pub fn property_indexes(&self) -> Vec<(PropertyKey, IndexKind)> {
        let mut out: Vec<_> = self
            .property_indexes
            .read()
            .iter()
            .map(|(k, i)| (k.clone(), i.kind()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Visible nodes whose `key` equals `value`, via the index. Returns
    /// `None` if `key` is not indexed.
    #[must_use]
    pub fn index_lookup(
        &self,
        key: &PropertyKey,
        value: &Value,
        snapshot: &Snapshot,
    ) -> Option<Vec<NodeId>> {
        let index = self.property_indexes.read().get(key).cloned()?;
        let mut ids: Vec<NodeId> = index.get(value).into_vec();
        ids.sort_unstable();
        ids.dedup();
        ids.retain(|id| {
            self.get_node_property(*id, key, snapshot)
                .is_some_and(|current| current.compare(value) == Some(std::cmp::Ordering::Equal))
        });
        Some(ids)
    }

    /// Visible nodes whose `key` lies within the bounds, ordered by value.
    /// Returns `None` unless `key` has a B-tree index.
    #[must_use]
    pub fn index_range(
        &self,
        key: &PropertyKey,
        lower: Bound<&Value>,
        upper: Bound<&Value>,
        snapshot: &Snapshot,
    ) -> Option<Vec<NodeId>> {
        let index = self.property_indexes.read().get(key).cloned()?;
        let PropertyIndex::BTree(btree) = index.as_ref() else {
            return None;
        };
        let mut seen = FxHashSet::default();
        let ids = btree
            .range(lower, upper)
            .into_iter()
            .filter(|(entry, id)| {
                self.get_node_property(*id, key, snapshot)
                    .is_some_and(|current| ValueKey(current) == ValueKey(entry.clone()))
            })
            .filter_map(|(_, id)| seen.insert(id).then_some(id))
            .collect();
        Some(ids)
    }

    // === Transaction lifecycle ===

    /// Restamps every pending version of `tx` with `epoch`.
    pub fn commit(&self, tx: TxId, epoch: EpochId, writes: &WriteSet) {
        for key in writes.writes() {
            match key {
                WriteKey::Node(id) => {
                    self.nodes.with_mut(id.as_u64(), |s| s.chain.commit(tx, epoch));
                }
                WriteKey::Edge(id) => {
                    self.edges.with_mut(id.as_u64(), |s| s.chain.commit(tx, epoch));
                }
                WriteKey::NodeProperty(id, key) => self.node_properties.commit(*id, key, tx, epoch),
                WriteKey::EdgeProperty(id, key) => self.edge_properties.commit(*id, key, tx, epoch),
                WriteKey::Adjacency(_) => {}
            }
        }
    }

    /// Discards every pending version of `tx`. Records created by `tx` are
    /// freed at once.
    pub fn rollback(&self, tx: TxId, writes: &WriteSet) {
        for key in writes.writes() {
            match key {
                WriteKey::NodeProperty(id, key) => self.node_properties.rollback(*id, key, tx),
                WriteKey::EdgeProperty(id, key) => self.edge_properties.rollback(*id, key, tx),
                _ => {}
            }
        }
        for key in writes.writes() {
            if let WriteKey::Edge(id) = key {
                let emptied = self.edges.with_mut(id.as_u64(), |s| {
                    s.chain.rollback(tx);
                    s.chain.is_empty().then_some(s.record)
                });
                if let Some(Some(record)) = emptied {
                    self.forward_adj.remove_edge(record.src, record.edge_type, *id);
                    self.backward_adj.remove_edge(record.dst, record.edge_type, *id);
                    self.edge_properties.purge(*id);
                    self.edges.free(id.as_u64());
                    self.release(EDGE_BYTES);
                }
            }
        }
        for key in writes.writes() {
            if let WriteKey::Node(id) = key {
                let emptied = self
                    .nodes
                    .with_mut(id.as_u64(), |s| {
                        s.chain.rollback(tx);
                        s.chain.is_empty()
                    })
                    .unwrap_or(false);
                if emptied {
                    self.node_properties.purge(*id);
                    self.nodes.free(id.as_u64());
                    self.release(NODE_BYTES);
                }
            }
        }
    }

    /// Prunes versions older than `horizon`, folds settled property values
    /// into compressed blocks and reclaims dead node and edge slots.
    pub fn gc(&self, horizon: EpochId) -> GcStats {
        self.node_properties.gc(horizon);
        self.edge_properties.gc(horizon);
        let versions_folded =
            self.node_properties.consolidate(horizon) + self.edge_properties.consolidate(horizon);

        let mut dead_edges = Vec::new();
        self.edges.for_each_mut(|slot, s| {
            s.chain.gc(horizon);
            if s.chain.is_dead(horizon) {
                dead_edges.push((EdgeId::new(slot), s.record));
            }
        });
        for (id, record) in &dead_edges {
            self.forward_adj.remove_edge(record.src, record.edge_type, *id);
            self.backward_adj.remove_edge(record.dst, record.edge_type, *id);
            self.edge_properties.purge(*id);
            self.edges.free(id.as_u64());
        }

        let mut dead_nodes = Vec::new();
        self.nodes.for_each_mut(|slot, s| {
            s.chain.gc(horizon);
            if s.chain.is_dead(horizon) {
                dead_nodes.push(NodeId::new(slot));
            }
        });
        for id in &dead_nodes {
            self.node_properties.purge(*id);
            self.forward_adj.remove_node(*id);
            self.backward_adj.remove_node(*id);
            self.nodes.free(id.as_u64());
        }
        self.release(dead_edges.len() * EDGE_BYTES + dead_nodes.len() * NODE_BYTES);

        {
            let mut index = self.label_index.write();
            for (label, ids) in index.iter_mut() {
                ids.retain(|id| {
                    self.nodes
                        .with(id.as_u64(), |s| {
                            s.chain
                                .iter()
                                .any(|v| v.value.as_ref().is_some_and(|r| r.has_label(*label)))
                        })
                        .unwrap_or(false)
                });
            }
        }
        let indexes: Vec<(PropertyKey, Arc<PropertyIndex>)> = self
            .property_indexes
            .read()
            .iter()
            .map(|(k, i)| (k.clone(), Arc::clone(i)))
            .collect();
        for (key, index) in indexes {
            index.retain(|value, id| {
                let entry = ValueKey(value.clone());
                self.node_properties
                    .retained_values(id, &key)
                    .into_iter()
                    .any(|v| ValueKey(v) == entry)
            });
        }
        self.compact_adjacency();

        let stats = GcStats {
            versions_folded,
            nodes_reclaimed: dead_nodes.len(),
            edges_reclaimed: dead_edges.len(),
        };
        tracing::debug!(
            horizon = %horizon,
            folded = stats.versions_folded,
            nodes = stats.nodes_reclaimed,
            edges = stats.edges_reclaimed,
            "store gc"
        );
        stats
    }

    /// Compacts adjacency delta buffers and purges their tombstones.
    pub fn compact_adjacency(&self) {
        self.forward_adj.compact();
        self.backward_adj.compact();
    }

    // === Checkpoint images ===

    /// Builds an image of the state visible at `snapshot`.
    #[must_use]
    pub fn image(&self, snapshot: &Snapshot) -> StoreImage {
        let mut nodes = NodeImage {
            label_names: self.label_names().iter().map(ToString::to_string).collect(),
            high_water: self.nodes.high_water(),
            indexes: self.property_indexes(),
            ..NodeImage::default()
        };
        self.nodes.for_each_in(0, nodes.high_water, |slot, s| {
            if let Some(record) = s.chain.read(snapshot) {
                nodes.ids.push(slot);
                nodes.labels.push(record.labels.iter().map(|l| l.0).collect());
            }
        });
        nodes.columns = self
            .node_properties
            .snapshot_columns(nodes.high_water as usize, snapshot);

        let mut edges = EdgeImage {
            type_names: self.edge_type_names().iter().map(ToString::to_string).collect(),
            high_water: self.edges.high_water(),
            ..EdgeImage::default()
        };
        let mut lists: FxHashMap<(u64, u32), Vec<(u64, u64)>> = FxHashMap::default();
        self.edges.for_each_in(0, edges.high_water, |slot, s| {
            if s.chain.read(snapshot).is_some() {
                let r = s.record;
                edges.ids.push(slot);
                edges.src.push(r.src.as_u64());
                edges.dst.push(r.dst.as_u64());
                edges.types.push(r.edge_type.0);
                lists
                    .entry((r.src.as_u64(), r.edge_type.0))
                    .or_default()
                    .push((r.dst.as_u64(), slot));
            }
        });
        edges.columns = self
            .edge_properties
            .snapshot_columns(edges.high_water as usize, snapshot);

        let mut lists: Vec<(u64, u32, Vec<(u64, u64)>)> =
            lists.into_iter().map(|((n, t), l)| (n, t, l)).collect();
        lists.sort_by_key(|(n, t, _)| (*n, *t));

        StoreImage {
            nodes,
            edges,
            adjacency: AdjacencyImage { lists },
        }
    }

    /// Loads an image into an empty store; every record is committed at
    /// `epoch`.
    ///
    /// # Errors
    ///
    /// Returns `StorageCorruption` if the image is internally inconsistent.
    pub fn load_image(&self, image: StoreImage, epoch: EpochId) -> Result<()> {
        let corrupt = |what: &str| {
            Error::Storage(quiver_common::utils::error::StorageError::Corruption(format!(
                "checkpoint image: {what}"
            )))
        };
        let StoreImage {
            nodes,
            edges,
            adjacency,
        } = image;
        if nodes.ids.len() != nodes.labels.len() {
            return Err(corrupt("node id and label arrays differ in length"));
        }
        if edges.ids.len() != edges.src.len()
            || edges.ids.len() != edges.dst.len()
            || edges.ids.len() != edges.types.len()
        {
            return Err(corrupt("edge arrays differ in length"));
        }
        {
            let mut labels = self.labels.write();
            for name in &nodes.label_names {
                labels.intern(name);
            }
        }
        {
            let mut types = self.edge_types.write();
            for name in &edges.type_names {
                types.intern(name);
            }
        }

        let mut bytes = 0;
        {
            let mut label_index = self.label_index.write();
            for (&slot, labels) in nodes.ids.iter().zip(&nodes.labels) {
                if labels.iter().any(|l| *l as usize >= nodes.label_names.len()) {
                    return Err(corrupt("node refers to an unknown label"));
                }
                let labels: SmallVec<[LabelId; 4]> = labels.iter().map(|l| LabelId(*l)).collect();
                for label in &labels {
                    label_index.entry(*label).or_default().insert(NodeId::new(slot));
                }
                self.nodes.insert_at(
                    slot,
                    NodeSlot {
                        chain: VersionChain::committed(epoch, NodeRecord::new(labels)),
                    },
                );
                bytes += NODE_BYTES;
            }
        }
        self.nodes.ensure_high_water(nodes.high_water);
        self.nodes.rebuild_free_list();
        for (key, blocks) in nodes.columns {
            bytes += blocks.iter().map(crate::storage::ColumnBlock::size_bytes).sum::<usize>();
            self.node_properties.load_column(key, blocks);
        }

        for i in 0..edges.ids.len() {
            if edges.types[i] as usize >= edges.type_names.len() {
                return Err(corrupt("edge refers to an unknown type"));
            }
            let record = EdgeRecord {
                src: NodeId::new(edges.src[i]),
                dst: NodeId::new(edges.dst[i]),
                edge_type: EdgeTypeId(edges.types[i]),
            };
            self.edges.insert_at(
                edges.ids[i],
                EdgeSlot {
                    record,
                    chain: VersionChain::committed(epoch, ()),
                },
            );
            self.backward_adj
                .add_edge(record.dst, record.src, record.edge_type, EdgeId::new(edges.ids[i]));
            bytes += EDGE_BYTES;
        }
        self.edges.ensure_high_water(edges.high_water);
        self.edges.rebuild_free_list();
        for (key, blocks) in edges.columns {
            bytes += blocks.iter().map(crate::storage::ColumnBlock::size_bytes).sum::<usize>();
            self.edge_properties.load_column(key, blocks);
        }
        for (node, edge_type, entries) in adjacency.lists {
            for (neighbor, edge) in entries {
                self.forward_adj
                    .add_edge(
                        NodeId::new(node),
                        NodeId::new(neighbor),
                        EdgeTypeId(edge_type),
                        EdgeId::new(edge),
                    );
            }
        }
        self.compact_adjacency();

        for (key, kind) in nodes.indexes {
            self.create_property_index(key, kind);
        }
        self.charge(bytes, "load checkpoint")
    }
}

impl Default for LpgStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A lazy, restartable node scan.
pub struct NodeScan<'a> {
    store: &'a LpgStore,
    snapshot: Snapshot,
    candidates: NodeCandidates,
    label: Option<LabelId>,
    position: usize,
    buffer: VecDeque<NodeId>,
}

impl NodeScan<'_> {
    /// Rewinds to the first candidate.
    pub fn restart(&mut self) {
        self.position = 0;
        self.buffer.clear();
    }
}

impl Iterator for NodeScan<'_> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                if let Some(node) = self.store.get_node(id, &self.snapshot) {
                    return Some(node);
                }
                continue;
            }
            if self.position >= self.candidates.len() {
                return None;
            }
            let end = (self.position + SCAN_BATCH).min(self.candidates.len());
            let mut batch = Vec::new();
            self.store.collect_visible_nodes(
                &self.candidates,
                self.position..end,
                self.label,
                &self.snapshot,
                &mut batch,
            );
            self.buffer.extend(batch);
            self.position = end;
        }
    }
}

/// A lazy edge scan.
pub struct EdgeScan<'a> {
    store: &'a LpgStore,
    snapshot: Snapshot,
    type_filter: Option<EdgeTypeId>,
    position: u64,
    end: u64,
    buffer: VecDeque<EdgeId>,
}

impl Iterator for EdgeScan<'_> {
    type Item = Edge;

    fn next(&mut self) -> Option<Edge> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                if let Some(edge) = self.store.get_edge(id, &self.snapshot) {
                    return Some(edge);
                }
                continue;
            }
            if self.position >= self.end {
                return None;
            }
            let end = (self.position + SCAN_BATCH as u64).min(self.end);
            let (snapshot, type_filter) = (self.snapshot, self.type_filter);
            let buffer = &mut self.buffer;
            self.store.edges.for_each_in(self.position, end, |slot, s| {
                if type_filter.is_none_or(|t| t == s.record.edge_type)
                    && s.chain.read(&snapshot).is_some()
                {
                    buffer.push_back(EdgeId::new(slot));
                }
            });
            self.position = end;
        }
    }
}
