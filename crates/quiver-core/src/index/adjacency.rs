//! Chunked adjacency lists with delta buffers.
//!
//! Each node keeps one list per edge type, so a typed expansion reads only
//! the edges of that type. A list is a run of fixed-capacity chunks plus a
//! small delta buffer for recent inserts; removals are tombstoned and
//! purged on compaction.
//!
//! Entries are added when an edge is created, before its transaction
//! commits. The index is therefore a superset of the visible edges and
//! callers filter entries through the edge's version chain.

use quiver_common::types::{EdgeId, EdgeTypeId, NodeId};
use quiver_common::utils::hash::{FxHashMap, FxHashSet};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default chunk capacity (number of edges per chunk).
const DEFAULT_CHUNK_CAPACITY: usize = 64;

/// Delta buffer length that triggers compaction of a list.
const DELTA_COMPACTION_THRESHOLD: usize = 256;

/// Number of independently locked shards.
const SHARDS: usize = 16;

/// A chunk of adjacency entries.
#[derive(Debug, Clone)]
struct AdjacencyChunk {
    neighbors: Vec<NodeId>,
    edge_ids: Vec<EdgeId>,
    capacity: usize,
}

impl AdjacencyChunk {
    fn new(capacity: usize) -> Self {
        Self {
            neighbors: Vec::with_capacity(capacity),
            edge_ids: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn is_full(&self) -> bool {
        self.neighbors.len() >= self.capacity
    }

    fn push(&mut self, neighbor: NodeId, edge_id: EdgeId) -> bool {
        if self.is_full() {
            return false;
        }
        self.neighbors.push(neighbor);
        self.edge_ids.push(edge_id);
        true
    }

    fn iter(&self) -> impl Iterator<Item = (NodeId, EdgeId)> + '_ {
        self.neighbors.iter().copied().zip(self.edge_ids.iter().copied())
    }
}

/// Adjacency entries of one node for one edge type.
#[derive(Debug, Default)]
struct AdjacencyList {
    chunks: Vec<AdjacencyChunk>,
    delta_inserts: SmallVec<[(NodeId, EdgeId); 8]>,
    deleted: FxHashSet<EdgeId>,
}

impl AdjacencyList {
    fn add_edge(&mut self, neighbor: NodeId, edge_id: EdgeId) {
        // A re-added edge (rollback then recovery replay) is live again
        self.deleted.remove(&edge_id);
        if let Some(last) = self.chunks.last_mut() {
            if last.push(neighbor, edge_id) {
                return;
            }
        }
        self.delta_inserts.push((neighbor, edge_id));
    }

    fn compact(&mut self, chunk_capacity: usize) {
        if self.delta_inserts.is_empty() && self.deleted.is_empty() {
            return;
        }
        let deleted = std::mem::take(&mut self.deleted);
        let live: Vec<(NodeId, EdgeId)> = self
            .chunks
            .drain(..)
            .flat_map(|c| c.iter().collect::<Vec<_>>())
            .chain(self.delta_inserts.drain(..))
            .filter(|(_, e)| !deleted.contains(e))
            .collect();

        let mut current = AdjacencyChunk::new(chunk_capacity);
        for (neighbor, edge_id) in live {
            if !current.push(neighbor, edge_id) {
                self.chunks.push(std::mem::replace(
                    &mut current,
                    AdjacencyChunk::new(chunk_capacity),
                ));
                current.push(neighbor, edge_id);
            }
        }
        if !current.neighbors.is_empty() {
            self.chunks.push(current);
        }
    }

    fn iter(&self) -> impl Iterator<Item = (NodeId, EdgeId)> + '_ {
        let deleted = &self.deleted;
        self.chunks
            .iter()
            .flat_map(AdjacencyChunk::iter)
            .chain(self.delta_inserts.iter().copied())
            .filter(move |(_, edge_id)| !deleted.contains(edge_id))
    }

    fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// All lists of one node, keyed by edge type.
type TypedLists = SmallVec<[(EdgeTypeId, AdjacencyList); 2]>;

/// Chunked adjacency lists for one direction.
///
/// The store keeps a forward instance (keyed by source) and a backward
/// instance (keyed by destination).
pub struct ChunkedAdjacency {
    shards: Box<[RwLock<FxHashMap<NodeId, TypedLists>>]>,
    chunk_capacity: usize,
    edge_count: AtomicUsize,
    deleted_count: AtomicUsize,
}

impl ChunkedAdjacency {
    /// Creates a new chunked adjacency structure.
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    /// Creates a new chunked adjacency with custom chunk capacity.
    #[must_use]
    pub fn with_chunk_capacity(capacity: usize) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(FxHashMap::default())).collect(),
            chunk_capacity: capacity.max(1),
            edge_count: AtomicUsize::new(0),
            deleted_count: AtomicUsize::new(0),
        }
    }

    fn shard(&self, node: NodeId) -> &RwLock<FxHashMap<NodeId, TypedLists>> {
        &self.shards[node.index() % SHARDS]
    }

    /// Adds an entry `node -[edge_type]- neighbor`.
    pub fn add_edge(&self, node: NodeId, neighbor: NodeId, edge_type: EdgeTypeId, edge_id: EdgeId) {
        let mut shard = self.shard(node).write();
        let lists = shard.entry(node).or_default();
        let list = match lists.iter().position(|(t, _)| *t == edge_type) {
            Some(pos) => &mut lists[pos].1,
            None => {
                lists.push((edge_type, AdjacencyList::default()));
                let last = lists.len() - 1;
                &mut lists[last].1
            }
        };
        list.add_edge(neighbor, edge_id);
        if list.delta_inserts.len() >= DELTA_COMPACTION_THRESHOLD {
            list.compact(self.chunk_capacity);
        }
        self.edge_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Tombstones an entry. Used when an edge creation rolls back or a
    /// dead edge is reclaimed.
    pub fn remove_edge(&self, node: NodeId, edge_type: EdgeTypeId, edge_id: EdgeId) {
        let mut shard = self.shard(node).write();
        let Some(lists) = shard.get_mut(&node) else {
            return;
        };
        if let Some((_, list)) = lists.iter_mut().find(|(t, _)| *t == edge_type) {
            if list.deleted.insert(edge_id) {
                self.deleted_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Returns `(neighbor, edge)` entries of `node`, restricted to one edge
    /// type if given.
    #[must_use]
    pub fn edges_from(&self, node: NodeId, edge_type: Option<EdgeTypeId>) -> Vec<(NodeId, EdgeId)> {
        let shard = self.shard(node).read();
        let Some(lists) = shard.get(&node) else {
            return Vec::new();
        };
        lists
            .iter()
            .filter(|(t, _)| edge_type.is_none_or(|want| want == *t))
            .flat_map(|(_, list)| list.iter())
            .collect()
    }

    /// Number of entries of `node`, a superset of its visible degree.
    #[must_use]
    pub fn degree(&self, node: NodeId, edge_type: Option<EdgeTypeId>) -> usize {
        let shard = self.shard(node).read();
        shard.get(&node).map_or(0, |lists| {
            lists
                .iter()
                .filter(|(t, _)| edge_type.is_none_or(|want| want == *t))
                .map(|(_, list)| list.iter().count())
                .sum()
        })
    }

    /// Compacts every list and purges tombstones.
    pub fn compact(&self) {
        for shard in &*self.shards {
            let mut shard = shard.write();
            for lists in shard.values_mut() {
                for (_, list) in lists.iter_mut() {
                    list.compact(self.chunk_capacity);
                }
                lists.retain(|(_, list)| !list.is_empty());
            }
            shard.retain(|_, lists| !lists.is_empty());
        }
        let purged = self.deleted_count.swap(0, Ordering::Relaxed);
        let _ = self
            .edge_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some(c.saturating_sub(purged)));
    }

    /// Drops every entry of `node` (its lists are empty once all of its
    /// edges are reclaimed).
    pub fn remove_node(&self, node: NodeId) {
        self.shard(node).write().remove(&node);
    }

    /// Returns the total number of entries (including tombstoned).
    #[must_use]
    pub fn total_edge_count(&self) -> usize {
        self.edge_count.load(Ordering::Relaxed)
    }

    /// Returns the number of entries not tombstoned.
    #[must_use]
    pub fn active_edge_count(&self) -> usize {
        self.edge_count
            .load(Ordering::Relaxed)
            .saturating_sub(self.deleted_count.load(Ordering::Relaxed))
    }

    /// Returns the number of nodes with adjacency lists.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Clears all adjacency lists.
    pub fn clear(&self) {
        for shard in &*self.shards {
            shard.write().clear();
        }
        self.edge_count.store(0, Ordering::Relaxed);
        self.deleted_count.store(0, Ordering::Relaxed);
    }
}

impl Default for ChunkedAdjacency {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWS: EdgeTypeId = EdgeTypeId(0);
    const LIKES: EdgeTypeId = EdgeTypeId(1);

    fn n(i: u64) -> NodeId {
        NodeId::new(i)
    }

    fn e(i: u64) -> EdgeId {
        EdgeId::new(i)
    }

    #[test]
    fn test_basic_adjacency() {
        let adj = ChunkedAdjacency::new();
        adj.add_edge(n(0), n(1), KNOWS, e(0));
        adj.add_edge(n(0), n(2), KNOWS, e(1));
        adj.add_edge(n(0), n(3), LIKES, e(2));

        let all = adj.edges_from(n(0), None);
        assert_eq!(all.len(), 3);
        let knows = adj.edges_from(n(0), Some(KNOWS));
        assert_eq!(knows, vec![(n(1), e(0)), (n(2), e(1))]);
        assert_eq!(adj.degree(n(0), Some(LIKES)), 1);
        assert_eq!(adj.degree(n(1), None), 0);
    }

    #[test]
    fn test_remove_edge() {
        let adj = ChunkedAdjacency::new();
        adj.add_edge(n(0), n(1), KNOWS, e(0));
        adj.add_edge(n(0), n(2), KNOWS, e(1));
        adj.remove_edge(n(0), KNOWS, e(0));

        assert_eq!(adj.edges_from(n(0), None), vec![(n(2), e(1))]);
        assert_eq!(adj.total_edge_count(), 2);
        assert_eq!(adj.active_edge_count(), 1);
    }

    #[test]
    fn test_compaction_purges_tombstones() {
        let adj = ChunkedAdjacency::with_chunk_capacity(4);
        for i in 0..10 {
            adj.add_edge(n(0), n(i + 1), KNOWS, e(i));
        }
        adj.remove_edge(n(0), KNOWS, e(3));
        adj.compact();

        let edges = adj.edges_from(n(0), Some(KNOWS));
        assert_eq!(edges.len(), 9);
        assert!(!edges.contains(&(n(4), e(3))));
        assert_eq!(adj.total_edge_count(), 9);
    }

    #[test]
    fn test_compaction_drops_empty_nodes() {
        let adj = ChunkedAdjacency::new();
        adj.add_edge(n(5), n(6), KNOWS, e(0));
        adj.remove_edge(n(5), KNOWS, e(0));
        adj.compact();
        assert_eq!(adj.node_count(), 0);
    }

    #[test]
    fn test_clear() {
        let adj = ChunkedAdjacency::new();
        adj.add_edge(n(0), n(1), KNOWS, e(0));
        adj.clear();
        assert_eq!(adj.total_edge_count(), 0);
        assert_eq!(adj.node_count(), 0);
    }
}
