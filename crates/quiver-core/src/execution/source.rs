//! Pipeline sources.
//!
//! - [`NodeScanSource`] - Morsels of the node table, with zone-map skipping
//! - [`IndexSeekSource`] - Nodes found through a property index
//! - [`MaterializedSource`] - Chunks buffered by an earlier pipeline
//! - [`SingleRowSource`] / [`EmptySource`]

use std::ops::{Bound, Range};
use std::sync::Arc;

use parking_lot::Mutex;
use quiver_common::types::{LabelId, NodeId, PropertyKey, Value};

use super::chunk::DataChunk;
use super::context::ExecutionContext;
use super::operators::{OperatorError, OperatorResult};
use super::pipeline::Source;
use super::sink::ChunkBuffer;
use super::vector::ValueVector;
use crate::graph::lpg::{LpgStore, NodeCandidates};
use crate::index::zone_map::CompareOp;

/// A predicate checked against zone maps before a block is read.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonePredicate {
    /// Property compared.
    pub key: PropertyKey,
    /// Comparison.
    pub op: CompareOp,
    /// Constant operand.
    pub value: Value,
}

struct ScanState {
    candidates: NodeCandidates,
    label: Option<LabelId>,
    morsel_size: usize,
}

/// Scans visible nodes, optionally with one label, emitting one node
/// column.
///
/// Blocks whose zone maps rule out a [`ZonePredicate`] are skipped without
/// reading their nodes; the predicates must still be applied by a filter.
pub struct NodeScanSource {
    label: Option<String>,
    zone_predicates: Vec<ZonePredicate>,
    state: Mutex<Option<Arc<ScanState>>>,
}

impl NodeScanSource {
    /// Scans all nodes, or those with `label`.
    #[must_use]
    pub fn new(label: Option<String>) -> Self {
        Self {
            label,
            zone_predicates: Vec::new(),
            state: Mutex::new(None),
        }
    }

    /// Adds predicates used to skip blocks.
    #[must_use]
    pub fn with_zone_predicates(mut self, predicates: Vec<ZonePredicate>) -> Self {
        self.zone_predicates = predicates;
        self
    }

    fn state(&self) -> OperatorResult<Arc<ScanState>> {
        self.state
            .lock()
            .clone()
            .ok_or_else(|| OperatorError::execution("NodeScan", "morsel requested before preparation"))
    }

    fn block_matches(&self, store: &LpgStore, block: usize) -> bool {
        self.zone_predicates
            .iter()
            .all(|p| store.node_block_might_match(&p.key, block, p.op, &p.value))
    }
}

impl Source for NodeScanSource {
    fn morsel_count(&self, ctx: &ExecutionContext) -> OperatorResult<usize> {
        let store = ctx.store();
        let label = self.label.as_deref().map(|l| store.label_id(l));
        let candidates = match label {
            Some(None) => NodeCandidates::Ids(Arc::from(Vec::new())),
            _ => store.node_candidates(self.label.as_deref()),
        };
        let morsel_size = ctx.morsel_size();
        let count = candidates.len().div_ceil(morsel_size);
        *self.state.lock() = Some(Arc::new(ScanState {
            candidates,
            label: label.flatten(),
            morsel_size,
        }));
        Ok(count)
    }

    fn produce(&self, morsel: usize, ctx: &ExecutionContext) -> OperatorResult<Option<DataChunk>> {
        let state = self.state()?;
        let store = ctx.store();
        let start = morsel * state.morsel_size;
        let end = (start + state.morsel_size).min(state.candidates.len());
        let mut ids = Vec::with_capacity(end.saturating_sub(start));
        if self.zone_predicates.is_empty() {
            store.collect_visible_nodes(&state.candidates, start..end, state.label, ctx.snapshot(), &mut ids);
        } else {
            for (range, block) in block_runs(&state.candidates, start..end) {
                if self.block_matches(store, block) {
                    store.collect_visible_nodes(&state.candidates, range, state.label, ctx.snapshot(), &mut ids);
                } else {
                    ctx.stats().block_skipped();
                }
            }
        }
        ctx.stats().add_rows_scanned(ids.len());
        if ids.is_empty() {
            return Ok(None);
        }
        Ok(Some(DataChunk::from_columns(vec![ValueVector::from_nodes(ids)])))
    }

    fn name(&self) -> &'static str {
        "NodeScan"
    }
}

/// Splits candidate positions `range` into runs that fall in one storage
/// block.
fn block_runs(candidates: &NodeCandidates, range: Range<usize>) -> Vec<(Range<usize>, usize)> {
    let block_size = LpgStore::block_size();
    let mut runs = Vec::new();
    let mut pos = range.start;
    while pos < range.end {
        let (block, run_end) = match candidates {
            NodeCandidates::Slots(_) => {
                let block = pos / block_size;
                (block, range.end.min((block + 1) * block_size))
            }
            NodeCandidates::Ids(ids) => {
                let block = ids[pos].index() / block_size;
                let mut end = pos + 1;
                while end < range.end && ids[end].index() / block_size == block {
                    end += 1;
                }
                (block, end)
            }
        };
        runs.push((pos..run_end, block));
        pos = run_end;
    }
    runs
}

/// The lookup an [`IndexSeekSource`] performs.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexLookup {
    /// `key = value`.
    Equals(Value),
    /// `key` within bounds. Needs a B-tree index.
    Range(Bound<Value>, Bound<Value>),
}

/// Nodes found through a property index, emitting one node column.
pub struct IndexSeekSource {
    key: PropertyKey,
    lookup: IndexLookup,
    label: Option<String>,
    ids: Mutex<Option<Arc<[NodeId]>>>,
}

impl IndexSeekSource {
    /// Seeks `key` by `lookup`, keeping only nodes with `label` if given.
    #[must_use]
    pub fn new(key: PropertyKey, lookup: IndexLookup, label: Option<String>) -> Self {
        Self {
            key,
            lookup,
            label,
            ids: Mutex::new(None),
        }
    }
}

impl Source for IndexSeekSource {
    fn morsel_count(&self, ctx: &ExecutionContext) -> OperatorResult<usize> {
        let store = ctx.store();
        let found = match &self.lookup {
            IndexLookup::Equals(v) => store.index_lookup(&self.key, v, ctx.snapshot()),
            IndexLookup::Range(lo, hi) => store.index_range(&self.key, lo.as_ref(), hi.as_ref(), ctx.snapshot()),
        };
        let mut ids = found.ok_or_else(|| {
            OperatorError::execution("IndexSeek", format!("no usable index on {}", self.key))
        })?;
        if let Some(label) = &self.label {
            match store.label_id(label) {
                Some(label) => ids.retain(|id| {
                    store
                        .node_label_ids(*id, ctx.snapshot())
                        .is_some_and(|labels| labels.contains(&label))
                }),
                None => ids.clear(),
            }
        }
        ctx.stats().add_rows_scanned(ids.len());
        let count = ids.len().div_ceil(ctx.morsel_size());
        *self.ids.lock() = Some(Arc::from(ids));
        Ok(count)
    }

    fn produce(&self, morsel: usize, ctx: &ExecutionContext) -> OperatorResult<Option<DataChunk>> {
        let ids = self.ids.lock().clone().unwrap_or_else(|| Arc::from(Vec::new()));
        let start = (morsel * ctx.morsel_size()).min(ids.len());
        let end = (start + ctx.morsel_size()).min(ids.len());
        if start == end {
            return Ok(None);
        }
        Ok(Some(DataChunk::from_columns(vec![ValueVector::from_nodes(
            ids[start..end].to_vec(),
        )])))
    }

    fn is_ordered(&self) -> bool {
        matches!(self.lookup, IndexLookup::Range(..))
    }

    fn name(&self) -> &'static str {
        "IndexSeek"
    }
}

/// Replays the chunks an earlier pipeline buffered, one chunk per morsel.
pub struct MaterializedSource {
    buffer: Arc<ChunkBuffer>,
    chunks: Mutex<Vec<Option<DataChunk>>>,
    ordered: bool,
}

impl MaterializedSource {
    /// Reads from `buffer`. `ordered` keeps chunk order.
    #[must_use]
    pub fn new(buffer: Arc<ChunkBuffer>, ordered: bool) -> Self {
        Self {
            buffer,
            chunks: Mutex::new(Vec::new()),
            ordered,
        }
    }
}

impl Source for MaterializedSource {
    fn morsel_count(&self, _ctx: &ExecutionContext) -> OperatorResult<usize> {
        let chunks: Vec<Option<DataChunk>> = self.buffer.take_all().into_iter().map(Some).collect();
        let count = chunks.len();
        *self.chunks.lock() = chunks;
        Ok(count)
    }

    fn produce(&self, morsel: usize, _ctx: &ExecutionContext) -> OperatorResult<Option<DataChunk>> {
        Ok(self.chunks.lock().get_mut(morsel).and_then(Option::take))
    }

    fn is_ordered(&self) -> bool {
        self.ordered
    }

    fn name(&self) -> &'static str {
        "Materialized"
    }
}

/// One row with no columns, the input of queries without a pattern.
#[derive(Debug, Default)]
pub struct SingleRowSource;

impl Source for SingleRowSource {
    fn morsel_count(&self, _ctx: &ExecutionContext) -> OperatorResult<usize> {
        Ok(1)
    }

    fn produce(&self, _morsel: usize, _ctx: &ExecutionContext) -> OperatorResult<Option<DataChunk>> {
        Ok(Some(DataChunk::rows_only(1)))
    }

    fn name(&self) -> &'static str {
        "SingleRow"
    }
}

/// Produces nothing.
#[derive(Debug, Default)]
pub struct EmptySource;

impl Source for EmptySource {
    fn morsel_count(&self, _ctx: &ExecutionContext) -> OperatorResult<usize> {
        Ok(0)
    }

    fn produce(&self, _morsel: usize, _ctx: &ExecutionContext) -> OperatorResult<Option<DataChunk>> {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "Empty"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::lpg::IndexKind;
    use quiver_common::mvcc::{Snapshot, WriteSet};
    use quiver_common::types::{EpochId, TxId};

    fn store_with_people(n: i64) -> Arc<LpgStore> {
        let store = LpgStore::new();
        let snap = Snapshot::new(EpochId::new(0), TxId::new(1));
        let mut ws = WriteSet::new();
        for i in 0..n {
            let label = if i % 2 == 0 { "Person" } else { "Robot" };
            store
                .create_node(&snap, &mut ws, &[label], vec![(PropertyKey::new("age"), Value::Int64(i))])
                .unwrap();
        }
        store.commit(TxId::new(1), EpochId::new(1), &ws);
        Arc::new(store)
    }

    fn drain(source: &dyn Source, ctx: &ExecutionContext) -> Vec<NodeId> {
        let n = source.morsel_count(ctx).unwrap();
        (0..n)
            .filter_map(|m| source.produce(m, ctx).unwrap())
            .flat_map(|c| c.column(0).and_then(|v| v.node_ids().map(<[NodeId]>::to_vec)).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_label_scan_in_morsels() {
        let store = store_with_people(100);
        let ctx = ExecutionContext::new(store, Snapshot::committed(EpochId::new(1))).with_morsel_size(16);
        let source = NodeScanSource::new(Some("Person".into()));
        assert_eq!(source.morsel_count(&ctx).unwrap(), 4);
        assert_eq!(drain(&source, &ctx).len(), 50);
        assert_eq!(ctx.query_stats().rows_scanned, 50);
    }

    #[test]
    fn test_unknown_label_is_empty() {
        let store = store_with_people(10);
        let ctx = ExecutionContext::new(store, Snapshot::committed(EpochId::new(1)));
        let source = NodeScanSource::new(Some("Ghost".into()));
        assert_eq!(source.morsel_count(&ctx).unwrap(), 0);
    }

    #[test]
    fn test_index_seek_equals() {
        let store = store_with_people(20);
        store.create_property_index(PropertyKey::new("age"), IndexKind::Hash);
        let ctx = ExecutionContext::new(store, Snapshot::committed(EpochId::new(1)));
        let source = IndexSeekSource::new(PropertyKey::new("age"), IndexLookup::Equals(Value::Int64(4)), None);
        assert_eq!(drain(&source, &ctx), vec![NodeId::new(4)]);
    }

    #[test]
    fn test_materialized_replays_in_order() {
        let buffer = Arc::new(ChunkBuffer::new());
        for i in 0..3 {
            buffer.push(DataChunk::from_columns(vec![ValueVector::from_nodes(vec![NodeId::new(i)])]));
        }
        let ctx = ExecutionContext::new(Arc::new(LpgStore::new()), Snapshot::committed(EpochId::new(0)));
        let source = MaterializedSource::new(buffer, true);
        assert!(source.is_ordered());
        assert_eq!(drain(&source, &ctx), vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)]);
    }
}
