//! Join operators.
//!
//! - Hash join: [`HashBuildSink`] fills a shared [`JoinTable`] in one
//!   pipeline; [`HashProbeOperator`] probes it in a later one. If the build
//!   side outgrows the memory budget both sides are hash-partitioned to
//!   spill files and joined partition by partition at finalize.
//! - [`MergeJoinSource`] merges two inputs sorted on the join key.
//! - [`NestedLoopJoinOperator`] pairs every outer row with a buffered inner
//!   side; [`IndexNestedLoopJoinOperator`] looks each outer key up in a
//!   property index instead.
//!
//! All joins are inner equi-joins (plus an optional residual predicate for
//! nested loops). Null keys never match. Output rows are the probe/outer/left
//! row followed by the build/inner/right row.

use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;
use parking_lot::Mutex;
use quiver_common::memory::MemoryGrant;
use quiver_common::types::{LogicalType, NodeId, PropertyKey, Value};

use super::sort::{SortKey, SortedOutput, compare_rows};
use super::{OperatorError, OperatorResult};
use crate::execution::chunk::{DEFAULT_CHUNK_SIZE, DataChunk};
use crate::execution::context::ExecutionContext;
use crate::execution::expression::Expression;
use crate::execution::pipeline::{PushOperator, Sink, Source};
use crate::execution::sink::ChunkBuffer;
use crate::execution::spill::SpillFile;
use crate::execution::vector::{Cell, CellKey, ValueVector};

/// Spill partitions of a hash join.
const PARTITIONS: usize = 16;

/// Per-row bookkeeping overhead charged on top of the cells.
const ROW_OVERHEAD: usize = 48;

type RowKey = Vec<CellKey>;

fn row_key(row: &[Cell], columns: &[usize]) -> Option<RowKey> {
    columns
        .iter()
        .map(|c| row.get(*c).filter(|cell| !cell.is_null()).map(Cell::key))
        .collect()
}

fn row_size(row: &[Cell]) -> usize {
    row.iter().map(Cell::estimated_size).sum::<usize>() + ROW_OVERHEAD
}

fn concat(left: &[Cell], right: &[Cell]) -> Vec<Cell> {
    let mut row = Vec::with_capacity(left.len() + right.len());
    row.extend_from_slice(left);
    row.extend_from_slice(right);
    row
}

#[derive(Default)]
struct InMemoryTable {
    rows: Vec<Vec<Cell>>,
    index: HashMap<RowKey, Vec<usize>>,
}

impl InMemoryTable {
    fn insert(&mut self, key: RowKey, row: Vec<Cell>) {
        self.index.entry(key).or_default().push(self.rows.len());
        self.rows.push(row);
    }

    fn matches(&self, key: &RowKey) -> impl Iterator<Item = &Vec<Cell>> {
        self.index
            .get(key)
            .into_iter()
            .flatten()
            .map(|i| &self.rows[*i])
    }
}

#[derive(Default)]
struct BuildState {
    table: InMemoryTable,
    grant: Option<MemoryGrant>,
    partitions: Option<Vec<SpillFile>>,
    types: Option<Vec<LogicalType>>,
}

enum BuiltTable {
    Memory {
        table: InMemoryTable,
        _grant: Option<MemoryGrant>,
    },
    Spilled {
        partitions: Mutex<Vec<SpillFile>>,
    },
}

/// The build side of a hash join, shared between the build sink and the
/// probe operator.
pub struct JoinTable {
    key_columns: Vec<usize>,
    hasher: ahash::RandomState,
    build: Mutex<BuildState>,
    built: OnceLock<(BuiltTable, Vec<LogicalType>)>,
}

impl JoinTable {
    /// A table keyed on `key_columns` of the build rows.
    #[must_use]
    pub fn new(key_columns: Vec<usize>) -> Self {
        Self {
            key_columns,
            hasher: ahash::RandomState::new(),
            build: Mutex::new(BuildState::default()),
            built: OnceLock::new(),
        }
    }

    fn partition_of(&self, key: &RowKey) -> usize {
        (self.hasher.hash_one(key) % PARTITIONS as u64) as usize
    }

    /// Returns true if the build side was spilled.
    #[must_use]
    pub fn is_spilled(&self) -> bool {
        matches!(self.built.get(), Some((BuiltTable::Spilled { .. }, _)))
    }

    /// Build rows kept in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.built.get() {
            Some((BuiltTable::Memory { table, .. }, _)) => table.rows.len(),
            Some((BuiltTable::Spilled { .. }, _)) => 0,
            None => self.build.lock().table.rows.len(),
        }
    }

    /// Returns true if no build rows are held in memory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves everything built so far into partition files.
    fn spill(&self, state: &mut BuildState, ctx: &ExecutionContext) -> OperatorResult {
        let Some(spill) = ctx.spill() else {
            return Ok(());
        };
        let mut partitions = (0..PARTITIONS)
            .map(|_| spill.create_file("join-build"))
            .collect::<quiver_common::utils::error::Result<Vec<_>>>()?;
        let table = std::mem::take(&mut state.table);
        for (key, rows) in &table.index {
            let p = self.partition_of(key);
            for i in rows {
                partitions[p].write_row(&table.rows[*i])?;
            }
        }
        tracing::debug!(rows = table.rows.len(), partitions = PARTITIONS, "hash join build spilled");
        state.partitions = Some(partitions);
        state.grant = None;
        Ok(())
    }

    fn finish(&self, ctx: &ExecutionContext) -> OperatorResult {
        let mut state = self.build.lock();
        let types = state.types.take().unwrap_or_default();
        let built = match state.partitions.take() {
            Some(mut partitions) => {
                if let Some(spill) = ctx.spill() {
                    for file in &mut partitions {
                        file.finish(spill)?;
                    }
                }
                BuiltTable::Spilled {
                    partitions: Mutex::new(partitions),
                }
            }
            None => BuiltTable::Memory {
                table: std::mem::take(&mut state.table),
                _grant: state.grant.take(),
            },
        };
        if self.built.set((built, types)).is_err() {
            return Err(OperatorError::execution("HashBuild", "join table finalized twice"));
        }
        Ok(())
    }
}

/// Fills a [`JoinTable`].
pub struct HashBuildSink {
    table: Arc<JoinTable>,
}

impl HashBuildSink {
    /// Builds into `table`.
    #[must_use]
    pub fn new(table: Arc<JoinTable>) -> Self {
        Self { table }
    }
}

impl Sink for HashBuildSink {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext) -> OperatorResult {
        let rows: Vec<(RowKey, Vec<Cell>)> = chunk
            .rows()
            .filter_map(|row| row_key(&row, &self.table.key_columns).map(|k| (k, row)))
            .collect();
        let bytes: usize = rows.iter().map(|(_, r)| row_size(r)).sum();
        let mut state = self.table.build.lock();
        if state.types.is_none() {
            state.types = Some(chunk.types());
        }
        if state.partitions.is_none() {
            let grew = state
                .grant
                .get_or_insert_with(|| ctx.execution_grant())
                .try_grow(bytes);
            if grew {
                for (key, row) in rows {
                    state.table.insert(key, row);
                }
                return Ok(());
            }
            if ctx.spill().is_none() {
                return Err(OperatorError::ResourceExhausted {
                    context: "HashBuild".to_string(),
                    requested: bytes,
                    available: ctx.memory().available().unwrap_or(0),
                });
            }
            self.table.spill(&mut state, ctx)?;
        }
        if let Some(partitions) = state.partitions.as_mut() {
            for (key, row) in rows {
                partitions[self.table.partition_of(&key)].write_row(&row)?;
            }
        }
        Ok(())
    }

    fn finalize(&self, ctx: &ExecutionContext) -> OperatorResult {
        self.table.finish(ctx)
    }

    fn name(&self) -> &'static str {
        "HashBuild"
    }
}

#[derive(Default)]
struct ProbeSpill {
    partitions: Vec<SpillFile>,
    types: Vec<LogicalType>,
}

/// Probes a built [`JoinTable`] with the rows of its pipeline.
pub struct HashProbeOperator {
    table: Arc<JoinTable>,
    key_columns: Vec<usize>,
    spilled: Mutex<Option<ProbeSpill>>,
}

impl HashProbeOperator {
    /// Probes `table` with `key_columns` of each input row.
    #[must_use]
    pub fn new(table: Arc<JoinTable>, key_columns: Vec<usize>) -> Self {
        Self {
            table,
            key_columns,
            spilled: Mutex::new(None),
        }
    }

    fn built(&self) -> OperatorResult<&(BuiltTable, Vec<LogicalType>)> {
        self.table
            .built
            .get()
            .ok_or_else(|| OperatorError::execution("HashProbe", "probe started before build finished"))
    }

    fn spill_probe(&self, chunk: &DataChunk, ctx: &ExecutionContext) -> OperatorResult {
        let Some(spill) = ctx.spill() else {
            return Err(OperatorError::execution("HashProbe", "build side spilled without a spill directory"));
        };
        let mut guard = self.spilled.lock();
        if guard.is_none() {
            let partitions = (0..PARTITIONS)
                .map(|_| spill.create_file("join-probe"))
                .collect::<quiver_common::utils::error::Result<Vec<_>>>()?;
            *guard = Some(ProbeSpill {
                partitions,
                types: chunk.types(),
            });
        }
        if let Some(probe) = guard.as_mut() {
            for row in chunk.rows() {
                if let Some(key) = row_key(&row, &self.key_columns) {
                    probe.partitions[self.table.partition_of(&key)].write_row(&row)?;
                }
            }
        }
        Ok(())
    }
}

impl PushOperator for HashProbeOperator {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext, out: &mut Vec<DataChunk>) -> OperatorResult {
        let (built, build_types) = self.built()?;
        let table = match built {
            BuiltTable::Memory { table, .. } => table,
            BuiltTable::Spilled { .. } => return self.spill_probe(&chunk, ctx),
        };
        if table.rows.is_empty() {
            return Ok(());
        }
        let mut probe_rows = Vec::new();
        let mut build_rows: Vec<&Vec<Cell>> = Vec::new();
        for (i, row) in chunk.rows().enumerate() {
            let Some(key) = row_key(&row, &self.key_columns) else {
                continue;
            };
            for matched in table.matches(&key) {
                probe_rows.push(i);
                build_rows.push(matched);
            }
        }
        if probe_rows.is_empty() {
            return Ok(());
        }
        for start in (0..probe_rows.len()).step_by(DEFAULT_CHUNK_SIZE) {
            let end = (start + DEFAULT_CHUNK_SIZE).min(probe_rows.len());
            let mut columns: Vec<ValueVector> = chunk
                .columns()
                .iter()
                .map(|c| c.take(probe_rows[start..end].iter().copied()))
                .collect();
            for (c, ty) in build_types.iter().enumerate() {
                let mut column = ValueVector::with_capacity(*ty, end - start);
                for row in &build_rows[start..end] {
                    column.push_cell(row.get(c).cloned().unwrap_or(Cell::Value(Value::Null)));
                }
                columns.push(column);
            }
            out.push(if columns.is_empty() {
                DataChunk::rows_only(end - start)
            } else {
                DataChunk::from_columns(columns)
            });
        }
        Ok(())
    }

    fn finalize(&self, ctx: &ExecutionContext, out: &mut Vec<DataChunk>) -> OperatorResult {
        let (BuiltTable::Spilled { partitions }, build_types) = self.built()? else {
            return Ok(());
        };
        let Some(mut probe) = self.spilled.lock().take() else {
            return Ok(());
        };
        let Some(spill) = ctx.spill() else {
            return Ok(());
        };
        for file in &mut probe.partitions {
            file.finish(spill)?;
        }
        let types: Vec<LogicalType> = probe.types.iter().chain(build_types).copied().collect();
        let build_partitions = std::mem::take(&mut *partitions.lock());
        for (p, (build_file, probe_file)) in build_partitions.iter().zip(&probe.partitions).enumerate() {
            ctx.check_cancelled()?;
            let mut grant = ctx.execution_grant();
            let mut table = InMemoryTable::default();
            for row in build_file.reader()? {
                let row = row?;
                let size = row_size(&row);
                if !grant.try_grow(size) {
                    return Err(OperatorError::ResourceExhausted {
                        context: format!("HashProbe(partition {p})"),
                        requested: size,
                        available: ctx.memory().available().unwrap_or(0),
                    });
                }
                if let Some(key) = row_key(&row, &self.table.key_columns) {
                    table.insert(key, row);
                }
            }
            let mut pending = Vec::new();
            for row in probe_file.reader()? {
                let row = row?;
                let Some(key) = row_key(&row, &self.key_columns) else {
                    continue;
                };
                for matched in table.matches(&key) {
                    pending.push(concat(&row, matched));
                    if pending.len() >= DEFAULT_CHUNK_SIZE {
                        out.push(DataChunk::from_rows(&types, pending.drain(..)));
                    }
                }
            }
            if !pending.is_empty() {
                out.push(DataChunk::from_rows(&types, pending));
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HashProbe"
    }
}

struct MergeCursor {
    output: Arc<SortedOutput>,
    head: Option<Vec<Cell>>,
    started: bool,
}

impl MergeCursor {
    fn peek(&mut self) -> OperatorResult<Option<&Vec<Cell>>> {
        if !self.started {
            self.head = self.output.next_row()?;
            self.started = true;
        }
        Ok(self.head.as_ref())
    }

    fn advance(&mut self) -> OperatorResult<Option<Vec<Cell>>> {
        self.peek()?;
        let next = self.output.next_row()?;
        Ok(std::mem::replace(&mut self.head, next))
    }

    /// Takes every row whose key equals the head's key.
    fn take_group(&mut self, keys: &[SortKey]) -> OperatorResult<Vec<Vec<Cell>>> {
        let mut group = Vec::new();
        if let Some(first) = self.advance()? {
            while let Some(next) = self.peek()? {
                if compare_rows(keys, &first, next) != std::cmp::Ordering::Equal {
                    break;
                }
                if let Some(row) = self.advance()? {
                    group.push(row);
                }
            }
            group.insert(0, first);
        }
        Ok(group)
    }
}

struct MergeState {
    left: MergeCursor,
    right: MergeCursor,
    types: Option<Vec<LogicalType>>,
}

/// Merge join over two inputs already sorted ascending on their keys.
///
/// Each morsel consumes about one morsel's worth of input rows; the
/// pipeline runs on one worker since the merge is sequential.
pub struct MergeJoinSource {
    left_keys: Vec<SortKey>,
    right_keys: Vec<SortKey>,
    state: Mutex<MergeState>,
    morsels: Mutex<usize>,
}

impl MergeJoinSource {
    /// Joins `left` and `right` on `left_keys[i] = right_keys[i]`.
    #[must_use]
    pub fn new(
        left: Arc<SortedOutput>,
        left_keys: Vec<usize>,
        right: Arc<SortedOutput>,
        right_keys: Vec<usize>,
    ) -> Self {
        Self {
            left_keys: left_keys.into_iter().map(SortKey::ascending).collect(),
            right_keys: right_keys.into_iter().map(SortKey::ascending).collect(),
            state: Mutex::new(MergeState {
                left: MergeCursor {
                    output: left,
                    head: None,
                    started: false,
                },
                right: MergeCursor {
                    output: right,
                    head: None,
                    started: false,
                },
                types: None,
            }),
            morsels: Mutex::new(0),
        }
    }

    fn compare_keys(&self, left: &[Cell], right: &[Cell]) -> Option<std::cmp::Ordering> {
        let lk = self.left_keys.iter().map(|k| left.get(k.column));
        let rk = self.right_keys.iter().map(|k| right.get(k.column));
        for (l, r) in lk.zip(rk) {
            let (l, r) = (l.filter(|c| !c.is_null())?, r.filter(|c| !c.is_null())?);
            let ord = l.key().cmp(&r.key());
            if ord != std::cmp::Ordering::Equal {
                return Some(ord);
            }
        }
        Some(std::cmp::Ordering::Equal)
    }
}

impl Source for MergeJoinSource {
    fn morsel_count(&self, ctx: &ExecutionContext) -> OperatorResult<usize> {
        let state = self.state.lock();
        let rows = state.left.output.rows() + state.right.output.rows();
        let count = rows.div_ceil(ctx.morsel_size()).max(1);
        *self.morsels.lock() = count;
        Ok(count)
    }

    fn produce(&self, morsel: usize, ctx: &ExecutionContext) -> OperatorResult<Option<DataChunk>> {
        let last = morsel + 1 >= *self.morsels.lock();
        let mut state = self.state.lock();
        let state = &mut *state;
        if state.types.is_none() {
            let mut types = state.left.output.types();
            types.extend(state.right.output.types());
            state.types = Some(types);
        }
        let mut rows = Vec::new();
        let mut consumed = 0;
        while last || consumed < ctx.morsel_size() {
            let (Some(l), Some(r)) = (state.left.peek()?.cloned(), state.right.peek()?.cloned()) else {
                break;
            };
            match self.compare_keys(&l, &r) {
                None => {
                    // Null keys never join; skip whichever side holds one.
                    if self.left_keys.iter().any(|k| l.get(k.column).is_none_or(Cell::is_null)) {
                        state.left.advance()?;
                    } else {
                        state.right.advance()?;
                    }
                    consumed += 1;
                }
                Some(std::cmp::Ordering::Less) => {
                    state.left.advance()?;
                    consumed += 1;
                }
                Some(std::cmp::Ordering::Greater) => {
                    state.right.advance()?;
                    consumed += 1;
                }
                Some(std::cmp::Ordering::Equal) => {
                    let lg = state.left.take_group(&self.left_keys)?;
                    let rg = state.right.take_group(&self.right_keys)?;
                    consumed += lg.len() + rg.len();
                    for a in &lg {
                        for b in &rg {
                            rows.push(concat(a, b));
                        }
                    }
                }
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }
        let types = state.types.clone().unwrap_or_default();
        Ok(Some(DataChunk::from_rows(&types, rows)))
    }

    fn is_ordered(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "MergeJoin"
    }
}

/// Pairs each outer row with every inner row, keeping pairs that satisfy
/// the optional predicate (evaluated over the concatenated row).
pub struct NestedLoopJoinOperator {
    inner: Arc<ChunkBuffer>,
    loaded: OnceLock<Vec<DataChunk>>,
    predicate: Option<Expression>,
}

impl NestedLoopJoinOperator {
    /// Joins against the chunks an earlier pipeline left in `inner`.
    #[must_use]
    pub fn new(inner: Arc<ChunkBuffer>, predicate: Option<Expression>) -> Self {
        Self {
            inner,
            loaded: OnceLock::new(),
            predicate,
        }
    }
}

impl PushOperator for NestedLoopJoinOperator {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext, out: &mut Vec<DataChunk>) -> OperatorResult {
        let inner = self.loaded.get_or_init(|| self.inner.take_all());
        let eval = ctx.eval();
        for inner_chunk in inner {
            let m = inner_chunk.row_count();
            if m == 0 {
                continue;
            }
            let batch = (DEFAULT_CHUNK_SIZE / m).max(1);
            let mut outer_start = 0;
            while outer_start < chunk.row_count() {
                let outer_end = (outer_start + batch).min(chunk.row_count());
                let pairs = (outer_start..outer_end).flat_map(|o| (0..m).map(move |i| (o, i)));
                let (outer_idx, inner_idx): (Vec<usize>, Vec<usize>) = pairs.unzip();
                let mut columns: Vec<ValueVector> = chunk
                    .columns()
                    .iter()
                    .map(|c| c.take(outer_idx.iter().copied()))
                    .collect();
                columns.extend(inner_chunk.columns().iter().map(|c| c.take(inner_idx.iter().copied())));
                let combined = if columns.is_empty() {
                    DataChunk::rows_only(outer_idx.len())
                } else {
                    DataChunk::from_columns(columns)
                };
                match &self.predicate {
                    Some(predicate) => {
                        let selection = predicate
                            .evaluate_predicate(&combined, &eval)
                            .map_err(|e| e.in_operator(self.name()))?;
                        if !selection.is_empty() {
                            out.push(combined.select(&selection));
                        }
                    }
                    None => out.push(combined),
                }
                outer_start = outer_end;
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "NestedLoopJoin"
    }
}

/// For each outer row, finds the nodes whose indexed property equals the
/// outer key and appends them as a node column.
pub struct IndexNestedLoopJoinOperator {
    outer_key: Expression,
    property: PropertyKey,
    label: Option<String>,
}

impl IndexNestedLoopJoinOperator {
    /// Joins `outer_key` against the index on `property`, keeping nodes
    /// with `label` if given.
    #[must_use]
    pub fn new(outer_key: Expression, property: PropertyKey, label: Option<String>) -> Self {
        Self {
            outer_key,
            property,
            label,
        }
    }
}

impl PushOperator for IndexNestedLoopJoinOperator {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext, out: &mut Vec<DataChunk>) -> OperatorResult {
        let store = ctx.store();
        let snapshot = ctx.snapshot();
        let label = match &self.label {
            Some(name) => match store.label_id(name) {
                Some(id) => Some(id),
                None => return Ok(()),
            },
            None => None,
        };
        let keys = self
            .outer_key
            .evaluate(&chunk, &ctx.eval())
            .map_err(|e| e.in_operator(self.name()))?;
        let mut outer_rows = Vec::new();
        let mut matched: Vec<NodeId> = Vec::new();
        for (row, key) in keys.iter().enumerate() {
            if key.is_null() {
                continue;
            }
            let ids = store.index_lookup(&self.property, key, snapshot).ok_or_else(|| {
                OperatorError::execution(self.name(), format!("no index on {}", self.property))
            })?;
            for id in ids {
                let keep = label.is_none_or(|l| {
                    store
                        .node_label_ids(id, snapshot)
                        .is_some_and(|labels| labels.contains(&l))
                });
                if keep {
                    outer_rows.push(row);
                    matched.push(id);
                }
            }
        }
        if outer_rows.is_empty() {
            return Ok(());
        }
        let mut columns: Vec<ValueVector> = chunk
            .columns()
            .iter()
            .map(|c| c.take(outer_rows.iter().copied()))
            .collect();
        columns.push(ValueVector::from_nodes(matched));
        out.push(DataChunk::from_columns(columns));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "IndexNestedLoopJoin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::expression::BinaryOp;
    use crate::execution::operators::SortSink;
    use crate::execution::spill::SpillManager;
    use crate::graph::lpg::{IndexKind, LpgStore};
    use quiver_common::memory::BufferManager;
    use quiver_common::mvcc::{Snapshot, WriteSet};
    use quiver_common::types::{EpochId, TxId};

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(LpgStore::new()), Snapshot::committed(EpochId::new(0)))
    }

    fn pairs(rows: &[(i64, &str)]) -> DataChunk {
        DataChunk::from_columns(vec![
            ValueVector::from_values(LogicalType::Int64, rows.iter().map(|r| Value::Int64(r.0)).collect()),
            ValueVector::from_values(LogicalType::String, rows.iter().map(|r| Value::from(r.1)).collect()),
        ])
    }

    fn all_rows(chunks: &[DataChunk]) -> Vec<Vec<Value>> {
        let mut rows: Vec<Vec<Value>> = chunks
            .iter()
            .flat_map(|c| c.rows().map(|r| r.iter().map(Cell::to_value).collect()))
            .collect();
        rows.sort_by(|a, b| {
            a.iter()
                .zip(b)
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows
    }

    fn hash_join(ctx: &ExecutionContext, build: Vec<DataChunk>, probe: Vec<DataChunk>) -> Vec<DataChunk> {
        let table = Arc::new(JoinTable::new(vec![0]));
        let sink = HashBuildSink::new(Arc::clone(&table));
        for chunk in build {
            sink.consume(chunk, ctx).unwrap();
        }
        sink.finalize(ctx).unwrap();
        let probe_op = HashProbeOperator::new(table, vec![0]);
        let mut out = Vec::new();
        for chunk in probe {
            probe_op.consume(chunk, ctx, &mut out).unwrap();
        }
        probe_op.finalize(ctx, &mut out).unwrap();
        out
    }

    #[test]
    fn test_hash_join_matches_and_duplicates() {
        let ctx = ctx();
        let out = hash_join(
            &ctx,
            vec![pairs(&[(1, "a"), (2, "b"), (2, "bb")])],
            vec![pairs(&[(2, "x"), (3, "y")])],
        );
        let rows = all_rows(&out);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Value::Int64(2), Value::from("x"), Value::Int64(2), Value::from("b")]);
    }

    #[test]
    fn test_hash_join_null_keys_never_match() {
        let ctx = ctx();
        let nulls = DataChunk::from_columns(vec![ValueVector::from_values(LogicalType::Int64, vec![Value::Null])]);
        let out = hash_join(&ctx, vec![nulls.clone()], vec![nulls]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_hash_join_spills_and_still_joins() {
        let ctx = ctx()
            .with_memory(BufferManager::with_budget(16_384))
            .with_spill(Arc::new(SpillManager::temporary().unwrap()));
        let build: Vec<DataChunk> = (0..10)
            .map(|b| {
                let rows: Vec<(i64, &str)> = (0..100).map(|i| (b * 100 + i, "build")).collect();
                pairs(&rows)
            })
            .collect();
        let probe = vec![pairs(&(0..1000).step_by(7).map(|i| (i, "probe")).collect::<Vec<_>>())];
        let out = hash_join(&ctx, build, probe);
        assert!(ctx.query_stats().spill_files > 0);
        assert_eq!(all_rows(&out).len(), (0..1000).step_by(7).count());
    }

    #[test]
    fn test_hash_join_exhausted_without_spill() {
        let ctx = ctx().with_memory(BufferManager::with_budget(256));
        let table = Arc::new(JoinTable::new(vec![0]));
        let sink = HashBuildSink::new(table);
        let rows: Vec<(i64, &str)> = (0..100).map(|i| (i, "x")).collect();
        let err = sink.consume(pairs(&rows), &ctx).unwrap_err();
        assert!(matches!(err, OperatorError::ResourceExhausted { .. }));
    }

    #[test]
    fn test_merge_join_groups() {
        let ctx = ctx().with_morsel_size(2);
        let sorted = |chunk: DataChunk| {
            let output = Arc::new(SortedOutput::new());
            let sink = SortSink::new(vec![SortKey::ascending(0)], Arc::clone(&output));
            sink.consume(chunk, &ctx).unwrap();
            sink.finalize(&ctx).unwrap();
            output
        };
        let left = sorted(pairs(&[(3, "c"), (1, "a"), (2, "b"), (2, "b2")]));
        let right = sorted(pairs(&[(2, "x"), (4, "y"), (1, "z")]));
        let source = MergeJoinSource::new(left, vec![0], right, vec![0]);
        let n = source.morsel_count(&ctx).unwrap();
        let chunks: Vec<DataChunk> = (0..n).filter_map(|m| source.produce(m, &ctx).unwrap()).collect();
        let rows = all_rows(&chunks);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][1], Value::from("a"));
    }

    #[test]
    fn test_nested_loop_with_predicate() {
        let ctx = ctx();
        let inner = Arc::new(ChunkBuffer::new());
        inner.push(pairs(&[(1, "a"), (5, "b")]));
        let op = NestedLoopJoinOperator::new(
            inner,
            Some(Expression::binary(Expression::Column(0), BinaryOp::Lt, Expression::Column(2))),
        );
        let mut out = Vec::new();
        op.consume(pairs(&[(3, "x"), (0, "y")]), &ctx, &mut out).unwrap();
        assert_eq!(all_rows(&out).len(), 3);
    }

    #[test]
    fn test_index_nested_loop() {
        let store = LpgStore::new();
        let snap = Snapshot::new(EpochId::new(0), TxId::new(1));
        let mut ws = WriteSet::new();
        for i in 0..10 {
            store
                .create_node(&snap, &mut ws, &["Person"], vec![(PropertyKey::new("age"), Value::Int64(i % 3))])
                .unwrap();
        }
        store.create_property_index(PropertyKey::new("age"), IndexKind::Hash);
        let ctx = ExecutionContext::new(Arc::new(store), snap);
        let op = IndexNestedLoopJoinOperator::new(Expression::Column(0), PropertyKey::new("age"), Some("Person".into()));
        let mut out = Vec::new();
        op.consume(pairs(&[(1, "x"), (7, "none")]), &ctx, &mut out).unwrap();
        assert_eq!(out[0].row_count(), 3);
        assert_eq!(out[0].column_count(), 3);
    }
}
