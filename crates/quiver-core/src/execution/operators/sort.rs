//! ORDER BY with external merge sort.
//!
//! [`SortSink`] buffers rows under the memory budget. When the budget is
//! exhausted it sorts the buffer into a run on disk and starts over; at
//! finalize the runs are merged into a [`SortedOutput`] that a
//! [`SortedSource`] streams, in order, into the next pipeline.

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use quiver_common::memory::MemoryGrant;
use quiver_common::types::LogicalType;

use super::{OperatorError, OperatorResult};
use crate::execution::chunk::DataChunk;
use crate::execution::context::ExecutionContext;
use crate::execution::pipeline::{Sink, Source};
use crate::execution::spill::{SpillFile, SpillReader};
use crate::execution::vector::Cell;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// Where nulls sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrder {
    /// Nulls before every value.
    NullsFirst,
    /// Nulls after every value.
    NullsLast,
}

/// One ORDER BY key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    /// Column to sort on.
    pub column: usize,
    /// Direction.
    pub direction: SortDirection,
    /// Null placement.
    pub nulls: NullOrder,
}

impl SortKey {
    /// Ascending, nulls last.
    #[must_use]
    pub const fn ascending(column: usize) -> Self {
        Self {
            column,
            direction: SortDirection::Ascending,
            nulls: NullOrder::NullsLast,
        }
    }

    /// Descending, nulls first (nulls are the largest values).
    #[must_use]
    pub const fn descending(column: usize) -> Self {
        Self {
            column,
            direction: SortDirection::Descending,
            nulls: NullOrder::NullsFirst,
        }
    }
}

/// Compares two rows by `keys`.
#[must_use]
pub fn compare_rows(keys: &[SortKey], a: &[Cell], b: &[Cell]) -> Ordering {
    for key in keys {
        let (x, y) = (a.get(key.column), b.get(key.column));
        let x_null = x.is_none_or(Cell::is_null);
        let y_null = y.is_none_or(Cell::is_null);
        let ord = match (x_null, y_null) {
            (true, true) => Ordering::Equal,
            (true, false) => match key.nulls {
                NullOrder::NullsFirst => Ordering::Less,
                NullOrder::NullsLast => Ordering::Greater,
            },
            (false, true) => match key.nulls {
                NullOrder::NullsFirst => Ordering::Greater,
                NullOrder::NullsLast => Ordering::Less,
            },
            (false, false) => match (x, y) {
                (Some(x), Some(y)) => {
                    let ord = x.total_cmp(y);
                    match key.direction {
                        SortDirection::Ascending => ord,
                        SortDirection::Descending => ord.reverse(),
                    }
                }
                _ => Ordering::Equal,
            },
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[derive(Default)]
struct SortState {
    rows: Vec<Vec<Cell>>,
    grant: Option<MemoryGrant>,
    runs: Vec<SpillFile>,
    types: Option<Vec<LogicalType>>,
}

/// Collects and sorts its input.
pub struct SortSink {
    keys: Vec<SortKey>,
    state: Mutex<SortState>,
    output: Arc<SortedOutput>,
}

impl SortSink {
    /// Sorts by `keys` into `output`.
    #[must_use]
    pub fn new(keys: Vec<SortKey>, output: Arc<SortedOutput>) -> Self {
        Self {
            keys,
            state: Mutex::new(SortState::default()),
            output,
        }
    }

    fn spill_run(&self, state: &mut SortState, ctx: &ExecutionContext) -> OperatorResult {
        let Some(spill) = ctx.spill() else {
            return Ok(());
        };
        let mut rows = std::mem::take(&mut state.rows);
        rows.sort_by(|a, b| compare_rows(&self.keys, a, b));
        let mut file = spill.create_file("sort")?;
        for row in &rows {
            file.write_row(row)?;
        }
        file.finish(spill)?;
        tracing::debug!(rows = rows.len(), bytes = file.bytes(), run = state.runs.len(), "sort spilled a run");
        state.runs.push(file);
        if let Some(grant) = state.grant.as_mut() {
            grant.shrink(grant.size());
        }
        Ok(())
    }
}

impl Sink for SortSink {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext) -> OperatorResult {
        let bytes = chunk.estimated_size();
        let mut state = self.state.lock();
        if state.types.is_none() {
            state.types = Some(chunk.types());
        }
        let grew = state
            .grant
            .get_or_insert_with(|| ctx.execution_grant())
            .try_grow(bytes);
        if !grew {
            if ctx.spill().is_none() {
                return Err(OperatorError::ResourceExhausted {
                    context: "Sort".to_string(),
                    requested: bytes,
                    available: ctx.memory().available().unwrap_or(0),
                });
            }
            self.spill_run(&mut state, ctx)?;
            // A chunk larger than the whole budget is kept uncharged.
            if let Some(grant) = state.grant.as_mut() {
                let _ = grant.try_grow(bytes);
            }
        }
        state.rows.extend(chunk.rows());
        Ok(())
    }

    fn finalize(&self, _ctx: &ExecutionContext) -> OperatorResult {
        let mut state = self.state.lock();
        let mut rows = std::mem::take(&mut state.rows);
        rows.sort_by(|a, b| compare_rows(&self.keys, a, b));
        let runs = std::mem::take(&mut state.runs);
        let spilled: usize = runs.iter().map(SpillFile::rows).sum();
        let total = rows.len() + spilled;

        let mut cursors = Vec::with_capacity(runs.len() + 1);
        for file in runs {
            let reader = file.reader()?;
            cursors.push(RunCursor::file(file, reader)?);
        }
        cursors.push(RunCursor::memory(rows));
        let stream = MergeStream {
            keys: self.keys.clone(),
            cursors,
            _grant: state.grant.take(),
        };
        self.output
            .set(state.types.take().unwrap_or_default(), total, stream);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Sort"
    }
}

enum RunSource {
    Memory(std::vec::IntoIter<Vec<Cell>>),
    File(SpillReader, SpillFile),
}

struct RunCursor {
    source: RunSource,
    head: Option<Vec<Cell>>,
}

impl RunCursor {
    fn memory(rows: Vec<Vec<Cell>>) -> Self {
        let mut iter = rows.into_iter();
        let head = iter.next();
        Self {
            source: RunSource::Memory(iter),
            head,
        }
    }

    fn file(file: SpillFile, mut reader: SpillReader) -> OperatorResult<Self> {
        let head = reader.next().transpose()?;
        Ok(Self {
            source: RunSource::File(reader, file),
            head,
        })
    }

    fn advance(&mut self) -> OperatorResult<Option<Vec<Cell>>> {
        let next = match &mut self.source {
            RunSource::Memory(iter) => iter.next(),
            RunSource::File(reader, _) => reader.next().transpose()?,
        };
        Ok(std::mem::replace(&mut self.head, next))
    }
}

/// K-way merge over sorted runs.
struct MergeStream {
    keys: Vec<SortKey>,
    cursors: Vec<RunCursor>,
    _grant: Option<MemoryGrant>,
}

impl MergeStream {
    fn next_row(&mut self) -> OperatorResult<Option<Vec<Cell>>> {
        let mut best: Option<usize> = None;
        for (i, cursor) in self.cursors.iter().enumerate() {
            let Some(head) = &cursor.head else { continue };
            let better = match best.and_then(|b| self.cursors[b].head.as_ref()) {
                Some(current) => compare_rows(&self.keys, head, current) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some(i);
            }
        }
        match best {
            Some(i) => self.cursors[i].advance(),
            None => Ok(None),
        }
    }
}

/// The sorted result of a [`SortSink`], read back row by row or chunk by
/// chunk.
#[derive(Default)]
pub struct SortedOutput {
    types: Mutex<Vec<LogicalType>>,
    stream: Mutex<Option<MergeStream>>,
    rows: AtomicUsize,
}

impl SortedOutput {
    /// An empty output, filled when the sort finalizes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, types: Vec<LogicalType>, rows: usize, stream: MergeStream) {
        *self.types.lock() = types;
        *self.stream.lock() = Some(stream);
        self.rows.store(rows, AtomicOrdering::Release);
    }

    /// Total sorted rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows.load(AtomicOrdering::Acquire)
    }

    /// Column types of the rows.
    #[must_use]
    pub fn types(&self) -> Vec<LogicalType> {
        self.types.lock().clone()
    }

    /// The next row in order.
    pub fn next_row(&self) -> OperatorResult<Option<Vec<Cell>>> {
        match self.stream.lock().as_mut() {
            Some(stream) => stream.next_row(),
            None => Ok(None),
        }
    }

    /// Up to `max_rows` next rows as a chunk.
    pub fn next_chunk(&self, max_rows: usize) -> OperatorResult<Option<DataChunk>> {
        let types = self.types();
        let mut guard = self.stream.lock();
        let Some(stream) = guard.as_mut() else {
            return Ok(None);
        };
        let mut chunk = DataChunk::with_capacity(&types, max_rows);
        while chunk.row_count() < max_rows {
            match stream.next_row()? {
                Some(row) => chunk.push_row(row),
                None => break,
            }
        }
        Ok((!chunk.is_empty()).then_some(chunk))
    }
}

/// Streams a [`SortedOutput`] in order. The pipeline runs on one worker.
pub struct SortedSource {
    output: Arc<SortedOutput>,
}

impl SortedSource {
    /// Reads `output`.
    #[must_use]
    pub fn new(output: Arc<SortedOutput>) -> Self {
        Self { output }
    }
}

impl Source for SortedSource {
    fn morsel_count(&self, ctx: &ExecutionContext) -> OperatorResult<usize> {
        Ok(self.output.rows().div_ceil(ctx.morsel_size()))
    }

    fn produce(&self, _morsel: usize, ctx: &ExecutionContext) -> OperatorResult<Option<DataChunk>> {
        self.output.next_chunk(ctx.morsel_size())
    }

    fn is_ordered(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "SortedScan"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::spill::SpillManager;
    use crate::execution::vector::ValueVector;
    use crate::graph::lpg::LpgStore;
    use quiver_common::memory::BufferManager;
    use quiver_common::mvcc::Snapshot;
    use quiver_common::types::{EpochId, Value};

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(LpgStore::new()), Snapshot::committed(EpochId::new(0)))
    }

    fn chunk(values: &[Option<i64>]) -> DataChunk {
        DataChunk::from_columns(vec![ValueVector::from_values(
            LogicalType::Int64,
            values.iter().map(|v| v.map_or(Value::Null, Value::Int64)).collect(),
        )])
    }

    fn drain(output: &SortedOutput) -> Vec<Value> {
        std::iter::from_fn(|| output.next_row().unwrap())
            .map(|row| row[0].to_value())
            .collect()
    }

    #[test]
    fn test_sort_ascending_nulls_last() {
        let ctx = ctx();
        let output = Arc::new(SortedOutput::new());
        let sink = SortSink::new(vec![SortKey::ascending(0)], Arc::clone(&output));
        sink.consume(chunk(&[Some(3), None, Some(1)]), &ctx).unwrap();
        sink.consume(chunk(&[Some(2)]), &ctx).unwrap();
        sink.finalize(&ctx).unwrap();
        assert_eq!(output.rows(), 4);
        assert_eq!(
            drain(&output),
            vec![Value::Int64(1), Value::Int64(2), Value::Int64(3), Value::Null]
        );
    }

    #[test]
    fn test_sort_descending() {
        let ctx = ctx();
        let output = Arc::new(SortedOutput::new());
        let sink = SortSink::new(vec![SortKey::descending(0)], Arc::clone(&output));
        sink.consume(chunk(&[Some(1), Some(5), None]), &ctx).unwrap();
        sink.finalize(&ctx).unwrap();
        assert_eq!(drain(&output), vec![Value::Null, Value::Int64(5), Value::Int64(1)]);
    }

    #[test]
    fn test_external_merge_under_small_budget() {
        let ctx = ctx()
            .with_memory(BufferManager::with_budget(4_096))
            .with_spill(Arc::new(SpillManager::temporary().unwrap()));
        let output = Arc::new(SortedOutput::new());
        let sink = SortSink::new(vec![SortKey::ascending(0)], Arc::clone(&output));
        for batch in 0..20 {
            let values: Vec<Option<i64>> = (0..50).map(|i| Some((i * 37 + batch * 11) % 1000)).collect();
            sink.consume(chunk(&values), &ctx).unwrap();
        }
        sink.finalize(&ctx).unwrap();
        assert!(ctx.query_stats().spill_files > 0);
        let sorted = drain(&output);
        assert_eq!(sorted.len(), 1000);
        assert!(sorted.windows(2).all(|w| w[0].total_cmp(&w[1]) != Ordering::Greater));
    }

    #[test]
    fn test_exhausted_without_spill() {
        let ctx = ctx().with_memory(BufferManager::with_budget(64));
        let sink = SortSink::new(vec![SortKey::ascending(0)], Arc::new(SortedOutput::new()));
        let err = sink.consume(chunk(&[Some(1); 100]), &ctx).unwrap_err();
        assert!(matches!(err, OperatorError::ResourceExhausted { .. }));
    }
}
