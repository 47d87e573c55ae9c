//! DISTINCT.

use hashbrown::HashSet;
use parking_lot::Mutex;
use quiver_common::memory::MemoryGrant;

use super::{OperatorError, OperatorResult};
use crate::execution::chunk::DataChunk;
use crate::execution::context::ExecutionContext;
use crate::execution::pipeline::PushOperator;
use crate::execution::selection::SelectionVector;
use crate::execution::vector::{Cell, CellKey};

struct Seen {
    keys: HashSet<Vec<CellKey>>,
    grant: MemoryGrant,
}

/// Streams the first occurrence of each distinct row.
///
/// Rows are compared on `columns` (all columns if empty) with query
/// equality, so `1` and `1.0` are duplicates.
pub struct DistinctOperator {
    columns: Vec<usize>,
    seen: Mutex<Option<Seen>>,
}

impl DistinctOperator {
    /// Deduplicates on `columns`, or on whole rows if empty.
    #[must_use]
    pub fn new(columns: Vec<usize>) -> Self {
        Self {
            columns,
            seen: Mutex::new(None),
        }
    }

    fn key(&self, chunk: &DataChunk, row: usize) -> Vec<CellKey> {
        if self.columns.is_empty() {
            chunk.row(row).iter().map(Cell::key).collect()
        } else {
            self.columns
                .iter()
                .filter_map(|c| chunk.column(*c).and_then(|v| v.get_cell(row)))
                .map(|cell| cell.key())
                .collect()
        }
    }
}

impl PushOperator for DistinctOperator {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext, out: &mut Vec<DataChunk>) -> OperatorResult {
        let keys: Vec<Vec<CellKey>> = (0..chunk.row_count()).map(|r| self.key(&chunk, r)).collect();
        let mut selection = SelectionVector::new();
        let mut guard = self.seen.lock();
        let seen = guard.get_or_insert_with(|| Seen {
            keys: HashSet::new(),
            grant: ctx.execution_grant(),
        });
        for (row, key) in keys.into_iter().enumerate() {
            if seen.keys.contains(&key) {
                continue;
            }
            let bytes = key.len() * std::mem::size_of::<CellKey>() + 32;
            if !seen.grant.try_grow(bytes) {
                return Err(OperatorError::ResourceExhausted {
                    context: "Distinct".to_string(),
                    requested: bytes,
                    available: ctx.memory().available().unwrap_or(0),
                });
            }
            seen.keys.insert(key);
            selection.push(row);
        }
        drop(guard);
        if selection.len() == chunk.row_count() {
            out.push(chunk);
        } else if !selection.is_empty() {
            out.push(chunk.select(&selection));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Distinct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::vector::ValueVector;
    use crate::graph::lpg::LpgStore;
    use quiver_common::mvcc::Snapshot;
    use quiver_common::types::{EpochId, LogicalType, Value};
    use std::sync::Arc;

    #[test]
    fn test_distinct_across_chunks_and_numeric_types() {
        let ctx = ExecutionContext::new(Arc::new(LpgStore::new()), Snapshot::committed(EpochId::new(0)));
        let op = DistinctOperator::new(vec![]);
        let chunk = |values: Vec<Value>| DataChunk::from_columns(vec![ValueVector::from_values(LogicalType::Any, values)]);
        let mut out = Vec::new();
        op.consume(chunk(vec![Value::Int64(1), Value::Int64(2), Value::Int64(1)]), &ctx, &mut out)
            .unwrap();
        op.consume(chunk(vec![Value::Float64(2.0), Value::Int64(3)]), &ctx, &mut out)
            .unwrap();
        let total: usize = out.iter().map(DataChunk::row_count).sum();
        assert_eq!(total, 3);
    }
}
