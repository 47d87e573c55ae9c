//! Edge traversal.

use quiver_common::types::{EdgeId, NodeId};

use super::{OperatorError, OperatorResult};
use crate::execution::chunk::{DEFAULT_CHUNK_SIZE, DataChunk};
use crate::execution::context::ExecutionContext;
use crate::execution::pipeline::PushOperator;
use crate::execution::vector::ValueVector;
use crate::graph::Direction;

/// Expands each input row along the edges of a node column.
///
/// Every output row is the input row followed by the edge (if requested)
/// and the neighbor. Rows whose node has no matching edge are dropped;
/// rows whose node column is null expand to nothing.
pub struct ExpandOperator {
    source_column: usize,
    edge_type: Option<String>,
    direction: Direction,
    emit_edge: bool,
    target_label: Option<String>,
}

impl ExpandOperator {
    /// Expands `source_column` in `direction`, along edges of `edge_type`
    /// if given.
    #[must_use]
    pub fn new(source_column: usize, edge_type: Option<String>, direction: Direction) -> Self {
        Self {
            source_column,
            edge_type,
            direction,
            emit_edge: true,
            target_label: None,
        }
    }

    /// Omits the edge column from the output.
    #[must_use]
    pub fn without_edge_column(mut self) -> Self {
        self.emit_edge = false;
        self
    }

    /// Keeps only neighbors with `label`.
    #[must_use]
    pub fn with_target_label(mut self, label: impl Into<String>) -> Self {
        self.target_label = Some(label.into());
        self
    }

    fn flush(
        &self,
        chunk: &DataChunk,
        rows: &mut Vec<usize>,
        edges: &mut Vec<EdgeId>,
        targets: &mut Vec<NodeId>,
        out: &mut Vec<DataChunk>,
    ) {
        if rows.is_empty() {
            return;
        }
        let mut columns: Vec<ValueVector> = chunk
            .columns()
            .iter()
            .map(|c| c.take(rows.iter().copied()))
            .collect();
        if self.emit_edge {
            columns.push(ValueVector::from_edges(std::mem::take(edges)));
        }
        columns.push(ValueVector::from_nodes(std::mem::take(targets)));
        let count = rows.len();
        rows.clear();
        edges.clear();
        out.push(if columns.is_empty() {
            DataChunk::rows_only(count)
        } else {
            DataChunk::from_columns(columns)
        });
    }
}

impl PushOperator for ExpandOperator {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext, out: &mut Vec<DataChunk>) -> OperatorResult {
        let store = ctx.store();
        let snapshot = ctx.snapshot();
        let column = chunk
            .column(self.source_column)
            .ok_or(OperatorError::ColumnNotFound(self.source_column))?;
        let target_label = match &self.target_label {
            Some(name) => match store.label_id(name) {
                Some(id) => Some(id),
                None => return Ok(()),
            },
            None => None,
        };

        let mut rows = Vec::new();
        let mut edges = Vec::new();
        let mut targets = Vec::new();
        for row in 0..chunk.row_count() {
            let Some(node) = column.get_node_id(row) else {
                continue;
            };
            for (edge, target) in store.neighbors(node, self.edge_type.as_deref(), self.direction, snapshot) {
                if let Some(label) = target_label {
                    let has_label = store
                        .node_label_ids(target, snapshot)
                        .is_some_and(|labels| labels.contains(&label));
                    if !has_label {
                        continue;
                    }
                }
                rows.push(row);
                edges.push(edge);
                targets.push(target);
            }
            if rows.len() >= DEFAULT_CHUNK_SIZE {
                self.flush(&chunk, &mut rows, &mut edges, &mut targets, out);
            }
        }
        self.flush(&chunk, &mut rows, &mut edges, &mut targets, out);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Expand"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::lpg::LpgStore;
    use quiver_common::mvcc::{Snapshot, WriteSet};
    use quiver_common::types::{EpochId, TxId};
    use std::sync::Arc;

    fn triangle() -> (ExecutionContext, Vec<NodeId>) {
        let store = LpgStore::new();
        let snap = Snapshot::new(EpochId::new(0), TxId::new(1));
        let mut ws = WriteSet::new();
        let a = store.create_node(&snap, &mut ws, &["Person"], vec![]).unwrap();
        let b = store.create_node(&snap, &mut ws, &["Person"], vec![]).unwrap();
        let c = store.create_node(&snap, &mut ws, &["City"], vec![]).unwrap();
        store.create_edge(&snap, &mut ws, a, b, "KNOWS", vec![]).unwrap();
        store.create_edge(&snap, &mut ws, a, c, "LIVES_IN", vec![]).unwrap();
        store.create_edge(&snap, &mut ws, b, c, "LIVES_IN", vec![]).unwrap();
        (ExecutionContext::new(Arc::new(store), snap), vec![a, b, c])
    }

    fn expand(op: &ExpandOperator, ctx: &ExecutionContext, nodes: Vec<NodeId>) -> Vec<DataChunk> {
        let mut out = Vec::new();
        op.consume(DataChunk::from_columns(vec![ValueVector::from_nodes(nodes)]), ctx, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_expand_outgoing_typed() {
        let (ctx, n) = triangle();
        let op = ExpandOperator::new(0, Some("LIVES_IN".into()), Direction::Outgoing);
        let out = expand(&op, &ctx, vec![n[0], n[1]]);
        assert_eq!(out[0].row_count(), 2);
        assert_eq!(out[0].column_count(), 3);
        assert_eq!(out[0].column(2).unwrap().node_ids(), Some(&[n[2], n[2]][..]));
    }

    #[test]
    fn test_expand_incoming_without_edge() {
        let (ctx, n) = triangle();
        let op = ExpandOperator::new(0, None, Direction::Incoming).without_edge_column();
        let out = expand(&op, &ctx, vec![n[2]]);
        assert_eq!(out[0].column_count(), 2);
        let mut sources = out[0].column(1).unwrap().node_ids().unwrap().to_vec();
        sources.sort();
        assert_eq!(sources, vec![n[0], n[1]]);
    }

    #[test]
    fn test_expand_target_label() {
        let (ctx, n) = triangle();
        let op = ExpandOperator::new(0, None, Direction::Outgoing).with_target_label("City");
        let out = expand(&op, &ctx, vec![n[0]]);
        assert_eq!(out[0].row_count(), 1);
    }
}
