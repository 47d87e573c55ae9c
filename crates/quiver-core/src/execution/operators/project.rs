//! Project operator for selecting and computing columns.

use super::OperatorResult;
use crate::execution::chunk::DataChunk;
use crate::execution::context::ExecutionContext;
use crate::execution::expression::Expression;
use crate::execution::pipeline::PushOperator;
use crate::execution::vector::ValueVector;
use quiver_common::types::LogicalType;

/// Evaluates one expression per output column. Plain column references
/// are copied as-is, so node and edge columns stay entity references.
pub struct ProjectOperator {
    projections: Vec<Expression>,
    output_types: Vec<LogicalType>,
}

impl ProjectOperator {
    /// Creates a new project operator.
    #[must_use]
    pub fn new(projections: Vec<Expression>, output_types: Vec<LogicalType>) -> Self {
        debug_assert_eq!(projections.len(), output_types.len());
        Self {
            projections,
            output_types,
        }
    }

    /// Keeps only `columns`, in the given order.
    #[must_use]
    pub fn select_columns(columns: Vec<usize>, types: Vec<LogicalType>) -> Self {
        Self::new(columns.into_iter().map(Expression::Column).collect(), types)
    }
}

impl PushOperator for ProjectOperator {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext, out: &mut Vec<DataChunk>) -> OperatorResult {
        if self.projections.is_empty() {
            out.push(DataChunk::rows_only(chunk.row_count()));
            return Ok(());
        }
        let eval = ctx.eval();
        let mut columns = Vec::with_capacity(self.projections.len());
        for (expr, ty) in self.projections.iter().zip(&self.output_types) {
            let column = match expr {
                Expression::Column(i) => chunk
                    .column(*i)
                    .cloned()
                    .ok_or(super::OperatorError::ColumnNotFound(*i))?,
                other => {
                    let values = other
                        .evaluate(&chunk, &eval)
                        .map_err(|e| e.in_operator(self.name()))?;
                    ValueVector::from_values(*ty, values)
                }
            };
            columns.push(column);
        }
        out.push(DataChunk::from_columns(columns));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Project"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::expression::BinaryOp;
    use crate::graph::lpg::LpgStore;
    use quiver_common::mvcc::{Snapshot, WriteSet};
    use quiver_common::types::{EpochId, NodeId, PropertyKey, TxId, Value};
    use std::sync::Arc;

    #[test]
    fn test_project_property_and_arithmetic() {
        let store = LpgStore::new();
        let snap = Snapshot::new(EpochId::new(0), TxId::new(1));
        let mut ws = WriteSet::new();
        let alix = store
            .create_node(&snap, &mut ws, &["Person"], vec![(PropertyKey::new("age"), Value::Int64(30))])
            .unwrap();
        let ctx = ExecutionContext::new(Arc::new(store), snap);

        let project = ProjectOperator::new(
            vec![
                Expression::Column(0),
                Expression::binary(
                    Expression::property(0, "age"),
                    BinaryOp::Add,
                    Expression::Literal(Value::Int64(1)),
                ),
            ],
            vec![LogicalType::Node, LogicalType::Int64],
        );
        let chunk = DataChunk::from_columns(vec![ValueVector::from_nodes(vec![alix])]);
        let mut out = Vec::new();
        project.consume(chunk, &ctx, &mut out).unwrap();
        assert_eq!(out[0].column(0).unwrap().get_node_id(0), Some(alix));
        assert_eq!(out[0].column(1).unwrap().get_value(0), Some(Value::Int64(31)));
        assert_ne!(alix, NodeId::INVALID);
    }
}
