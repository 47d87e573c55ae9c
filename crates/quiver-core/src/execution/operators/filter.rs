//! Filter operator for applying predicates.

use super::OperatorResult;
use crate::execution::chunk::DataChunk;
use crate::execution::context::ExecutionContext;
use crate::execution::expression::Expression;
use crate::execution::pipeline::PushOperator;

/// Keeps the rows for which the predicate is `true`. `false` and `NULL`
/// drop the row; any other value fails the query.
pub struct FilterOperator {
    predicate: Expression,
}

impl FilterOperator {
    /// Creates a new filter operator.
    #[must_use]
    pub fn new(predicate: Expression) -> Self {
        Self { predicate }
    }

    /// The predicate.
    #[must_use]
    pub fn predicate(&self) -> &Expression {
        &self.predicate
    }
}

impl PushOperator for FilterOperator {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext, out: &mut Vec<DataChunk>) -> OperatorResult {
        let selection = self
            .predicate
            .evaluate_predicate(&chunk, &ctx.eval())
            .map_err(|e| e.in_operator(self.name()))?;
        if selection.is_empty() {
            return Ok(());
        }
        if selection.len() == chunk.row_count() {
            out.push(chunk);
        } else {
            out.push(chunk.select(&selection));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Filter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::expression::BinaryOp;
    use crate::execution::operators::OperatorError;
    use crate::execution::vector::ValueVector;
    use crate::graph::lpg::LpgStore;
    use quiver_common::mvcc::Snapshot;
    use quiver_common::types::{EpochId, LogicalType, Value};
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(LpgStore::new()), Snapshot::committed(EpochId::new(0)))
    }

    fn ints(values: &[i64]) -> DataChunk {
        DataChunk::from_columns(vec![ValueVector::from_values(
            LogicalType::Int64,
            values.iter().map(|v| Value::Int64(*v)).collect(),
        )])
    }

    #[test]
    fn test_filter_comparison() {
        let filter = FilterOperator::new(Expression::binary(
            Expression::Column(0),
            BinaryOp::Gt,
            Expression::Literal(Value::Int64(25)),
        ));
        let mut out = Vec::new();
        filter.consume(ints(&[10, 20, 30, 40, 50]), &ctx(), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].row_count(), 3);
        assert_eq!(out[0].column(0).unwrap().get_value(0), Some(Value::Int64(30)));
    }

    #[test]
    fn test_filter_drops_empty_output() {
        let filter = FilterOperator::new(Expression::binary(
            Expression::Column(0),
            BinaryOp::Lt,
            Expression::Literal(Value::Int64(0)),
        ));
        let mut out = Vec::new();
        filter.consume(ints(&[1, 2]), &ctx(), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_non_boolean_predicate_fails() {
        let filter = FilterOperator::new(Expression::Column(0));
        let err = filter.consume(ints(&[1]), &ctx(), &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            OperatorError::TypeMismatch { ref context, .. } if context == "Filter(#0)"
        ));
    }
}
