//! Cardinality estimation for query optimization.
//!
//! Estimates the number of rows produced by each operator from the
//! [`Statistics`] collected over the store: label counts, edge-type
//! fan-out, and per-property distinct counts and histograms. Predicates are
//! assumed independent.

use std::sync::Arc;

use quiver_common::types::{PropertyKey, Value};
use quiver_core::Direction;
use quiver_core::statistics::Statistics;

use crate::query::plan::{BinaryOp, LogicalExpression, UnaryOp};

/// Cardinality estimator.
#[derive(Debug, Clone)]
pub struct CardinalityEstimator {
    stats: Arc<Statistics>,
    /// Selectivity of a predicate nothing is known about.
    default_selectivity: f64,
}

impl CardinalityEstimator {
    /// Creates an estimator over `stats`.
    #[must_use]
    pub fn new(stats: Arc<Statistics>) -> Self {
        Self {
            stats,
            default_selectivity: 0.1,
        }
    }

    /// The underlying statistics.
    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Rows produced by scanning nodes with `label` (all nodes for `None`).
    #[must_use]
    pub fn node_scan(&self, label: Option<&str>) -> f64 {
        self.stats.label_count(label) as f64
    }

    /// Rows produced by expanding `input` rows.
    #[must_use]
    pub fn expand(&self, input: f64, edge_type: Option<&str>, direction: Direction) -> f64 {
        let fanout = match direction {
            Direction::Outgoing => self.stats.avg_fanout(edge_type, false),
            Direction::Incoming => self.stats.avg_fanout(edge_type, true),
            Direction::Both => {
                self.stats.avg_fanout(edge_type, false) + self.stats.avg_fanout(edge_type, true)
            }
        };
        input * fanout
    }

    /// Rows of `input` satisfying `predicate`.
    #[must_use]
    pub fn filter(&self, input: f64, predicate: &LogicalExpression) -> f64 {
        input * self.selectivity(predicate)
    }

    /// Estimated fraction of rows satisfying `predicate` (0.0 to 1.0).
    #[must_use]
    pub fn selectivity(&self, predicate: &LogicalExpression) -> f64 {
        let s = match predicate {
            LogicalExpression::Binary { left, op, right } => match op {
                BinaryOp::And => self.selectivity(left) * self.selectivity(right),
                BinaryOp::Or => {
                    let (a, b) = (self.selectivity(left), self.selectivity(right));
                    a + b - a * b
                }
                _ => self.comparison_selectivity(left, *op, right),
            },
            LogicalExpression::Unary { op, operand } => match op {
                UnaryOp::Not => 1.0 - self.selectivity(operand),
                UnaryOp::IsNull => self.null_fraction(operand).unwrap_or(0.05),
                UnaryOp::IsNotNull => 1.0 - self.null_fraction(operand).unwrap_or(0.05),
                UnaryOp::Neg => self.default_selectivity,
            },
            LogicalExpression::Literal(Value::Bool(b)) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            LogicalExpression::Literal(Value::Null) => 0.0,
            _ => self.default_selectivity,
        };
        s.clamp(0.0, 1.0)
    }

    fn comparison_selectivity(
        &self,
        left: &LogicalExpression,
        op: BinaryOp,
        right: &LogicalExpression,
    ) -> f64 {
        if let Some(cmp) = op.as_compare() {
            let with_stats = match (left, right) {
                (LogicalExpression::Property { property, .. }, LogicalExpression::Literal(v)) => {
                    self.column_selectivity(property, cmp, v)
                }
                (LogicalExpression::Literal(v), LogicalExpression::Property { property, .. }) => {
                    self.column_selectivity(property, cmp.flip(), v)
                }
                _ => None,
            };
            if let Some(s) = with_stats {
                return s;
            }
        }
        match op {
            BinaryOp::Eq => 0.01,
            BinaryOp::Ne => 0.99,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 0.33,
            BinaryOp::StartsWith | BinaryOp::EndsWith | BinaryOp::Contains | BinaryOp::Regex => {
                0.1
            }
            BinaryOp::In => match right {
                LogicalExpression::List(items) => (items.len() as f64 * 0.01).min(1.0),
                _ => self.default_selectivity,
            },
            _ => self.default_selectivity,
        }
    }

    fn column_selectivity(
        &self,
        property: &str,
        op: quiver_core::index::zone_map::CompareOp,
        value: &Value,
    ) -> Option<f64> {
        let column = self.stats.column(&PropertyKey::new(property))?;
        Some(column.selectivity(op, value))
    }

    fn null_fraction(&self, operand: &LogicalExpression) -> Option<f64> {
        let LogicalExpression::Property { property, .. } = operand else {
            return None;
        };
        let column = self.stats.column(&PropertyKey::new(property.as_str()))?;
        let present = self.stats.total_nodes.max(column.row_count()) as f64;
        (present > 0.0).then(|| 1.0 - column.non_null_count as f64 / present)
    }

    /// Distinct values of `expression` over a relation of `rows` rows.
    #[must_use]
    pub fn distinct_values(&self, expression: &LogicalExpression, rows: f64) -> f64 {
        let ndv = match expression {
            LogicalExpression::Property { property, .. } => self
                .stats
                .column(&PropertyKey::new(property.as_str()))
                .map_or(rows, |c| c.distinct_count as f64),
            LogicalExpression::Literal(_) => 1.0,
            _ => rows,
        };
        ndv.min(rows).max(1.0)
    }

    /// Selectivity of the equality `left = right` between relations of
    /// `left_rows` and `right_rows` rows: `1 / max(ndv(left), ndv(right))`.
    #[must_use]
    pub fn join_selectivity(
        &self,
        left: &LogicalExpression,
        left_rows: f64,
        right: &LogicalExpression,
        right_rows: f64,
    ) -> f64 {
        let ndv = self
            .distinct_values(left, left_rows)
            .max(self.distinct_values(right, right_rows));
        1.0 / ndv.max(1.0)
    }

    /// Groups produced by aggregating `input` rows on `keys`.
    #[must_use]
    pub fn aggregate(&self, input: f64, keys: &[&LogicalExpression]) -> f64 {
        if keys.is_empty() {
            return 1.0;
        }
        let groups: f64 = keys.iter().map(|k| self.distinct_values(k, input)).product();
        groups.min(input).max(1.0)
    }

    /// Rows left after removing duplicates.
    #[must_use]
    pub fn distinct(&self, input: f64) -> f64 {
        (input * 0.5).max(input.min(1.0))
    }
}

impl Default for CardinalityEstimator {
    fn default() -> Self {
        Self::new(Arc::new(Statistics::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::statistics::{ColumnStatistics, EdgeTypeStatistics};
    use LogicalExpression as E;

    fn estimator() -> CardinalityEstimator {
        let ages: Vec<Value> = (0..100).map(|i| Value::Int64(20 + i % 50)).collect();
        let stats = Statistics {
            total_nodes: 150,
            total_edges: 300,
            ..Statistics::new()
        }
        .with_label("Person", 100)
        .with_label("City", 50)
        .with_edge_type(
            "KNOWS",
            EdgeTypeStatistics {
                count: 300,
                avg_out_degree: 3.0,
                avg_in_degree: 4.0,
            },
        )
        .with_column("age", ColumnStatistics::from_values(ages));
        CardinalityEstimator::new(Arc::new(stats))
    }

    #[test]
    fn test_node_scan_with_stats() {
        let est = estimator();
        assert!((est.node_scan(Some("Person")) - 100.0).abs() < 1e-9);
        assert!((est.node_scan(None) - 150.0).abs() < 1e-9);
        assert!(est.node_scan(Some("Missing")).abs() < 1e-9);
    }

    #[test]
    fn test_expand_uses_fanout() {
        let est = estimator();
        assert!((est.expand(10.0, Some("KNOWS"), Direction::Outgoing) - 30.0).abs() < 1e-9);
        assert!((est.expand(10.0, Some("KNOWS"), Direction::Incoming) - 40.0).abs() < 1e-9);
        assert!((est.expand(10.0, Some("KNOWS"), Direction::Both) - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_equality_selectivity_from_distinct_count() {
        let est = estimator();
        let s = est.selectivity(&E::property("n", "age").eq(E::literal(30)));
        // 50 distinct ages, each held by 2 of 100 nodes.
        assert!(s > 0.005 && s < 0.05, "selectivity {s}");
    }

    #[test]
    fn test_range_selectivity_from_histogram() {
        let est = estimator();
        let low = est.selectivity(&E::property("n", "age").lt(E::literal(25)));
        let high = est.selectivity(&E::property("n", "age").lt(E::literal(60)));
        assert!(low < high);
        // Literal on the left flips the comparison.
        let flipped = est.selectivity(&E::literal(25).gt(E::property("n", "age")));
        assert!((flipped - low).abs() < 1e-9);
    }

    #[test]
    fn test_boolean_combinations() {
        let est = estimator();
        let a = E::property("n", "name").eq(E::literal("x"));
        let b = E::property("n", "city").eq(E::literal("y"));
        let and = est.selectivity(&a.clone().and(b.clone()));
        let or = est.selectivity(&a.clone().or(b));
        assert!((and - 0.0001).abs() < 1e-9);
        assert!((or - 0.0199).abs() < 1e-9);
        assert!((est.selectivity(&a.not()) - 0.99).abs() < 1e-9);
        assert!((est.selectivity(&E::literal(false))).abs() < 1e-9);
    }

    #[test]
    fn test_join_selectivity() {
        let est = estimator();
        // Node identity: ndv is the relation size.
        let s = est.join_selectivity(&E::variable("a"), 100.0, &E::variable("b"), 10.0);
        assert!((s - 0.01).abs() < 1e-9);
        // Property join bounded by the distinct count.
        let s = est.join_selectivity(&E::property("a", "age"), 1000.0, &E::variable("b"), 10.0);
        assert!((s - 1.0 / 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_groups() {
        let est = estimator();
        assert!((est.aggregate(100.0, &[]) - 1.0).abs() < 1e-9);
        let key = E::property("n", "age");
        assert!((est.aggregate(100.0, &[&key]) - 50.0).abs() < 1e-9);
        assert!((est.aggregate(10.0, &[&key]) - 10.0).abs() < 1e-9);
    }
}
