//! Statistics gathered from the store for the optimizer.

use std::collections::BTreeMap;

use quiver_common::mvcc::Snapshot;
use quiver_common::types::{NodeId, PropertyKey, Value, ValueKey};
use quiver_common::utils::hash::{FxHashMap, FxHashSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::histogram::Histogram;
use crate::graph::lpg::LpgStore;
use crate::index::zone_map::CompareOp;

/// Buckets per property histogram.
const HISTOGRAM_BUCKETS: usize = 32;

/// Selectivity assumed when nothing is known about a predicate.
const DEFAULT_SELECTIVITY: f64 = 0.1;

/// Node count for one label.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LabelStatistics {
    /// Visible nodes carrying the label.
    pub row_count: u64,
}

/// Counts for one edge type.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeTypeStatistics {
    /// Visible edges of this type.
    pub count: u64,
    /// Average outgoing edges of this type per source node that has any.
    pub avg_out_degree: f64,
    /// Average incoming edges of this type per target node that has any.
    pub avg_in_degree: f64,
}

/// Statistics for one node property.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Distinct non-null values.
    pub distinct_count: u64,
    /// Nodes without the property.
    pub null_count: u64,
    /// Nodes with the property.
    pub non_null_count: u64,
    /// Smallest value, if the values are mutually comparable.
    pub min: Option<Value>,
    /// Largest value, if the values are mutually comparable.
    pub max: Option<Value>,
    /// Equi-depth histogram of the non-null values.
    pub histogram: Option<Histogram>,
}

impl ColumnStatistics {
    /// Builds statistics from the values of every visible node.
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        let mut stats = Self::default();
        let mut distinct: FxHashSet<ValueKey> = FxHashSet::default();
        let mut comparable = true;
        for value in &values {
            if value.is_null() {
                stats.null_count += 1;
                continue;
            }
            stats.non_null_count += 1;
            distinct.insert(ValueKey(value.clone()));
            if !comparable {
                continue;
            }
            match (&stats.min, &stats.max) {
                (Some(min), Some(max)) => match (value.compare(min), value.compare(max)) {
                    (Some(lo), Some(hi)) => {
                        if lo.is_lt() {
                            stats.min = Some(value.clone());
                        }
                        if hi.is_gt() {
                            stats.max = Some(value.clone());
                        }
                    }
                    _ => {
                        comparable = false;
                        stats.min = None;
                        stats.max = None;
                    }
                },
                _ => {
                    stats.min = Some(value.clone());
                    stats.max = Some(value.clone());
                }
            }
        }
        stats.distinct_count = distinct.len() as u64;
        if stats.non_null_count > 0 {
            stats.histogram = Some(Histogram::build(values, HISTOGRAM_BUCKETS));
        }
        stats
    }

    /// Total rows observed, null or not.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.null_count + self.non_null_count
    }

    /// Estimated fraction of all rows satisfying `column <op> value`. Rows
    /// without the property never satisfy a comparison.
    #[must_use]
    pub fn selectivity(&self, op: CompareOp, value: &Value) -> f64 {
        let rows = self.row_count();
        if rows == 0 || value.is_null() {
            return 0.0;
        }
        let present = self.non_null_count as f64 / rows as f64;
        let within = match (&self.histogram, op) {
            (Some(h), _) if !h.is_empty() => h.selectivity(op, value),
            (_, CompareOp::Eq) => 1.0 / self.distinct_count.max(1) as f64,
            (_, CompareOp::Ne) => 1.0 - 1.0 / self.distinct_count.max(1) as f64,
            _ => DEFAULT_SELECTIVITY * 3.0,
        };
        (present * within).clamp(0.0, 1.0)
    }

    /// Fraction of rows that have the property.
    #[must_use]
    pub fn non_null_fraction(&self) -> f64 {
        let rows = self.row_count();
        if rows == 0 {
            0.0
        } else {
            self.non_null_count as f64 / rows as f64
        }
    }
}

/// A statistics snapshot of the whole graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Visible nodes.
    pub total_nodes: u64,
    /// Visible edges.
    pub total_edges: u64,
    /// Per-label counts.
    pub labels: BTreeMap<String, LabelStatistics>,
    /// Per-edge-type counts and fan-out.
    pub edge_types: BTreeMap<String, EdgeTypeStatistics>,
    /// Per-property column statistics over all nodes.
    pub columns: BTreeMap<PropertyKey, ColumnStatistics>,
}

impl Statistics {
    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects statistics from everything visible at `snapshot`.
    #[must_use]
    pub fn collect(store: &LpgStore, snapshot: &Snapshot) -> Self {
        let mut stats = Self {
            total_nodes: store.node_count(None, snapshot) as u64,
            ..Self::default()
        };
        for label in store.label_names() {
            let row_count = store.node_count(Some(&label), snapshot) as u64;
            if row_count > 0 {
                stats
                    .labels
                    .insert(label.to_string(), LabelStatistics { row_count });
            }
        }

        let mut per_type: FxHashMap<String, (u64, FxHashSet<NodeId>, FxHashSet<NodeId>)> =
            FxHashMap::default();
        for edge in store.scan_edges(None, snapshot) {
            let entry = per_type.entry(edge.edge_type.to_string()).or_default();
            entry.0 += 1;
            entry.1.insert(edge.src);
            entry.2.insert(edge.dst);
            stats.total_edges += 1;
        }
        for (name, (count, sources, targets)) in per_type {
            stats.edge_types.insert(
                name,
                EdgeTypeStatistics {
                    count,
                    avg_out_degree: count as f64 / sources.len().max(1) as f64,
                    avg_in_degree: count as f64 / targets.len().max(1) as f64,
                },
            );
        }

        let columns: Vec<(PropertyKey, ColumnStatistics)> = store
            .node_property_keys()
            .into_par_iter()
            .map(|key| {
                let column = ColumnStatistics::from_values(store.node_property_values(&key, snapshot));
                (key, column)
            })
            .filter(|(_, column)| column.non_null_count > 0)
            .collect();
        stats.columns.extend(columns);
        tracing::debug!(
            nodes = stats.total_nodes,
            edges = stats.total_edges,
            labels = stats.labels.len(),
            columns = stats.columns.len(),
            "statistics collected"
        );
        stats
    }

    /// Sets the count for a label.
    #[must_use]
    pub fn with_label(mut self, label: &str, row_count: u64) -> Self {
        self.labels
            .insert(label.to_string(), LabelStatistics { row_count });
        self
    }

    /// Sets the statistics of an edge type.
    #[must_use]
    pub fn with_edge_type(mut self, edge_type: &str, stats: EdgeTypeStatistics) -> Self {
        self.edge_types.insert(edge_type.to_string(), stats);
        self
    }

    /// Sets the statistics of a property.
    #[must_use]
    pub fn with_column(mut self, key: impl Into<PropertyKey>, stats: ColumnStatistics) -> Self {
        self.columns.insert(key.into(), stats);
        self
    }

    /// Node count for a label, or every node for `None`. Unknown labels
    /// count as empty.
    #[must_use]
    pub fn label_count(&self, label: Option<&str>) -> u64 {
        match label {
            Some(label) => self.labels.get(label).map_or(0, |l| l.row_count),
            None => self.total_nodes,
        }
    }

    /// Statistics of a property, if collected.
    #[must_use]
    pub fn column(&self, key: &PropertyKey) -> Option<&ColumnStatistics> {
        self.columns.get(key)
    }

    /// Average fan-out when expanding outgoing (or incoming) edges of a
    /// type, or over all types.
    #[must_use]
    pub fn avg_fanout(&self, edge_type: Option<&str>, incoming: bool) -> f64 {
        let degree = |s: &EdgeTypeStatistics| {
            if incoming {
                s.avg_in_degree
            } else {
                s.avg_out_degree
            }
        };
        match edge_type {
            Some(t) => self.edge_types.get(t).map_or(0.0, degree),
            None if self.total_nodes > 0 => self.total_edges as f64 / self.total_nodes as f64,
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_common::mvcc::WriteSet;
    use quiver_common::types::{EpochId, TxId};

    #[test]
    fn test_collect_from_store() {
        let store = LpgStore::new();
        let snap = Snapshot::new(EpochId::new(0), TxId::new(1));
        let mut ws = WriteSet::new();
        let mut people = Vec::new();
        for age in [30, 25, 41, 25] {
            people.push(
                store
                    .create_node(&snap, &mut ws, &["Person"], vec![("age".into(), Value::Int64(age))])
                    .unwrap(),
            );
        }
        store.create_node(&snap, &mut ws, &["City"], vec![]).unwrap();
        store.create_edge(&snap, &mut ws, people[0], people[1], "KNOWS", vec![]).unwrap();
        store.create_edge(&snap, &mut ws, people[0], people[2], "KNOWS", vec![]).unwrap();
        store.commit(snap.tx_id, EpochId::new(1), &ws);

        let stats = Statistics::collect(&store, &Snapshot::committed(EpochId::new(1)));
        assert_eq!(stats.total_nodes, 5);
        assert_eq!(stats.label_count(Some("Person")), 4);
        assert_eq!(stats.label_count(Some("Robot")), 0);
        assert_eq!(stats.edge_types["KNOWS"].count, 2);
        assert_eq!(stats.edge_types["KNOWS"].avg_out_degree, 2.0);
        assert_eq!(stats.edge_types["KNOWS"].avg_in_degree, 1.0);

        let age = stats.column(&"age".into()).unwrap();
        assert_eq!(age.distinct_count, 3);
        assert_eq!(age.null_count, 1);
        assert_eq!(age.min, Some(Value::Int64(25)));
        assert_eq!(age.max, Some(Value::Int64(41)));
    }

    #[test]
    fn test_selectivity_counts_missing_properties() {
        let mut values: Vec<Value> = (0..50).map(Value::Int64).collect();
        values.extend(std::iter::repeat_n(Value::Null, 50));
        let stats = ColumnStatistics::from_values(values);
        let s = stats.selectivity(CompareOp::Ge, &Value::Int64(25));
        assert!((s - 0.25).abs() < 0.05, "got {s}");
        assert_eq!(stats.selectivity(CompareOp::Eq, &Value::Null), 0.0);
    }

    #[test]
    fn test_mixed_types_have_no_range() {
        let stats = ColumnStatistics::from_values(vec![Value::Int64(1), Value::from("x")]);
        assert_eq!(stats.min, None);
        assert_eq!(stats.distinct_count, 2);
    }
}
