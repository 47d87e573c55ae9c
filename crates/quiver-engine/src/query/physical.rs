//! Physical plans.
//!
//! The optimizer's output: a tree of concrete operator choices, each node
//! annotated with its estimated output rows, the cumulative cost of its
//! subtree, its output column names, and the ordering it guarantees.

use std::fmt;
use std::ops::Bound;

use quiver_common::types::PropertyKey;
use quiver_core::Direction;
use quiver_core::execution::{IndexLookup, ZonePredicate};

use crate::query::optimizer::Cost;
use crate::query::plan::{AggregateExpr, LogicalExpression, Projection, SortKey, SortOrder};

/// A physical plan.
#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    /// The root operator.
    pub root: PhysicalNode,
    /// Result columns, in the order the query wrote them.
    output: Vec<String>,
}

impl PhysicalPlan {
    /// Creates a plan.
    #[must_use]
    pub fn new(root: PhysicalNode) -> Self {
        let output = root.columns.clone();
        Self { root, output }
    }

    /// Reports results as `columns`, a permutation or subset of the root's
    /// columns. Join reordering can permute the root's columns.
    #[must_use]
    pub fn with_output(mut self, columns: Vec<String>) -> Self {
        self.output = columns;
        self
    }

    /// Result column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.output
    }

    /// Estimated cost of the whole plan.
    #[must_use]
    pub fn cost(&self) -> Cost {
        self.root.cost
    }

    /// Estimated output rows.
    #[must_use]
    pub fn rows(&self) -> f64 {
        self.root.rows
    }

    /// Visits every node, parents before children.
    pub fn walk(&self, visit: &mut impl FnMut(&PhysicalNode)) {
        self.root.walk(visit);
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt_tree(f, 0)
    }
}

/// One operator and its estimates.
#[derive(Debug, Clone)]
pub struct PhysicalNode {
    /// The operator.
    pub operator: PhysicalOperator,
    /// Estimated output rows.
    pub rows: f64,
    /// Cost of this node plus its inputs.
    pub cost: Cost,
    /// Output column names, in order.
    pub columns: Vec<String>,
    /// Expressions the output is sorted on, ascending. Empty when no order
    /// is guaranteed.
    pub ordering: Vec<LogicalExpression>,
}

/// Physical operators.
#[derive(Debug, Clone)]
pub enum PhysicalOperator {
    /// Scans nodes, skipping blocks the zone predicates rule out.
    NodeScan {
        /// Bound variable.
        variable: String,
        /// Label filter.
        label: Option<String>,
        /// Zone-map checks; a filter above re-checks them per row.
        zone_predicates: Vec<ZonePredicate>,
    },
    /// Finds nodes through a property index.
    IndexSeek {
        /// Bound variable.
        variable: String,
        /// Label filter.
        label: Option<String>,
        /// Indexed property.
        key: PropertyKey,
        /// Equality or range.
        lookup: IndexLookup,
    },
    /// Follows edges from a node column.
    Expand {
        /// Input.
        input: Box<PhysicalNode>,
        /// Source variable.
        from_variable: String,
        /// Edge variable, if the edge is kept.
        edge_variable: Option<String>,
        /// Target variable.
        to_variable: String,
        /// Edge type filter.
        edge_type: Option<String>,
        /// Direction.
        direction: Direction,
        /// Target label filter.
        to_label: Option<String>,
    },
    /// Keeps rows satisfying a predicate.
    Filter {
        /// Input.
        input: Box<PhysicalNode>,
        /// Predicate.
        predicate: LogicalExpression,
    },
    /// Computes output columns.
    Project {
        /// Input.
        input: Box<PhysicalNode>,
        /// Projections, named by [`Projection::name`].
        projections: Vec<Projection>,
    },
    /// Builds a hash table over `build`, then streams `probe` through it.
    /// Output columns are probe columns followed by build columns.
    HashJoin {
        /// Side held in memory.
        build: Box<PhysicalNode>,
        /// Streamed side.
        probe: Box<PhysicalNode>,
        /// Key expressions over the build side.
        build_keys: Vec<LogicalExpression>,
        /// Key expressions over the probe side, pairwise equal to `build_keys`.
        probe_keys: Vec<LogicalExpression>,
    },
    /// Merges two inputs sorted ascending on their keys.
    MergeJoin {
        /// Left input.
        left: Box<PhysicalNode>,
        /// Right input.
        right: Box<PhysicalNode>,
        /// Left key expressions.
        left_keys: Vec<LogicalExpression>,
        /// Right key expressions.
        right_keys: Vec<LogicalExpression>,
    },
    /// Pairs every outer row with every buffered inner row.
    NestedLoopJoin {
        /// Streamed side.
        outer: Box<PhysicalNode>,
        /// Buffered side.
        inner: Box<PhysicalNode>,
        /// Condition over the combined row.
        predicate: Option<LogicalExpression>,
    },
    /// Probes a property index once per outer row.
    IndexNestedLoopJoin {
        /// Streamed side.
        outer: Box<PhysicalNode>,
        /// Key evaluated per outer row.
        outer_key: LogicalExpression,
        /// Variable bound to the matched nodes.
        variable: String,
        /// Label filter on matched nodes.
        label: Option<String>,
        /// Indexed property.
        key: PropertyKey,
    },
    /// Hash aggregation. Output is the group columns, then the aggregates.
    Aggregate {
        /// Input.
        input: Box<PhysicalNode>,
        /// Grouping expressions.
        group_by: Vec<Projection>,
        /// Aggregates.
        aggregates: Vec<AggregateExpr>,
    },
    /// Full sort.
    Sort {
        /// Input.
        input: Box<PhysicalNode>,
        /// Sort keys.
        keys: Vec<SortKey>,
    },
    /// Removes duplicate rows.
    Distinct {
        /// Input.
        input: Box<PhysicalNode>,
    },
    /// Stops after `count` rows.
    Limit {
        /// Input.
        input: Box<PhysicalNode>,
        /// Row count.
        count: usize,
    },
    /// Drops the first `count` rows.
    Skip {
        /// Input.
        input: Box<PhysicalNode>,
        /// Row count.
        count: usize,
    },
    /// Produces nothing.
    Empty,
}

impl PhysicalOperator {
    /// Operator name, for plan printing.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeScan { .. } => "NodeScan",
            Self::IndexSeek { .. } => "IndexSeek",
            Self::Expand { .. } => "Expand",
            Self::Filter { .. } => "Filter",
            Self::Project { .. } => "Project",
            Self::HashJoin { .. } => "HashJoin",
            Self::MergeJoin { .. } => "MergeJoin",
            Self::NestedLoopJoin { .. } => "NestedLoopJoin",
            Self::IndexNestedLoopJoin { .. } => "IndexNestedLoopJoin",
            Self::Aggregate { .. } => "Aggregate",
            Self::Sort { .. } => "Sort",
            Self::Distinct { .. } => "Distinct",
            Self::Limit { .. } => "Limit",
            Self::Skip { .. } => "Skip",
            Self::Empty => "Empty",
        }
    }

    /// Returns true for the join operators.
    #[must_use]
    pub fn is_join(&self) -> bool {
        matches!(
            self,
            Self::HashJoin { .. }
                | Self::MergeJoin { .. }
                | Self::NestedLoopJoin { .. }
                | Self::IndexNestedLoopJoin { .. }
        )
    }
}

impl PhysicalNode {
    /// Input nodes, left to right.
    #[must_use]
    pub fn children(&self) -> Vec<&PhysicalNode> {
        match &self.operator {
            PhysicalOperator::NodeScan { .. }
            | PhysicalOperator::IndexSeek { .. }
            | PhysicalOperator::Empty => Vec::new(),
            PhysicalOperator::Expand { input, .. }
            | PhysicalOperator::Filter { input, .. }
            | PhysicalOperator::Project { input, .. }
            | PhysicalOperator::Aggregate { input, .. }
            | PhysicalOperator::Sort { input, .. }
            | PhysicalOperator::Distinct { input }
            | PhysicalOperator::Limit { input, .. }
            | PhysicalOperator::Skip { input, .. } => vec![input],
            PhysicalOperator::HashJoin { build, probe, .. } => vec![build, probe],
            PhysicalOperator::MergeJoin { left, right, .. } => vec![left, right],
            PhysicalOperator::NestedLoopJoin { outer, inner, .. } => vec![outer, inner],
            PhysicalOperator::IndexNestedLoopJoin { outer, .. } => vec![outer],
        }
    }

    /// Visits this node and its descendants, parents first.
    pub fn walk(&self, visit: &mut impl FnMut(&PhysicalNode)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Variables bound by the leaves of this subtree.
    #[must_use]
    pub fn leaf_variables(&self) -> Vec<String> {
        let mut vars = Vec::new();
        self.walk(&mut |node| match &node.operator {
            PhysicalOperator::NodeScan { variable, .. }
            | PhysicalOperator::IndexSeek { variable, .. }
            | PhysicalOperator::IndexNestedLoopJoin { variable, .. } => vars.push(variable.clone()),
            _ => {}
        });
        vars
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.operator.name(), indent = depth * 2)?;
        match &self.operator {
            PhysicalOperator::NodeScan {
                variable,
                label,
                zone_predicates,
            } => {
                write!(f, " {variable}")?;
                if let Some(label) = label {
                    write!(f, ":{label}")?;
                }
                if !zone_predicates.is_empty() {
                    write!(f, " zone[{}]", zone_predicates.len())?;
                }
            }
            PhysicalOperator::IndexSeek {
                variable,
                label,
                key,
                lookup,
            } => {
                write!(f, " {variable}")?;
                if let Some(label) = label {
                    write!(f, ":{label}")?;
                }
                match lookup {
                    IndexLookup::Equals(v) => write!(f, " {variable}.{key} = {v}")?,
                    IndexLookup::Range(lo, hi) => {
                        write!(f, " {variable}.{key} in ")?;
                        match lo {
                            Bound::Included(v) => write!(f, "[{v}")?,
                            Bound::Excluded(v) => write!(f, "({v}")?,
                            Bound::Unbounded => write!(f, "(*")?,
                        }
                        match hi {
                            Bound::Included(v) => write!(f, ", {v}]")?,
                            Bound::Excluded(v) => write!(f, ", {v})")?,
                            Bound::Unbounded => write!(f, ", *)")?,
                        }
                    }
                }
            }
            PhysicalOperator::Expand {
                from_variable,
                edge_variable,
                to_variable,
                edge_type,
                direction,
                ..
            } => write!(
                f,
                " ({from_variable})-[{}:{}]-({to_variable}) {direction:?}",
                edge_variable.as_deref().unwrap_or(""),
                edge_type.as_deref().unwrap_or("*"),
            )?,
            PhysicalOperator::Filter { predicate, .. } => write!(f, " {predicate}")?,
            PhysicalOperator::Project { projections, .. } => {
                let names: Vec<String> = projections.iter().map(Projection::name).collect();
                write!(f, " {}", names.join(", "))?;
            }
            PhysicalOperator::HashJoin {
                build_keys,
                probe_keys,
                ..
            } => write!(f, " {}", fmt_keys(probe_keys, build_keys))?,
            PhysicalOperator::MergeJoin {
                left_keys,
                right_keys,
                ..
            } => write!(f, " {}", fmt_keys(left_keys, right_keys))?,
            PhysicalOperator::NestedLoopJoin { predicate, .. } => {
                if let Some(p) = predicate {
                    write!(f, " {p}")?;
                }
            }
            PhysicalOperator::IndexNestedLoopJoin {
                outer_key,
                variable,
                key,
                ..
            } => write!(f, " {variable}.{key} = {outer_key}")?,
            PhysicalOperator::Aggregate {
                group_by,
                aggregates,
                ..
            } => {
                let names: Vec<String> = group_by
                    .iter()
                    .map(Projection::name)
                    .chain(aggregates.iter().map(AggregateExpr::name))
                    .collect();
                write!(f, " {}", names.join(", "))?;
            }
            PhysicalOperator::Sort { keys, .. } => {
                let keys: Vec<String> = keys
                    .iter()
                    .map(|k| match k.order {
                        SortOrder::Ascending => k.expression.to_string(),
                        SortOrder::Descending => format!("{} DESC", k.expression),
                    })
                    .collect();
                write!(f, " {}", keys.join(", "))?;
            }
            PhysicalOperator::Limit { count, .. } | PhysicalOperator::Skip { count, .. } => {
                write!(f, " {count}")?;
            }
            PhysicalOperator::Distinct { .. } | PhysicalOperator::Empty => {}
        }
        writeln!(f, " (rows={:.1}, cost={:.2})", self.rows, self.cost.total())?;
        for child in self.children() {
            child.fmt_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

fn fmt_keys(left: &[LogicalExpression], right: &[LogicalExpression]) -> String {
    left.iter()
        .zip(right)
        .map(|(l, r)| format!("{l} = {r}"))
        .collect::<Vec<_>>()
        .join(" AND ")
}
