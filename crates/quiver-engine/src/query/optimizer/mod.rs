//! Query optimizer.
//!
//! Turns a logical plan into a costed physical plan.
//!
//! ## Optimization Rules
//!
//! - **Filter Pushdown**: Pushes filter conjuncts as close to the scans as
//!   their variables allow
//! - **Access Paths**: Turns filters over node scans into index seeks and
//!   zone-map checks
//! - **Join Reordering**: Flattens each join region into a join graph and
//!   orders it with DPccp, falling back to a greedy order for large or
//!   disconnected graphs
//! - **Join Operators**: Chooses hash, merge, nested-loop or index
//!   nested-loop joins by cost
//!
//! ## Submodules
//!
//! - [`cost`] - Cost model for estimating operator costs
//! - [`cardinality`] - Cardinality estimation for query operators
//! - [`join_order`] - DPccp join ordering algorithm

pub mod cardinality;
pub mod cost;
pub mod join_order;

pub use cardinality::CardinalityEstimator;
pub use cost::{Cost, CostModel};
pub use join_order::{BitSet, DPccp, JoinGraph, JoinPlanSpace, exhaustive, greedy};

use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

use quiver_common::types::{PropertyKey, Value};
use quiver_common::utils::error::{Error, Result};
use quiver_common::utils::hash::{FxHashMap, FxHashSet};
use quiver_core::IndexKind;
use quiver_core::execution::{IndexLookup, ZonePredicate};
use quiver_core::index::zone_map::CompareOp;
use quiver_core::statistics::Statistics;

use crate::query::physical::{PhysicalNode, PhysicalOperator, PhysicalPlan};
use crate::query::plan::{
    FilterOp, LogicalExpression, LogicalOperator, LogicalPlan, NodeScanOp, Projection, SortKey,
    SortOrder,
};

/// Query optimizer that turns logical plans into physical plans.
pub struct Optimizer {
    /// Whether to enable filter pushdown.
    enable_filter_pushdown: bool,
    /// Whether to enable join reordering.
    enable_join_reorder: bool,
    /// Cost model for estimation.
    cost_model: CostModel,
    /// Cardinality estimator.
    card_estimator: CardinalityEstimator,
    /// Property indexes available for seeks.
    indexes: FxHashMap<PropertyKey, IndexKind>,
    /// Join regions with more relations use the greedy order.
    max_dp_relations: usize,
    /// csg-cmp pairs DPccp may enumerate before giving up.
    dp_pair_budget: usize,
}

impl Optimizer {
    /// Creates a new optimizer with default settings and no statistics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enable_filter_pushdown: true,
            enable_join_reorder: true,
            cost_model: CostModel::new(),
            card_estimator: CardinalityEstimator::default(),
            indexes: FxHashMap::default(),
            max_dp_relations: 12,
            dp_pair_budget: 100_000,
        }
    }

    /// Estimates with `stats`.
    #[must_use]
    pub fn with_statistics(mut self, stats: Arc<Statistics>) -> Self {
        self.card_estimator = CardinalityEstimator::new(stats);
        self
    }

    /// Makes the given property indexes available to the planner.
    #[must_use]
    pub fn with_indexes(mut self, indexes: impl IntoIterator<Item = (PropertyKey, IndexKind)>) -> Self {
        self.indexes.extend(indexes);
        self
    }

    /// Enables or disables filter pushdown.
    #[must_use]
    pub fn with_filter_pushdown(mut self, enabled: bool) -> Self {
        self.enable_filter_pushdown = enabled;
        self
    }

    /// Enables or disables join reordering. Without it, joins run in the
    /// order written, with the cheapest operator for each.
    #[must_use]
    pub fn with_join_reorder(mut self, enabled: bool) -> Self {
        self.enable_join_reorder = enabled;
        self
    }

    /// Sets the cost model.
    #[must_use]
    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    /// Join regions with more than `n` relations are ordered greedily.
    #[must_use]
    pub fn with_max_dp_relations(mut self, n: usize) -> Self {
        self.max_dp_relations = n;
        self
    }

    /// Caps the csg-cmp pairs DPccp may enumerate.
    #[must_use]
    pub fn with_dp_pair_budget(mut self, pairs: usize) -> Self {
        self.dp_pair_budget = pairs;
        self
    }

    /// Returns a reference to the cost model.
    #[must_use]
    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    /// Returns a reference to the cardinality estimator.
    #[must_use]
    pub fn cardinality_estimator(&self) -> &CardinalityEstimator {
        &self.card_estimator
    }

    /// Optimizes a logical plan into a physical plan.
    ///
    /// # Errors
    ///
    /// Returns an error if a join region has more than 64 relations.
    pub fn optimize(&self, plan: LogicalPlan) -> Result<PhysicalPlan> {
        let output = plan.output_columns();
        let mut root = plan.root;

        if self.enable_filter_pushdown {
            root = self.push_filters_down(root);
        }

        let physical = PhysicalPlan::new(self.plan_operator(root)?).with_output(output);
        tracing::debug!(
            rows = physical.rows(),
            cost = physical.cost().total(),
            "optimized plan:\n{physical}"
        );
        Ok(physical)
    }

    /// Pushes filters down the operator tree.
    ///
    /// Each conjunct of a filter travels separately, as far down as the
    /// variables it reads are bound.
    pub(crate) fn push_filters_down(&self, op: LogicalOperator) -> LogicalOperator {
        match op {
            LogicalOperator::Filter(filter) => {
                let optimized_input = self.push_filters_down(*filter.input);
                filter
                    .predicate
                    .into_conjuncts()
                    .into_iter()
                    .fold(optimized_input, |op, conjunct| {
                        self.try_push_filter_into(conjunct, op)
                    })
            }
            LogicalOperator::Project(mut proj) => {
                proj.input = Box::new(self.push_filters_down(*proj.input));
                LogicalOperator::Project(proj)
            }
            LogicalOperator::Limit(mut limit) => {
                limit.input = Box::new(self.push_filters_down(*limit.input));
                LogicalOperator::Limit(limit)
            }
            LogicalOperator::Skip(mut skip) => {
                skip.input = Box::new(self.push_filters_down(*skip.input));
                LogicalOperator::Skip(skip)
            }
            LogicalOperator::Sort(mut sort) => {
                sort.input = Box::new(self.push_filters_down(*sort.input));
                LogicalOperator::Sort(sort)
            }
            LogicalOperator::Distinct(mut distinct) => {
                distinct.input = Box::new(self.push_filters_down(*distinct.input));
                LogicalOperator::Distinct(distinct)
            }
            LogicalOperator::Expand(mut expand) => {
                expand.input = Box::new(self.push_filters_down(*expand.input));
                LogicalOperator::Expand(expand)
            }
            LogicalOperator::Join(mut join) => {
                join.left = Box::new(self.push_filters_down(*join.left));
                join.right = Box::new(self.push_filters_down(*join.right));
                LogicalOperator::Join(join)
            }
            LogicalOperator::Aggregate(mut agg) => {
                agg.input = Box::new(self.push_filters_down(*agg.input));
                LogicalOperator::Aggregate(agg)
            }
            other => other,
        }
    }

    /// Tries to push a filter predicate into the given operator.
    ///
    /// Returns either the predicate pushed into the operator, or a new
    /// Filter operator on top if the predicate cannot be pushed further.
    fn try_push_filter_into(
        &self,
        predicate: LogicalExpression,
        op: LogicalOperator,
    ) -> LogicalOperator {
        let keep = |predicate, op| {
            LogicalOperator::Filter(FilterOp {
                predicate,
                input: Box::new(op),
            })
        };
        let predicate_vars = predicate.variables();

        match op {
            // Computed columns do not exist below the projection.
            LogicalOperator::Project(mut proj) => {
                let computed = computed_aliases(&proj.projections);
                let bound_below = proj.input.output_variables();
                if predicate_vars.is_disjoint(&computed) && predicate_vars.is_subset(&bound_below) {
                    proj.input = Box::new(self.try_push_filter_into(predicate, *proj.input));
                    LogicalOperator::Project(proj)
                } else {
                    keep(predicate, LogicalOperator::Project(proj))
                }
            }

            LogicalOperator::Expand(mut expand) => {
                if predicate_vars.is_subset(&expand.input.output_variables()) {
                    expand.input = Box::new(self.try_push_filter_into(predicate, *expand.input));
                    LogicalOperator::Expand(expand)
                } else {
                    keep(predicate, LogicalOperator::Expand(expand))
                }
            }

            LogicalOperator::Join(mut join) => {
                let left_vars = join.left.output_variables();
                let right_vars = join.right.output_variables();
                let uses_left = predicate_vars.iter().any(|v| left_vars.contains(v));
                let uses_right = predicate_vars.iter().any(|v| right_vars.contains(v));

                if uses_left && !uses_right {
                    join.left = Box::new(self.try_push_filter_into(predicate, *join.left));
                    LogicalOperator::Join(join)
                } else if uses_right && !uses_left {
                    join.right = Box::new(self.try_push_filter_into(predicate, *join.right));
                    LogicalOperator::Join(join)
                } else {
                    keep(predicate, LogicalOperator::Join(join))
                }
            }

            // Row-wise filters commute with ordering and deduplication.
            LogicalOperator::Sort(mut sort) => {
                sort.input = Box::new(self.try_push_filter_into(predicate, *sort.input));
                LogicalOperator::Sort(sort)
            }
            LogicalOperator::Distinct(mut distinct) => {
                distinct.input = Box::new(self.try_push_filter_into(predicate, *distinct.input));
                LogicalOperator::Distinct(distinct)
            }

            LogicalOperator::Filter(mut filter) => {
                filter.input = Box::new(self.try_push_filter_into(predicate, *filter.input));
                LogicalOperator::Filter(filter)
            }

            // Limit, Skip and Aggregate change which rows exist; scans are
            // the bottom.
            other => keep(predicate, other),
        }
    }

    fn plan_operator(&self, op: LogicalOperator) -> Result<PhysicalNode> {
        match op {
            LogicalOperator::NodeScan(scan) => Ok(self.scan(scan, Vec::new())),
            LogicalOperator::Filter(filter) => {
                let (predicate, input) = merge_filters(filter);
                match input {
                    LogicalOperator::NodeScan(scan) => Ok(self.plan_access_path(scan, predicate)),
                    join @ LogicalOperator::Join(_) => {
                        self.plan_join_region(join, predicate.into_conjuncts())
                    }
                    other => {
                        let input = self.plan_operator(other)?;
                        Ok(self.filter(input, predicate))
                    }
                }
            }
            LogicalOperator::Expand(expand) => {
                let input = self.plan_operator(*expand.input)?;
                let mut rows = self.card_estimator.expand(
                    input.rows,
                    expand.edge_type.as_deref(),
                    expand.direction,
                );
                if let Some(label) = &expand.to_label {
                    let stats = self.card_estimator.statistics();
                    if stats.total_nodes > 0 {
                        rows *= stats.label_count(Some(label.as_str())) as f64 / stats.total_nodes as f64;
                    }
                }
                let cost = input.cost + self.cost_model.expand(input.rows, rows);
                let mut columns = input.columns.clone();
                columns.extend(expand.edge_variable.clone());
                columns.push(expand.to_variable.clone());
                Ok(PhysicalNode {
                    operator: PhysicalOperator::Expand {
                        input: Box::new(input),
                        from_variable: expand.from_variable,
                        edge_variable: expand.edge_variable,
                        to_variable: expand.to_variable,
                        edge_type: expand.edge_type,
                        direction: expand.direction,
                        to_label: expand.to_label,
                    },
                    rows,
                    cost,
                    columns,
                    ordering: Vec::new(),
                })
            }
            LogicalOperator::Project(project) => {
                let input = self.plan_operator(*project.input)?;
                let rows = input.rows;
                let cost = input.cost + self.cost_model.project(rows, project.projections.len());
                let columns = project.projections.iter().map(Projection::name).collect();
                Ok(PhysicalNode {
                    operator: PhysicalOperator::Project {
                        input: Box::new(input),
                        projections: project.projections,
                    },
                    rows,
                    cost,
                    columns,
                    ordering: Vec::new(),
                })
            }
            join @ LogicalOperator::Join(_) => self.plan_join_region(join, Vec::new()),
            LogicalOperator::Aggregate(agg) => {
                let input = self.plan_operator(*agg.input)?;
                let keys: Vec<&LogicalExpression> =
                    agg.group_by.iter().map(|p| &p.expression).collect();
                let rows = self.card_estimator.aggregate(input.rows, &keys);
                let cost = input.cost + self.cost_model.aggregate(input.rows, rows);
                let columns = agg
                    .group_by
                    .iter()
                    .map(Projection::name)
                    .chain(agg.aggregates.iter().map(|a| a.name()))
                    .collect();
                Ok(PhysicalNode {
                    operator: PhysicalOperator::Aggregate {
                        input: Box::new(input),
                        group_by: agg.group_by,
                        aggregates: agg.aggregates,
                    },
                    rows,
                    cost,
                    columns,
                    ordering: Vec::new(),
                })
            }
            LogicalOperator::Sort(sort) => {
                let input = self.plan_operator(*sort.input)?;
                Ok(self.sort(input, sort.keys))
            }
            LogicalOperator::Distinct(distinct) => {
                let input = self.plan_operator(*distinct.input)?;
                let rows = self.card_estimator.distinct(input.rows);
                let cost = input.cost + self.cost_model.distinct(input.rows, rows);
                Ok(PhysicalNode {
                    columns: input.columns.clone(),
                    ordering: input.ordering.clone(),
                    operator: PhysicalOperator::Distinct {
                        input: Box::new(input),
                    },
                    rows,
                    cost,
                })
            }
            LogicalOperator::Limit(limit) => {
                let input = self.plan_operator(*limit.input)?;
                let rows = input.rows.min(limit.count as f64);
                let cost = input.cost + self.cost_model.limit(rows);
                Ok(PhysicalNode {
                    columns: input.columns.clone(),
                    ordering: input.ordering.clone(),
                    operator: PhysicalOperator::Limit {
                        input: Box::new(input),
                        count: limit.count,
                    },
                    rows,
                    cost,
                })
            }
            LogicalOperator::Skip(skip) => {
                let input = self.plan_operator(*skip.input)?;
                let rows = (input.rows - skip.count as f64).max(0.0);
                let cost = input.cost + self.cost_model.limit(input.rows);
                Ok(PhysicalNode {
                    columns: input.columns.clone(),
                    ordering: input.ordering.clone(),
                    operator: PhysicalOperator::Skip {
                        input: Box::new(input),
                        count: skip.count,
                    },
                    rows,
                    cost,
                })
            }
            LogicalOperator::Empty => Ok(PhysicalNode {
                operator: PhysicalOperator::Empty,
                rows: 0.0,
                cost: Cost::zero(),
                columns: Vec::new(),
                ordering: Vec::new(),
            }),
        }
    }

    fn scan(&self, scan: NodeScanOp, zone_predicates: Vec<ZonePredicate>) -> PhysicalNode {
        let rows = self.card_estimator.node_scan(scan.label.as_deref());
        PhysicalNode {
            columns: vec![scan.variable.clone()],
            operator: PhysicalOperator::NodeScan {
                variable: scan.variable,
                label: scan.label,
                zone_predicates,
            },
            rows,
            cost: self.cost_model.scan(rows),
            ordering: Vec::new(),
        }
    }

    fn filter(&self, input: PhysicalNode, predicate: LogicalExpression) -> PhysicalNode {
        let rows = self.card_estimator.filter(input.rows, &predicate);
        let cost = input.cost + self.cost_model.filter(input.rows);
        PhysicalNode {
            columns: input.columns.clone(),
            ordering: input.ordering.clone(),
            operator: PhysicalOperator::Filter {
                input: Box::new(input),
                predicate,
            },
            rows,
            cost,
        }
    }

    fn sort(&self, input: PhysicalNode, keys: Vec<SortKey>) -> PhysicalNode {
        let ordering = if keys.iter().all(|k| k.order == SortOrder::Ascending) {
            keys.iter().map(|k| k.expression.clone()).collect()
        } else {
            Vec::new()
        };
        let rows = input.rows;
        let cost = input.cost + self.cost_model.sort(rows);
        PhysicalNode {
            columns: input.columns.clone(),
            operator: PhysicalOperator::Sort {
                input: Box::new(input),
                keys,
            },
            rows,
            cost,
            ordering,
        }
    }

    /// Sorts `input` ascending on `keys` unless it already is.
    fn sorted_on(&self, input: PhysicalNode, keys: &[LogicalExpression]) -> PhysicalNode {
        if input.ordering.starts_with(keys) {
            return input;
        }
        let keys = keys
            .iter()
            .map(|k| SortKey {
                expression: k.clone(),
                order: SortOrder::Ascending,
            })
            .collect();
        self.sort(input, keys)
    }

    /// Chooses between a full scan and an index seek for a filtered scan.
    ///
    /// Every conjunct comparing a property of the scanned variable with a
    /// constant becomes a zone-map check. An equality on any indexed
    /// property, or a range on a B-tree indexed one, may drive an index
    /// seek instead. The full predicate stays in a filter above either
    /// access path.
    fn plan_access_path(&self, scan: NodeScanOp, predicate: LogicalExpression) -> PhysicalNode {
        let base_rows = self.card_estimator.node_scan(scan.label.as_deref());
        let mut zone_predicates = Vec::new();
        let mut best_seek: Option<(PropertyKey, IndexLookup, f64)> = None;

        for conjunct in predicate.clone().into_conjuncts() {
            let Some((property, op, value)) = property_comparison(&conjunct, &scan.variable) else {
                continue;
            };
            let key = PropertyKey::new(property);
            zone_predicates.push(ZonePredicate {
                key: key.clone(),
                op,
                value: value.clone(),
            });
            let lookup = match (self.indexes.get(&key), op) {
                (Some(_), CompareOp::Eq) => IndexLookup::Equals(value),
                (Some(IndexKind::BTree), CompareOp::Lt) => {
                    IndexLookup::Range(Bound::Unbounded, Bound::Excluded(value))
                }
                (Some(IndexKind::BTree), CompareOp::Le) => {
                    IndexLookup::Range(Bound::Unbounded, Bound::Included(value))
                }
                (Some(IndexKind::BTree), CompareOp::Gt) => {
                    IndexLookup::Range(Bound::Excluded(value), Bound::Unbounded)
                }
                (Some(IndexKind::BTree), CompareOp::Ge) => {
                    IndexLookup::Range(Bound::Included(value), Bound::Unbounded)
                }
                _ => continue,
            };
            let selectivity = self.card_estimator.selectivity(&conjunct);
            if best_seek.as_ref().is_none_or(|(_, _, s)| selectivity < *s) {
                best_seek = Some((key, lookup, selectivity));
            }
        }

        let full_scan = self.scan(scan.clone(), zone_predicates);
        let access = match best_seek {
            Some((key, lookup, selectivity)) => {
                let matches = base_rows * selectivity;
                let seek_cost = self.cost_model.index_seek(base_rows, matches);
                if seek_cost.compare(&full_scan.cost) == Ordering::Less {
                    PhysicalNode {
                        columns: vec![scan.variable.clone()],
                        operator: PhysicalOperator::IndexSeek {
                            variable: scan.variable,
                            label: scan.label,
                            key,
                            lookup,
                        },
                        rows: matches,
                        cost: seek_cost,
                        ordering: Vec::new(),
                    }
                } else {
                    full_scan
                }
            }
            None => full_scan,
        };

        let rows = self.card_estimator.filter(base_rows, &predicate);
        let cost = access.cost + self.cost_model.filter(access.rows);
        PhysicalNode {
            columns: access.columns.clone(),
            ordering: Vec::new(),
            operator: PhysicalOperator::Filter {
                input: Box::new(access),
                predicate,
            },
            rows,
            cost,
        }
    }

    /// Plans a tree of joins, and the filters directly above them, as one
    /// region.
    fn plan_join_region(
        &self,
        op: LogicalOperator,
        mut predicates: Vec<LogicalExpression>,
    ) -> Result<PhysicalNode> {
        let mut inputs = Vec::new();
        flatten_joins(op, &mut inputs, &mut predicates);
        if inputs.len() > 64 {
            return Err(Error::Query(format!(
                "join of {} relations exceeds the limit of 64",
                inputs.len()
            )));
        }

        let variables: Vec<FxHashSet<String>> =
            inputs.iter().map(LogicalOperator::output_variables).collect();
        let owner = |vars: &FxHashSet<String>| {
            if vars.is_empty() {
                return None;
            }
            variables.iter().position(|rel| vars.is_subset(rel))
        };

        let mut local: Vec<Vec<LogicalExpression>> = vec![Vec::new(); inputs.len()];
        let mut pending = Vec::new();
        let mut residuals = Vec::new();
        for predicate in predicates {
            if let Some(i) = owner(&predicate.variables()) {
                local[i].push(predicate);
                continue;
            }
            let equi = match &predicate {
                LogicalExpression::Binary {
                    left,
                    op: crate::query::plan::BinaryOp::Eq,
                    right,
                } => match (owner(&left.variables()), owner(&right.variables())) {
                    (Some(l), Some(r)) if l != r => Some((l, r, (**left).clone(), (**right).clone())),
                    _ => None,
                },
                _ => None,
            };
            match equi {
                Some(edge) => pending.push(edge),
                None => residuals.push(predicate),
            }
        }

        let mut relations = Vec::with_capacity(inputs.len());
        for (input, filters) in inputs.into_iter().zip(local) {
            relations.push(self.relation(input, filters)?);
        }

        let mut graph = JoinGraph::new(relations.len());
        let edges: Vec<JoinEdge> = pending
            .into_iter()
            .map(|(left, right, left_key, right_key)| {
                graph.add_edge(left, right);
                let selectivity = self.card_estimator.join_selectivity(
                    &left_key,
                    relations[left].node.rows,
                    &right_key,
                    relations[right].node.rows,
                );
                JoinEdge {
                    left,
                    right,
                    left_key,
                    right_key,
                    selectivity,
                }
            })
            .collect();

        let space = JoinSpace {
            optimizer: self,
            relations: &relations,
            edges: &edges,
        };
        let best = if !self.enable_join_reorder {
            space.written_order()
        } else if relations.len() > self.max_dp_relations {
            tracing::warn!(
                relations = relations.len(),
                limit = self.max_dp_relations,
                "join region too large for DPccp, ordering greedily"
            );
            greedy(&graph, &space)
        } else {
            match DPccp::new(&graph)
                .with_pair_budget(self.dp_pair_budget)
                .solve(&space)
            {
                Some(plan) => Some(plan),
                None => {
                    if graph.is_connected(graph.all()) {
                        tracing::warn!(
                            budget = self.dp_pair_budget,
                            "DPccp pair budget exhausted, ordering greedily"
                        );
                    } else {
                        tracing::debug!("join graph is disconnected, ordering greedily");
                    }
                    greedy(&graph, &space)
                }
            }
        };

        let node = best.ok_or_else(|| Error::Internal("join enumeration produced no plan".into()))?;
        Ok(match LogicalExpression::conjunction(residuals) {
            Some(residual) => self.filter(node, residual),
            None => node,
        })
    }

    fn relation(&self, input: LogicalOperator, filters: Vec<LogicalExpression>) -> Result<Relation> {
        let input = match LogicalExpression::conjunction(filters) {
            Some(predicate) => LogicalOperator::Filter(FilterOp {
                predicate,
                input: Box::new(input),
            }),
            None => input,
        };
        let seek = match &input {
            LogicalOperator::NodeScan(scan) => Some(SeekTarget {
                variable: scan.variable.clone(),
                label: scan.label.clone(),
                filter: None,
            }),
            LogicalOperator::Filter(filter) => {
                let (predicate, inner) = merge_filters(filter.clone());
                match inner {
                    LogicalOperator::NodeScan(scan) => Some(SeekTarget {
                        variable: scan.variable,
                        label: scan.label,
                        filter: Some(predicate),
                    }),
                    _ => None,
                }
            }
            _ => None,
        };
        let base_rows = match &seek {
            Some(target) => self.card_estimator.node_scan(target.label.as_deref()),
            None => 0.0,
        };
        Ok(Relation {
            node: self.plan_operator(input)?,
            seek,
            base_rows,
        })
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// One input of a join region.
struct Relation {
    node: PhysicalNode,
    /// Set when the relation is a (filtered) node scan, which an index
    /// nested-loop join can replace with index probes.
    seek: Option<SeekTarget>,
    /// Rows of the unfiltered scan.
    base_rows: f64,
}

struct SeekTarget {
    variable: String,
    label: Option<String>,
    filter: Option<LogicalExpression>,
}

/// An equi-join predicate `left_key = right_key` between two relations.
struct JoinEdge {
    left: usize,
    right: usize,
    left_key: LogicalExpression,
    right_key: LogicalExpression,
    selectivity: f64,
}

struct JoinSpace<'a> {
    optimizer: &'a Optimizer,
    relations: &'a [Relation],
    edges: &'a [JoinEdge],
}

impl JoinSpace<'_> {
    /// Joins the relations left to right in the order written.
    fn written_order(&self) -> Option<PhysicalNode> {
        let mut plan = self.relations.first()?.node.clone();
        let mut covered = BitSet::singleton(0);
        for (i, relation) in self.relations.iter().enumerate().skip(1) {
            let right = BitSet::singleton(i);
            plan = self
                .join(&plan, covered, &relation.node, right)
                .into_iter()
                .min_by(|a, b| self.compare(a, b))?;
            covered = covered.union(right);
        }
        Some(plan)
    }

    fn indexed_key(&self, key: &LogicalExpression, variable: &str) -> Option<PropertyKey> {
        match key {
            LogicalExpression::Property {
                variable: v,
                property,
            } if v == variable => {
                let key = PropertyKey::new(property.as_str());
                self.optimizer.indexes.contains_key(&key).then_some(key)
            }
            _ => None,
        }
    }
}

impl JoinPlanSpace for JoinSpace<'_> {
    type Plan = PhysicalNode;

    fn leaf(&self, relation: usize) -> Vec<PhysicalNode> {
        vec![self.relations[relation].node.clone()]
    }

    fn join(
        &self,
        left: &PhysicalNode,
        left_set: BitSet,
        right: &PhysicalNode,
        right_set: BitSet,
    ) -> Vec<PhysicalNode> {
        let model = &self.optimizer.cost_model;
        let mut left_keys = Vec::new();
        let mut right_keys = Vec::new();
        let mut selectivity = 1.0;
        for edge in self.edges {
            if left_set.contains(edge.left) && right_set.contains(edge.right) {
                left_keys.push(edge.left_key.clone());
                right_keys.push(edge.right_key.clone());
            } else if left_set.contains(edge.right) && right_set.contains(edge.left) {
                left_keys.push(edge.right_key.clone());
                right_keys.push(edge.left_key.clone());
            } else {
                continue;
            }
            selectivity *= edge.selectivity;
        }

        let rows = left.rows * right.rows * selectivity;
        let mut columns = left.columns.clone();
        columns.extend(right.columns.iter().cloned());
        let inputs = left.cost + right.cost;
        let equalities = || {
            LogicalExpression::conjunction(
                left_keys
                    .iter()
                    .zip(&right_keys)
                    .map(|(l, r)| l.clone().eq(r.clone()))
                    .collect(),
            )
        };

        let mut plans = Vec::with_capacity(4);
        plans.push(PhysicalNode {
            operator: PhysicalOperator::NestedLoopJoin {
                outer: Box::new(left.clone()),
                inner: Box::new(right.clone()),
                predicate: equalities(),
            },
            rows,
            cost: inputs + model.nested_loop(left.rows, right.rows, rows),
            columns: columns.clone(),
            ordering: Vec::new(),
        });
        if left_keys.is_empty() {
            return plans;
        }

        plans.push(PhysicalNode {
            operator: PhysicalOperator::HashJoin {
                build: Box::new(right.clone()),
                probe: Box::new(left.clone()),
                build_keys: right_keys.clone(),
                probe_keys: left_keys.clone(),
            },
            rows,
            cost: inputs + model.hash_join(right.rows, left.rows, rows),
            columns: columns.clone(),
            ordering: Vec::new(),
        });

        let sorted_left = self.optimizer.sorted_on(left.clone(), &left_keys);
        let sorted_right = self.optimizer.sorted_on(right.clone(), &right_keys);
        plans.push(PhysicalNode {
            cost: sorted_left.cost
                + sorted_right.cost
                + model.merge_join(left.rows, right.rows, rows, true, true),
            operator: PhysicalOperator::MergeJoin {
                left: Box::new(sorted_left),
                right: Box::new(sorted_right),
                left_keys: left_keys.clone(),
                right_keys: right_keys.clone(),
            },
            rows,
            columns: columns.clone(),
            ordering: left_keys.clone(),
        });

        // Index nested loop replaces a base scan on the right with probes.
        if right_set.len() == 1
            && let Some(relation) = right_set.min().map(|i| &self.relations[i])
            && let Some(target) = &relation.seek
            && let Some((probe, key)) = right_keys
                .iter()
                .enumerate()
                .find_map(|(i, k)| self.indexed_key(k, &target.variable).map(|key| (i, key)))
        {
            let edge_selectivity = self
                .edges
                .iter()
                .find(|e| {
                    (e.left_key == right_keys[probe] && e.right_key == left_keys[probe])
                        || (e.right_key == right_keys[probe] && e.left_key == left_keys[probe])
                })
                .map_or(selectivity, |e| e.selectivity);
            let matched = left.rows * relation.base_rows * edge_selectivity;
            let probe_node = PhysicalNode {
                operator: PhysicalOperator::IndexNestedLoopJoin {
                    outer: Box::new(left.clone()),
                    outer_key: left_keys[probe].clone(),
                    variable: target.variable.clone(),
                    label: target.label.clone(),
                    key,
                },
                rows: matched,
                cost: left.cost + model.index_nested_loop(left.rows, relation.base_rows, matched),
                columns: columns.clone(),
                ordering: Vec::new(),
            };
            let rest: Vec<LogicalExpression> = target
                .filter
                .iter()
                .cloned()
                .chain(
                    left_keys
                        .iter()
                        .zip(&right_keys)
                        .enumerate()
                        .filter(|(i, _)| *i != probe)
                        .map(|(_, (l, r))| l.clone().eq(r.clone())),
                )
                .collect();
            plans.push(match LogicalExpression::conjunction(rest) {
                Some(predicate) => PhysicalNode {
                    cost: probe_node.cost + model.filter(matched),
                    columns: columns.clone(),
                    operator: PhysicalOperator::Filter {
                        input: Box::new(probe_node),
                        predicate,
                    },
                    rows,
                    ordering: Vec::new(),
                },
                None => PhysicalNode { rows, ..probe_node },
            });
        }

        plans
    }

    fn cost(&self, plan: &PhysicalNode) -> f64 {
        plan.cost.total()
    }

    fn rows(&self, plan: &PhysicalNode) -> f64 {
        plan.rows
    }

    fn compare(&self, a: &PhysicalNode, b: &PhysicalNode) -> Ordering {
        a.cost.compare(&b.cost)
    }

    fn dominates(&self, a: &PhysicalNode, b: &PhysicalNode) -> bool {
        self.compare(a, b) != Ordering::Greater
            && (b.ordering.is_empty() || a.ordering.starts_with(&b.ordering))
    }
}

/// Folds a chain of filters into one predicate over the first non-filter
/// input.
fn merge_filters(filter: FilterOp) -> (LogicalExpression, LogicalOperator) {
    let mut conjuncts = filter.predicate.into_conjuncts();
    let mut input = *filter.input;
    while let LogicalOperator::Filter(inner) = input {
        conjuncts.extend(inner.predicate.into_conjuncts());
        input = *inner.input;
    }
    let predicate = LogicalExpression::conjunction(conjuncts)
        .unwrap_or(LogicalExpression::Literal(Value::Bool(true)));
    (predicate, input)
}

fn flatten_joins(
    op: LogicalOperator,
    inputs: &mut Vec<LogicalOperator>,
    predicates: &mut Vec<LogicalExpression>,
) {
    match op {
        LogicalOperator::Join(join) => {
            predicates.extend(join.conditions.into_iter().map(|c| c.left.eq(c.right)));
            flatten_joins(*join.left, inputs, predicates);
            flatten_joins(*join.right, inputs, predicates);
        }
        LogicalOperator::Filter(filter) if matches!(*filter.input, LogicalOperator::Join(_)) => {
            predicates.extend(filter.predicate.into_conjuncts());
            flatten_joins(*filter.input, inputs, predicates);
        }
        other => inputs.push(other),
    }
}

/// Aliases naming something other than a pass-through variable.
fn computed_aliases(projections: &[Projection]) -> FxHashSet<String> {
    projections
        .iter()
        .filter_map(|p| match (&p.alias, &p.expression) {
            (Some(alias), LogicalExpression::Variable(v)) if v == alias => None,
            (Some(alias), _) => Some(alias.clone()),
            (None, _) => None,
        })
        .collect()
}

/// Matches `variable.property <op> constant` in either orientation.
fn property_comparison(
    expr: &LogicalExpression,
    variable: &str,
) -> Option<(String, CompareOp, Value)> {
    let LogicalExpression::Binary { left, op, right } = expr else {
        return None;
    };
    let cmp = op.as_compare()?;
    let (property, cmp, value) = match (left.as_ref(), right.as_ref()) {
        (LogicalExpression::Property { variable: v, property }, LogicalExpression::Literal(value)) => {
            (v == variable).then(|| (property.clone(), cmp, value.clone()))?
        }
        (LogicalExpression::Literal(value), LogicalExpression::Property { variable: v, property }) => {
            (v == variable).then(|| (property.clone(), cmp.flip(), value.clone()))?
        }
        _ => return None,
    };
    (!value.is_null()).then_some((property, cmp, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::{AggregateExpr, LogicalExpression as E};
    use quiver_core::Direction;
    use quiver_core::statistics::{ColumnStatistics, EdgeTypeStatistics};

    fn stats() -> Arc<Statistics> {
        let ages: Vec<Value> = (0..1000).map(|i| Value::Int64(i % 80)).collect();
        let ids: Vec<Value> = (0..1000).map(Value::Int64).collect();
        Arc::new(
            Statistics {
                total_nodes: 1110,
                total_edges: 5000,
                ..Statistics::new()
            }
            .with_label("Person", 1000)
            .with_label("City", 100)
            .with_label("Country", 10)
            .with_edge_type(
                "KNOWS",
                EdgeTypeStatistics {
                    count: 5000,
                    avg_out_degree: 5.0,
                    avg_in_degree: 5.0,
                },
            )
            .with_column("age", ColumnStatistics::from_values(ages))
            .with_column("id", ColumnStatistics::from_values(ids)),
        )
    }

    fn optimizer() -> Optimizer {
        Optimizer::new().with_statistics(stats())
    }

    fn find<'a>(node: &'a PhysicalNode, name: &str) -> Option<&'a PhysicalNode> {
        if node.operator.name() == name {
            return Some(node);
        }
        node.children().into_iter().find_map(|c| find(c, name))
    }

    #[test]
    fn test_filter_pushdown_through_expand() {
        let plan = LogicalOperator::node_scan("a", Some("Person"))
            .expand("a", Some("KNOWS"), Direction::Outgoing, "b")
            .filter(E::property("a", "age").gt(E::literal(30)))
            .into_plan();

        let optimized = optimizer().push_filters_down(plan.root);
        let LogicalOperator::Expand(expand) = &optimized else {
            panic!("expected Expand on top, got {}", optimized.name());
        };
        assert!(matches!(expand.input.as_ref(), LogicalOperator::Filter(_)));
    }

    #[test]
    fn test_filter_not_pushed_through_expand_for_target_var() {
        let plan = LogicalOperator::node_scan("a", Some("Person"))
            .expand("a", Some("KNOWS"), Direction::Outgoing, "b")
            .filter(E::property("b", "age").gt(E::literal(30)))
            .into_plan();

        let optimized = optimizer().push_filters_down(plan.root);
        assert!(matches!(optimized, LogicalOperator::Filter(_)));
    }

    #[test]
    fn test_conjuncts_split_across_expand() {
        let plan = LogicalOperator::node_scan("a", Some("Person"))
            .expand("a", Some("KNOWS"), Direction::Outgoing, "b")
            .filter(
                E::property("a", "age")
                    .gt(E::literal(30))
                    .and(E::property("b", "age").lt(E::literal(20))),
            )
            .into_plan();

        let optimized = optimizer().push_filters_down(plan.root);
        let LogicalOperator::Filter(top) = &optimized else {
            panic!("expected Filter on top");
        };
        assert_eq!(top.predicate.variables().len(), 1);
        assert!(top.predicate.variables().contains("b"));
        let LogicalOperator::Expand(expand) = top.input.as_ref() else {
            panic!("expected Expand");
        };
        assert!(matches!(expand.input.as_ref(), LogicalOperator::Filter(_)));
    }

    #[test]
    fn test_filter_not_pushed_through_limit_or_aggregate() {
        let limited = LogicalOperator::node_scan("n", None)
            .limit(10)
            .filter(E::property("n", "age").gt(E::literal(30)));
        assert!(matches!(
            optimizer().push_filters_down(limited),
            LogicalOperator::Filter(_)
        ));

        let aggregated = LogicalOperator::node_scan("n", None)
            .aggregate(
                vec![(E::property("n", "age"), Some("age"))],
                vec![AggregateExpr::count_star().alias("c")],
            )
            .filter(E::variable("c").gt(E::literal(1)));
        assert!(matches!(
            optimizer().push_filters_down(aggregated),
            LogicalOperator::Filter(_)
        ));
    }

    #[test]
    fn test_filter_not_pushed_below_computing_projection() {
        let plan = LogicalOperator::node_scan("n", None)
            .project(vec![(E::property("n", "age"), Some("age"))])
            .filter(E::variable("age").gt(E::literal(30)));
        assert!(matches!(
            optimizer().push_filters_down(plan),
            LogicalOperator::Filter(_)
        ));
    }

    #[test]
    fn test_filter_pushed_to_join_side() {
        let plan = LogicalOperator::node_scan("a", Some("Person"))
            .join(
                LogicalOperator::node_scan("c", Some("City")),
                vec![(E::property("a", "city"), E::property("c", "name"))],
            )
            .filter(E::property("c", "name").eq(E::literal("Oslo")));

        let LogicalOperator::Join(join) = optimizer().push_filters_down(plan) else {
            panic!("expected Join on top");
        };
        assert!(matches!(join.right.as_ref(), LogicalOperator::Filter(_)));
        assert!(matches!(join.left.as_ref(), LogicalOperator::NodeScan(_)));
    }

    #[test]
    fn test_equality_on_hash_index_becomes_seek() {
        let plan = LogicalOperator::node_scan("n", Some("Person"))
            .filter(E::property("n", "id").eq(E::literal(7)))
            .into_plan();
        let optimizer = optimizer().with_indexes([(PropertyKey::new("id"), IndexKind::Hash)]);
        let physical = optimizer.optimize(plan).unwrap();

        let seek = find(&physical.root, "IndexSeek").expect("index seek");
        assert!(matches!(
            &seek.operator,
            PhysicalOperator::IndexSeek { lookup: IndexLookup::Equals(Value::Int64(7)), .. }
        ));
        // The filter stays for exact semantics.
        assert_eq!(physical.root.operator.name(), "Filter");
        assert!(physical.rows() < 2.0);
    }

    #[test]
    fn test_range_needs_btree_index() {
        let plan = || {
            LogicalOperator::node_scan("n", Some("Person"))
                .filter(E::property("n", "id").gt(E::literal(990)))
                .into_plan()
        };
        let hash = optimizer().with_indexes([(PropertyKey::new("id"), IndexKind::Hash)]);
        let physical = hash.optimize(plan()).unwrap();
        assert!(find(&physical.root, "IndexSeek").is_none());
        let scan = find(&physical.root, "NodeScan").expect("scan");
        let PhysicalOperator::NodeScan { zone_predicates, .. } = &scan.operator else {
            unreachable!()
        };
        assert_eq!(zone_predicates.len(), 1);
        assert_eq!(zone_predicates[0].op, CompareOp::Gt);

        let btree = optimizer().with_indexes([(PropertyKey::new("id"), IndexKind::BTree)]);
        let physical = btree.optimize(plan()).unwrap();
        let seek = find(&physical.root, "IndexSeek").expect("index seek");
        assert!(matches!(
            &seek.operator,
            PhysicalOperator::IndexSeek {
                lookup: IndexLookup::Range(Bound::Excluded(_), Bound::Unbounded),
                ..
            }
        ));
    }

    #[test]
    fn test_flipped_literal_comparison_is_zone_predicate() {
        let plan = LogicalOperator::node_scan("n", None)
            .filter(E::literal(30).lt(E::property("n", "age")))
            .into_plan();
        let physical = optimizer().optimize(plan).unwrap();
        let scan = find(&physical.root, "NodeScan").expect("scan");
        let PhysicalOperator::NodeScan { zone_predicates, .. } = &scan.operator else {
            unreachable!()
        };
        assert_eq!(zone_predicates[0].op, CompareOp::Gt);
        assert_eq!(zone_predicates[0].value, Value::Int64(30));
    }

    fn three_way() -> LogicalPlan {
        LogicalOperator::node_scan("p", Some("Person"))
            .join(
                LogicalOperator::node_scan("c", Some("City")),
                vec![(E::property("p", "city"), E::property("c", "name"))],
            )
            .join(
                LogicalOperator::node_scan("k", Some("Country")),
                vec![(E::property("c", "country"), E::property("k", "name"))],
            )
            .into_plan()
    }

    #[test]
    fn test_join_region_matches_exhaustive_search() {
        let optimizer = optimizer();
        let physical = optimizer.optimize(three_way()).unwrap();

        // Rebuild the region and enumerate every bushy tree.
        let mut inputs = Vec::new();
        let mut predicates = Vec::new();
        flatten_joins(three_way().root, &mut inputs, &mut predicates);
        assert_eq!(inputs.len(), 3);
        assert_eq!(predicates.len(), 2);

        let best_exhaustive = exhaustive_cost(&optimizer, three_way());
        assert!(
            physical.cost().total() <= best_exhaustive + 1e-6,
            "dpccp {} vs exhaustive {best_exhaustive}",
            physical.cost().total()
        );
        let mut joins = 0;
        physical.walk(&mut |n| joins += usize::from(n.operator.is_join()));
        assert_eq!(joins, 2);
    }

    fn exhaustive_cost(optimizer: &Optimizer, plan: LogicalPlan) -> f64 {
        let mut inputs = Vec::new();
        let mut predicates = Vec::new();
        flatten_joins(plan.root, &mut inputs, &mut predicates);
        let relations: Vec<Relation> = inputs
            .into_iter()
            .map(|i| optimizer.relation(i, Vec::new()).unwrap())
            .collect();
        let mut graph = JoinGraph::new(relations.len());
        let vars: Vec<FxHashSet<String>> =
            relations.iter().map(|r| r.node.columns.iter().cloned().collect()).collect();
        let edges: Vec<JoinEdge> = predicates
            .into_iter()
            .map(|p| {
                let LogicalExpression::Binary { left, right, .. } = p else {
                    unreachable!()
                };
                let l = vars.iter().position(|v| left.variables().is_subset(v)).unwrap();
                let r = vars.iter().position(|v| right.variables().is_subset(v)).unwrap();
                graph.add_edge(l, r);
                let selectivity = optimizer.card_estimator.join_selectivity(
                    &left,
                    relations[l].node.rows,
                    &right,
                    relations[r].node.rows,
                );
                JoinEdge {
                    left: l,
                    right: r,
                    left_key: *left,
                    right_key: *right,
                    selectivity,
                }
            })
            .collect();
        let space = JoinSpace {
            optimizer,
            relations: &relations,
            edges: &edges,
        };
        exhaustive(&graph, &space)
            .iter()
            .map(|p| p.cost.total())
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn test_greedy_fallback_when_region_is_large() {
        let physical = optimizer()
            .with_max_dp_relations(2)
            .optimize(three_way())
            .unwrap();
        let mut joins = 0;
        physical.walk(&mut |n| joins += usize::from(n.operator.is_join()));
        assert_eq!(joins, 2);
        assert_eq!(physical.columns().len(), 3);
    }

    #[test]
    fn test_cross_product_uses_nested_loop() {
        let plan = LogicalOperator::node_scan("a", Some("Country"))
            .join(LogicalOperator::node_scan("b", Some("Country")), Vec::new())
            .into_plan();
        let physical = optimizer().optimize(plan).unwrap();
        assert_eq!(physical.root.operator.name(), "NestedLoopJoin");
        assert!((physical.rows() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_cross_filter_becomes_join_condition() {
        let plan = LogicalOperator::node_scan("a", Some("Person"))
            .join(LogicalOperator::node_scan("b", Some("Person")), Vec::new())
            .filter(E::property("a", "id").eq(E::property("b", "id")))
            .into_plan();
        let physical = optimizer().optimize(plan).unwrap();
        assert!(
            matches!(physical.root.operator.name(), "HashJoin" | "MergeJoin"),
            "got {}",
            physical.root.operator.name()
        );
    }

    #[test]
    fn test_index_nested_loop_for_selective_outer() {
        let plan = LogicalOperator::node_scan("a", Some("Country"))
            .filter(E::property("a", "name").eq(E::literal("Norway")))
            .join(
                LogicalOperator::node_scan("p", Some("Person")),
                vec![(E::property("a", "name"), E::property("p", "country"))],
            )
            .into_plan();
        let physical = optimizer()
            .with_indexes([(PropertyKey::new("country"), IndexKind::Hash)])
            .optimize(plan)
            .unwrap();
        assert!(
            find(&physical.root, "IndexNestedLoopJoin").is_some(),
            "plan:\n{physical}"
        );
    }

    #[test]
    fn test_written_order_without_reordering() {
        let physical = optimizer()
            .with_join_reorder(false)
            .optimize(three_way())
            .unwrap();
        assert_eq!(physical.columns(), ["p", "c", "k"]);
    }

    #[test]
    fn test_sort_provides_ordering() {
        let plan = LogicalOperator::node_scan("n", Some("Person"))
            .sort(vec![(E::property("n", "age"), SortOrder::Ascending)])
            .limit(5)
            .into_plan();
        let physical = optimizer().optimize(plan).unwrap();
        assert_eq!(physical.root.ordering, vec![E::property("n", "age")]);
        assert!((physical.rows() - 5.0).abs() < 1e-9);
    }
}
