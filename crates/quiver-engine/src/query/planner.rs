//! Lowers physical plans into push pipelines.
//!
//! Every pipeline breaker ends the pipeline feeding it and starts a new one
//! reading its result:
//!
//! | Operator        | Breaker sink          | Next source            |
//! |-----------------|-----------------------|------------------------|
//! | HashJoin        | `HashBuildSink`       | probe side continues   |
//! | MergeJoin       | two `SortSink`s       | `MergeJoinSource`      |
//! | NestedLoopJoin  | `MaterializeSink`     | outer side continues   |
//! | Aggregate       | `HashAggregateSink`   | `MaterializedSource`   |
//! | Sort            | `SortSink`            | `SortedSource`         |
//!
//! Pipelines are emitted in dependency order, so running them one after
//! another is always valid. The last pipeline ends in the sink supplied by
//! the caller.

use std::sync::Arc;

use quiver_common::types::{LogicalType, PropertyKey};
use quiver_common::utils::error::{Error, Result};
use quiver_core::execution::operators::{
    self as ops, DistinctOperator, ExpandOperator, FilterOperator, HashAggregateSink,
    HashBuildSink, HashProbeOperator, IndexNestedLoopJoinOperator, JoinTable, LimitOperator,
    MergeJoinSource, NestedLoopJoinOperator, ProjectOperator, SkipOperator, SortSink,
    SortedOutput, SortedSource,
};
use quiver_core::execution::{
    ChunkBuffer, EmptySource, Expression, IndexSeekSource, MaterializeSink, MaterializedSource,
    NodeScanSource, Pipeline, PushOperator, Sink, Source,
};

use crate::query::physical::{PhysicalNode, PhysicalOperator, PhysicalPlan};
use crate::query::plan::{LogicalExpression, SortOrder};

/// Pipelines ready to run, with the result schema.
pub struct ExecutablePlan {
    /// Pipelines in run order.
    pub pipelines: Vec<Arc<Pipeline>>,
    /// Result column names.
    pub columns: Vec<String>,
    /// Result column types, `Any` where unknown before execution.
    pub types: Vec<LogicalType>,
}

/// A pipeline under construction.
struct Stream {
    source: Box<dyn Source>,
    operators: Vec<Box<dyn PushOperator>>,
    columns: Vec<String>,
    types: Vec<LogicalType>,
}

impl Stream {
    fn new(source: impl Source + 'static, columns: Vec<String>, types: Vec<LogicalType>) -> Self {
        Self {
            source: Box::new(source),
            operators: Vec::new(),
            columns,
            types,
        }
    }

    fn push(&mut self, operator: impl PushOperator + 'static) {
        self.operators.push(Box::new(operator));
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Converts physical plans to pipelines.
#[derive(Default)]
pub struct Planner {
    pipelines: Vec<Arc<Pipeline>>,
}

impl Planner {
    /// Creates a planner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowers `plan`, ending the final pipeline in `sink`.
    ///
    /// # Errors
    ///
    /// Returns `Query` if an expression names a variable no input binds.
    pub fn build(mut self, plan: &PhysicalPlan, sink: Box<dyn Sink>) -> Result<ExecutablePlan> {
        let mut stream = self.lower(&plan.root)?;
        let columns = plan.columns().to_vec();
        if stream.columns != columns {
            let positions = columns
                .iter()
                .map(|c| {
                    stream
                        .position(c)
                        .ok_or_else(|| Error::Query(format!("result column {c} is not produced")))
                })
                .collect::<Result<Vec<_>>>()?;
            let types: Vec<LogicalType> = positions.iter().map(|&i| stream.types[i]).collect();
            stream.push(ProjectOperator::select_columns(positions, types.clone()));
            stream.types = types;
            stream.columns.clone_from(&columns);
        }
        let types = stream.types.clone();
        self.finish(stream, sink);
        tracing::trace!(pipelines = self.pipelines.len(), "plan lowered");
        Ok(ExecutablePlan {
            pipelines: self.pipelines,
            columns,
            types,
        })
    }

    fn finish(&mut self, stream: Stream, sink: Box<dyn Sink>) {
        let id = self.pipelines.len();
        self.pipelines.push(Arc::new(Pipeline::new(
            id,
            stream.source,
            stream.operators,
            sink,
        )));
    }

    fn lower(&mut self, node: &PhysicalNode) -> Result<Stream> {
        match &node.operator {
            PhysicalOperator::NodeScan {
                variable,
                label,
                zone_predicates,
            } => Ok(Stream::new(
                NodeScanSource::new(label.clone()).with_zone_predicates(zone_predicates.clone()),
                vec![variable.clone()],
                vec![LogicalType::Node],
            )),
            PhysicalOperator::IndexSeek {
                variable,
                label,
                key,
                lookup,
            } => Ok(Stream::new(
                IndexSeekSource::new(key.clone(), lookup.clone(), label.clone()),
                vec![variable.clone()],
                vec![LogicalType::Node],
            )),
            PhysicalOperator::Empty => Ok(Stream::new(
                EmptySource,
                node.columns.clone(),
                vec![LogicalType::Any; node.columns.len()],
            )),
            PhysicalOperator::Expand {
                input,
                from_variable,
                edge_variable,
                to_variable,
                edge_type,
                direction,
                to_label,
            } => {
                let mut stream = self.lower(input)?;
                let column = stream
                    .position(from_variable)
                    .ok_or_else(|| unknown_variable(from_variable))?;
                let mut expand = ExpandOperator::new(column, edge_type.clone(), *direction);
                match edge_variable {
                    Some(edge) => {
                        stream.columns.push(edge.clone());
                        stream.types.push(LogicalType::Edge);
                    }
                    None => expand = expand.without_edge_column(),
                }
                if let Some(label) = to_label {
                    expand = expand.with_target_label(label.clone());
                }
                stream.push(expand);
                stream.columns.push(to_variable.clone());
                stream.types.push(LogicalType::Node);
                Ok(stream)
            }
            PhysicalOperator::Filter { input, predicate } => {
                let mut stream = self.lower(input)?;
                let predicate = resolve(predicate, &stream.columns)?;
                stream.push(FilterOperator::new(predicate));
                Ok(stream)
            }
            PhysicalOperator::Project { input, projections } => {
                let mut stream = self.lower(input)?;
                let expressions = projections
                    .iter()
                    .map(|p| resolve(&p.expression, &stream.columns))
                    .collect::<Result<Vec<_>>>()?;
                let types: Vec<LogicalType> =
                    expressions.iter().map(|e| e.result_type(&stream.types)).collect();
                stream.push(ProjectOperator::new(expressions, types.clone()));
                stream.columns = node.columns.clone();
                stream.types = types;
                Ok(stream)
            }
            PhysicalOperator::HashJoin {
                build,
                probe,
                build_keys,
                probe_keys,
            } => {
                let mut build_stream = self.lower(build)?;
                let build_columns = key_columns(&mut build_stream, build_keys)?;
                let table = Arc::new(JoinTable::new(build_columns));
                let (names, types) = (build_stream.columns.clone(), build_stream.types.clone());
                self.finish(build_stream, Box::new(HashBuildSink::new(Arc::clone(&table))));

                let mut stream = self.lower(probe)?;
                let probe_columns = key_columns(&mut stream, probe_keys)?;
                stream.push(HashProbeOperator::new(table, probe_columns));
                stream.columns.extend(names);
                stream.types.extend(types);
                Ok(stream)
            }
            PhysicalOperator::MergeJoin {
                left,
                right,
                left_keys,
                right_keys,
            } => {
                let (left_output, left_columns, left_names, left_types) =
                    self.sorted_input(left, left_keys)?;
                let (right_output, right_columns, right_names, right_types) =
                    self.sorted_input(right, right_keys)?;
                let mut columns = left_names;
                columns.extend(right_names);
                let mut types = left_types;
                types.extend(right_types);
                Ok(Stream::new(
                    MergeJoinSource::new(left_output, left_columns, right_output, right_columns),
                    columns,
                    types,
                ))
            }
            PhysicalOperator::NestedLoopJoin {
                outer,
                inner,
                predicate,
            } => {
                let inner_stream = self.lower(inner)?;
                let buffer = Arc::new(ChunkBuffer::new());
                let (names, types) = (inner_stream.columns.clone(), inner_stream.types.clone());
                self.finish(inner_stream, Box::new(MaterializeSink::new(Arc::clone(&buffer))));

                let mut stream = self.lower(outer)?;
                stream.columns.extend(names);
                stream.types.extend(types);
                let predicate = predicate
                    .as_ref()
                    .map(|p| resolve(p, &stream.columns))
                    .transpose()?;
                stream.push(NestedLoopJoinOperator::new(buffer, predicate));
                Ok(stream)
            }
            PhysicalOperator::IndexNestedLoopJoin {
                outer,
                outer_key,
                variable,
                label,
                key,
            } => {
                let mut stream = self.lower(outer)?;
                let outer_key = resolve(outer_key, &stream.columns)?;
                stream.push(IndexNestedLoopJoinOperator::new(
                    outer_key,
                    key.clone(),
                    label.clone(),
                ));
                stream.columns.push(variable.clone());
                stream.types.push(LogicalType::Node);
                Ok(stream)
            }
            PhysicalOperator::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let mut stream = self.lower(input)?;
                let keys: Vec<LogicalExpression> =
                    group_by.iter().map(|p| p.expression.clone()).collect();
                let group_columns = key_columns(&mut stream, &keys)?;
                let mut types: Vec<LogicalType> =
                    group_columns.iter().map(|&c| stream.types[c]).collect();
                let mut lowered = Vec::with_capacity(aggregates.len());
                for aggregate in aggregates {
                    let input = aggregate
                        .expression
                        .as_ref()
                        .map(|e| resolve(e, &stream.columns))
                        .transpose()?;
                    let input_type = input
                        .as_ref()
                        .map_or(LogicalType::Any, |e| e.result_type(&stream.types));
                    types.push(aggregate.function.result_type(input_type));
                    lowered.push(ops::AggregateExpr {
                        function: aggregate.function,
                        input,
                        distinct: aggregate.distinct,
                    });
                }
                let buffer = Arc::new(ChunkBuffer::new());
                self.finish(
                    stream,
                    Box::new(HashAggregateSink::new(group_columns, lowered, Arc::clone(&buffer))),
                );
                Ok(Stream::new(
                    MaterializedSource::new(buffer, false),
                    node.columns.clone(),
                    types,
                ))
            }
            PhysicalOperator::Sort { input, keys } => {
                let mut stream = self.lower(input)?;
                let expressions: Vec<LogicalExpression> =
                    keys.iter().map(|k| k.expression.clone()).collect();
                let columns = key_columns(&mut stream, &expressions)?;
                let sort_keys = columns
                    .into_iter()
                    .zip(keys)
                    .map(|(column, key)| match key.order {
                        SortOrder::Ascending => ops::SortKey::ascending(column),
                        SortOrder::Descending => ops::SortKey::descending(column),
                    })
                    .collect();
                let output = Arc::new(SortedOutput::new());
                let (names, types) = (stream.columns.clone(), stream.types.clone());
                self.finish(stream, Box::new(SortSink::new(sort_keys, Arc::clone(&output))));
                Ok(Stream::new(SortedSource::new(output), names, types))
            }
            PhysicalOperator::Distinct { input } => {
                let mut stream = self.lower(input)?;
                let columns = node
                    .columns
                    .iter()
                    .map(|c| stream.position(c).ok_or_else(|| unknown_variable(c)))
                    .collect::<Result<Vec<_>>>()?;
                stream.push(DistinctOperator::new(columns));
                Ok(stream)
            }
            PhysicalOperator::Limit { input, count } => {
                let mut stream = self.lower(input)?;
                stream.push(LimitOperator::new(*count));
                Ok(stream)
            }
            PhysicalOperator::Skip { input, count } => {
                let mut stream = self.lower(input)?;
                stream.push(SkipOperator::new(*count));
                Ok(stream)
            }
        }
    }

    /// Sorts `node` on `keys` into a buffer a merge join can read.
    ///
    /// A `Sort` child already ordered on the merge keys is not sorted twice.
    #[allow(clippy::type_complexity)]
    fn sorted_input(
        &mut self,
        node: &PhysicalNode,
        keys: &[LogicalExpression],
    ) -> Result<(Arc<SortedOutput>, Vec<usize>, Vec<String>, Vec<LogicalType>)> {
        let source = match &node.operator {
            PhysicalOperator::Sort { input, keys: sort_keys }
                if sort_keys.len() == keys.len()
                    && sort_keys
                        .iter()
                        .zip(keys)
                        .all(|(s, k)| s.order == SortOrder::Ascending && &s.expression == k) =>
            {
                input.as_ref()
            }
            _ => node,
        };
        let mut stream = self.lower(source)?;
        let columns = key_columns(&mut stream, keys)?;
        let output = Arc::new(SortedOutput::new());
        let sort_keys = columns.iter().map(|&c| ops::SortKey::ascending(c)).collect();
        let (names, types) = (stream.columns.clone(), stream.types.clone());
        self.finish(stream, Box::new(SortSink::new(sort_keys, Arc::clone(&output))));
        Ok((output, columns, names, types))
    }
}

fn unknown_variable(name: &str) -> Error {
    Error::Query(format!("variable {name} is not bound"))
}

/// Column positions holding `keys`, computing the keys that are not
/// columns yet into extra trailing columns.
fn key_columns(stream: &mut Stream, keys: &[LogicalExpression]) -> Result<Vec<usize>> {
    let mut positions = Vec::with_capacity(keys.len());
    let mut extra = Vec::new();
    for key in keys {
        match resolve(key, &stream.columns)? {
            Expression::Column(i) => positions.push(i),
            computed => {
                positions.push(stream.columns.len() + extra.len());
                extra.push((key.to_string(), computed));
            }
        }
    }
    if !extra.is_empty() {
        let mut projections: Vec<Expression> =
            (0..stream.columns.len()).map(Expression::Column).collect();
        let mut types = stream.types.clone();
        for (name, expression) in extra {
            types.push(expression.result_type(&stream.types));
            projections.push(expression);
            stream.columns.push(name);
        }
        stream.push(ProjectOperator::new(projections, types.clone()));
        stream.types = types;
    }
    Ok(positions)
}

/// Resolves variable names in `expr` to column positions.
///
/// An expression whose text names a column (a projected `n.age`, an
/// aggregate such as `count(*)`) reads that column.
fn resolve(expr: &LogicalExpression, columns: &[String]) -> Result<Expression> {
    if !matches!(expr, LogicalExpression::Literal(_)) {
        let text = expr.to_string();
        if let Some(i) = columns.iter().position(|c| *c == text) {
            return Ok(Expression::Column(i));
        }
    }
    let column = |name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| unknown_variable(name))
    };
    Ok(match expr {
        LogicalExpression::Literal(v) => Expression::Literal(v.clone()),
        LogicalExpression::Variable(name) => Expression::Column(column(name)?),
        LogicalExpression::Property { variable, property } => {
            Expression::property(column(variable)?, PropertyKey::new(property.as_str()))
        }
        LogicalExpression::Binary { left, op, right } => {
            Expression::binary(resolve(left, columns)?, *op, resolve(right, columns)?)
        }
        LogicalExpression::Unary { op, operand } => Expression::unary(*op, resolve(operand, columns)?),
        LogicalExpression::FunctionCall { name, args } => Expression::Function {
            name: name.clone(),
            args: args
                .iter()
                .map(|a| resolve(a, columns))
                .collect::<Result<Vec<_>>>()?,
        },
        LogicalExpression::List(items) => Expression::List(
            items
                .iter()
                .map(|i| resolve(i, columns))
                .collect::<Result<Vec<_>>>()?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::optimizer::Optimizer;
    use crate::query::plan::{AggregateExpr, LogicalExpression as E, LogicalOperator};
    use quiver_core::Direction;
    use quiver_core::execution::CollectorSink;

    fn lower(op: LogicalOperator) -> ExecutablePlan {
        let physical = Optimizer::new().optimize(op.into_plan()).unwrap();
        Planner::new()
            .build(&physical, Box::new(CollectorSink::new()))
            .unwrap()
    }

    #[test]
    fn test_resolve_names_to_columns() {
        let columns = vec!["n".to_string(), "m".to_string(), "n.age".to_string()];
        assert_eq!(
            resolve(&E::property("n", "age"), &columns).unwrap(),
            Expression::Column(2)
        );
        assert_eq!(
            resolve(&E::property("m", "age"), &columns).unwrap(),
            Expression::property(1, "age")
        );
        assert!(resolve(&E::variable("x"), &columns).is_err());
    }

    #[test]
    fn test_scan_filter_project_is_one_pipeline() {
        let plan = lower(
            LogicalOperator::node_scan("n", Some("Person"))
                .filter(E::property("n", "age").gt(E::literal(26)))
                .project(vec![(E::property("n", "name"), Some("name"))]),
        );
        assert_eq!(plan.pipelines.len(), 1);
        assert_eq!(plan.columns, vec!["name"]);
    }

    #[test]
    fn test_breakers_split_pipelines() {
        let plan = lower(
            LogicalOperator::node_scan("n", Some("Person"))
                .aggregate(
                    vec![(E::property("n", "city"), Some("city"))],
                    vec![AggregateExpr::count_star().alias("c")],
                )
                .sort(vec![(E::variable("c"), SortOrder::Descending)])
                .limit(3),
        );
        // scan -> aggregate, groups -> sort, sorted -> results
        assert_eq!(plan.pipelines.len(), 3);
        assert_eq!(plan.columns, vec!["city", "c"]);
        assert_eq!(plan.types[1], LogicalType::Int64);
    }

    #[test]
    fn test_join_builds_before_probe() {
        let plan = lower(
            LogicalOperator::node_scan("a", None)
                .expand("a", Some("KNOWS"), Direction::Outgoing, "b")
                .join(
                    LogicalOperator::node_scan("c", None),
                    vec![(E::property("b", "city"), E::property("c", "name"))],
                ),
        );
        assert!(plan.pipelines.len() >= 2);
        assert_eq!(plan.columns, vec!["a", "b", "c"]);
        for (i, pipeline) in plan.pipelines.iter().enumerate() {
            assert_eq!(pipeline.id(), i);
        }
    }
}
