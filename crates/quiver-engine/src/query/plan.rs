//! Logical query plan representation.
//!
//! The logical plan is what a front end hands the kernel: a tree of
//! relational operators over named variables, with expressions already
//! resolved to typed values. Rows are addressed by variable name here; the
//! physical planner turns names into column positions.
//!
//! Plans are usually built bottom-up with the fluent helpers:
//!
//! ```
//! use quiver_engine::query::plan::{LogicalExpression as E, LogicalOperator, SortOrder};
//!
//! let plan = LogicalOperator::node_scan("n", Some("Person"))
//!     .filter(E::property("n", "age").gt(E::literal(26)))
//!     .sort(vec![(E::property("n", "name"), SortOrder::Ascending)])
//!     .project(vec![(E::property("n", "name"), Some("name"))])
//!     .limit(10)
//!     .into_plan();
//! assert_eq!(plan.output_columns(), vec!["name".to_string()]);
//! ```

use std::fmt;

use quiver_common::types::Value;
use quiver_common::utils::hash::FxHashSet;
use quiver_core::Direction;

pub use quiver_core::execution::operators::AggregateFunction;
pub use quiver_core::execution::{BinaryOp, UnaryOp};

/// A logical query plan.
#[derive(Debug, Clone)]
pub struct LogicalPlan {
    /// The root operator of the plan.
    pub root: LogicalOperator,
}

impl LogicalPlan {
    /// Creates a new logical plan with the given root operator.
    pub fn new(root: LogicalOperator) -> Self {
        Self { root }
    }

    /// Names of the columns the plan returns, in order.
    #[must_use]
    pub fn output_columns(&self) -> Vec<String> {
        self.root.output_columns()
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt_tree(f, 0)
    }
}

/// A logical operator in the query plan.
#[derive(Debug, Clone)]
pub enum LogicalOperator {
    /// Scan all nodes, optionally filtered by label.
    NodeScan(NodeScanOp),

    /// Expand from nodes to neighbors via edges.
    Expand(ExpandOp),

    /// Filter rows based on a predicate.
    Filter(FilterOp),

    /// Compute the output columns.
    Project(ProjectOp),

    /// Inner equi-join of two inputs.
    Join(JoinOp),

    /// Aggregate with grouping.
    Aggregate(AggregateOp),

    /// Sort results.
    Sort(SortOp),

    /// Remove duplicate rows.
    Distinct(DistinctOp),

    /// Limit the number of results.
    Limit(LimitOp),

    /// Skip a number of results.
    Skip(SkipOp),

    /// Empty result set.
    Empty,
}

/// Scan nodes from the graph.
#[derive(Debug, Clone)]
pub struct NodeScanOp {
    /// Variable name to bind the node to.
    pub variable: String,
    /// Optional label filter.
    pub label: Option<String>,
}

/// Expand from nodes to their neighbors.
#[derive(Debug, Clone)]
pub struct ExpandOp {
    /// Source node variable.
    pub from_variable: String,
    /// Edge variable to bind (optional).
    pub edge_variable: Option<String>,
    /// Target node variable to bind.
    pub to_variable: String,
    /// Direction of expansion.
    pub direction: Direction,
    /// Optional edge type filter.
    pub edge_type: Option<String>,
    /// Optional label the target must carry.
    pub to_label: Option<String>,
    /// Input operator.
    pub input: Box<LogicalOperator>,
}

/// Filter rows based on a predicate.
#[derive(Debug, Clone)]
pub struct FilterOp {
    /// The filter predicate.
    pub predicate: LogicalExpression,
    /// Input operator.
    pub input: Box<LogicalOperator>,
}

/// Project specific columns.
#[derive(Debug, Clone)]
pub struct ProjectOp {
    /// Columns to project.
    pub projections: Vec<Projection>,
    /// Input operator.
    pub input: Box<LogicalOperator>,
}

/// A single projection (column selection or computation).
#[derive(Debug, Clone)]
pub struct Projection {
    /// Expression to compute.
    pub expression: LogicalExpression,
    /// Alias for the result.
    pub alias: Option<String>,
}

impl Projection {
    /// The output column name: the alias, or the expression's text.
    #[must_use]
    pub fn name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self.expression.to_string(),
        }
    }
}

/// Join two inputs.
#[derive(Debug, Clone)]
pub struct JoinOp {
    /// Left input.
    pub left: Box<LogicalOperator>,
    /// Right input.
    pub right: Box<LogicalOperator>,
    /// Equality conditions; none makes a cross product.
    pub conditions: Vec<JoinCondition>,
}

/// A join condition `left = right`.
#[derive(Debug, Clone)]
pub struct JoinCondition {
    /// Expression over the left input.
    pub left: LogicalExpression,
    /// Expression over the right input.
    pub right: LogicalExpression,
}

/// Aggregate with grouping.
#[derive(Debug, Clone)]
pub struct AggregateOp {
    /// Group by expressions.
    pub group_by: Vec<Projection>,
    /// Aggregate functions.
    pub aggregates: Vec<AggregateExpr>,
    /// Input operator.
    pub input: Box<LogicalOperator>,
}

/// An aggregate expression.
#[derive(Debug, Clone)]
pub struct AggregateExpr {
    /// Aggregate function.
    pub function: AggregateFunction,
    /// Expression to aggregate; `None` for `count(*)`.
    pub expression: Option<LogicalExpression>,
    /// Whether to use DISTINCT.
    pub distinct: bool,
    /// Alias for the result.
    pub alias: Option<String>,
}

impl AggregateExpr {
    /// `count(*)`.
    #[must_use]
    pub fn count_star() -> Self {
        Self {
            function: AggregateFunction::CountStar,
            expression: None,
            distinct: false,
            alias: None,
        }
    }

    /// `function(expression)`.
    #[must_use]
    pub fn new(function: AggregateFunction, expression: LogicalExpression) -> Self {
        Self {
            function,
            expression: Some(expression),
            distinct: false,
            alias: None,
        }
    }

    /// Folds only distinct values.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Names the result column.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The output column name.
    #[must_use]
    pub fn name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.expression {
            None => "count(*)".to_string(),
            Some(e) if self.distinct => format!("{}(DISTINCT {e})", self.function.name()),
            Some(e) => format!("{}({e})", self.function.name()),
        }
    }
}

/// Sort results.
#[derive(Debug, Clone)]
pub struct SortOp {
    /// Sort keys.
    pub keys: Vec<SortKey>,
    /// Input operator.
    pub input: Box<LogicalOperator>,
}

/// A sort key.
#[derive(Debug, Clone)]
pub struct SortKey {
    /// Expression to sort by.
    pub expression: LogicalExpression,
    /// Sort order.
    pub order: SortOrder,
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending order.
    Ascending,
    /// Descending order.
    Descending,
}

/// Remove duplicate results.
#[derive(Debug, Clone)]
pub struct DistinctOp {
    /// Input operator.
    pub input: Box<LogicalOperator>,
}

/// Limit the number of results.
#[derive(Debug, Clone)]
pub struct LimitOp {
    /// Maximum number of rows to return.
    pub count: usize,
    /// Input operator.
    pub input: Box<LogicalOperator>,
}

/// Skip a number of results.
#[derive(Debug, Clone)]
pub struct SkipOp {
    /// Number of rows to skip.
    pub count: usize,
    /// Input operator.
    pub input: Box<LogicalOperator>,
}

impl LogicalOperator {
    /// Scans nodes into `variable`.
    #[must_use]
    pub fn node_scan(variable: impl Into<String>, label: Option<&str>) -> Self {
        Self::NodeScan(NodeScanOp {
            variable: variable.into(),
            label: label.map(str::to_string),
        })
    }

    /// Follows edges from `from` and binds the neighbor to `to`.
    #[must_use]
    pub fn expand(
        self,
        from: impl Into<String>,
        edge_type: Option<&str>,
        direction: Direction,
        to: impl Into<String>,
    ) -> Self {
        Self::Expand(ExpandOp {
            from_variable: from.into(),
            edge_variable: None,
            to_variable: to.into(),
            direction,
            edge_type: edge_type.map(str::to_string),
            to_label: None,
            input: Box::new(self),
        })
    }

    /// Binds the edge of the topmost expand to `variable`.
    ///
    /// Has no effect on other operators.
    #[must_use]
    pub fn with_edge_variable(mut self, variable: impl Into<String>) -> Self {
        if let Self::Expand(expand) = &mut self {
            expand.edge_variable = Some(variable.into());
        }
        self
    }

    /// Requires the target of the topmost expand to carry `label`.
    #[must_use]
    pub fn with_target_label(mut self, label: impl Into<String>) -> Self {
        if let Self::Expand(expand) = &mut self {
            expand.to_label = Some(label.into());
        }
        self
    }

    /// Keeps rows satisfying `predicate`.
    #[must_use]
    pub fn filter(self, predicate: LogicalExpression) -> Self {
        Self::Filter(FilterOp {
            predicate,
            input: Box::new(self),
        })
    }

    /// Computes the output columns.
    #[must_use]
    pub fn project(self, projections: Vec<(LogicalExpression, Option<&str>)>) -> Self {
        Self::Project(ProjectOp {
            projections: projections
                .into_iter()
                .map(|(expression, alias)| Projection {
                    expression,
                    alias: alias.map(str::to_string),
                })
                .collect(),
            input: Box::new(self),
        })
    }

    /// Joins with `right` on `left_expr = right_expr` pairs.
    #[must_use]
    pub fn join(self, right: Self, conditions: Vec<(LogicalExpression, LogicalExpression)>) -> Self {
        Self::Join(JoinOp {
            left: Box::new(self),
            right: Box::new(right),
            conditions: conditions
                .into_iter()
                .map(|(left, right)| JoinCondition { left, right })
                .collect(),
        })
    }

    /// Groups by `group_by` and computes `aggregates` per group.
    #[must_use]
    pub fn aggregate(
        self,
        group_by: Vec<(LogicalExpression, Option<&str>)>,
        aggregates: Vec<AggregateExpr>,
    ) -> Self {
        Self::Aggregate(AggregateOp {
            group_by: group_by
                .into_iter()
                .map(|(expression, alias)| Projection {
                    expression,
                    alias: alias.map(str::to_string),
                })
                .collect(),
            aggregates,
            input: Box::new(self),
        })
    }

    /// Orders rows by `keys`.
    #[must_use]
    pub fn sort(self, keys: Vec<(LogicalExpression, SortOrder)>) -> Self {
        Self::Sort(SortOp {
            keys: keys
                .into_iter()
                .map(|(expression, order)| SortKey { expression, order })
                .collect(),
            input: Box::new(self),
        })
    }

    /// Removes duplicate rows.
    #[must_use]
    pub fn distinct(self) -> Self {
        Self::Distinct(DistinctOp {
            input: Box::new(self),
        })
    }

    /// Keeps the first `count` rows.
    #[must_use]
    pub fn limit(self, count: usize) -> Self {
        Self::Limit(LimitOp {
            count,
            input: Box::new(self),
        })
    }

    /// Drops the first `count` rows.
    #[must_use]
    pub fn skip(self, count: usize) -> Self {
        Self::Skip(SkipOp {
            count,
            input: Box::new(self),
        })
    }

    /// Wraps the operator into a plan.
    #[must_use]
    pub fn into_plan(self) -> LogicalPlan {
        LogicalPlan::new(self)
    }

    /// Names of the columns this operator produces, in order.
    #[must_use]
    pub fn output_columns(&self) -> Vec<String> {
        match self {
            Self::NodeScan(scan) => vec![scan.variable.clone()],
            Self::Expand(expand) => {
                let mut columns = expand.input.output_columns();
                columns.extend(expand.edge_variable.clone());
                columns.push(expand.to_variable.clone());
                columns
            }
            Self::Filter(FilterOp { input, .. })
            | Self::Sort(SortOp { input, .. })
            | Self::Distinct(DistinctOp { input })
            | Self::Limit(LimitOp { input, .. })
            | Self::Skip(SkipOp { input, .. }) => input.output_columns(),
            Self::Project(project) => project.projections.iter().map(Projection::name).collect(),
            Self::Join(join) => {
                let mut columns = join.left.output_columns();
                columns.extend(join.right.output_columns());
                columns
            }
            Self::Aggregate(agg) => agg
                .group_by
                .iter()
                .map(Projection::name)
                .chain(agg.aggregates.iter().map(AggregateExpr::name))
                .collect(),
            Self::Empty => Vec::new(),
        }
    }

    /// Variables bound by this operator and visible to operators above.
    #[must_use]
    pub fn output_variables(&self) -> FxHashSet<String> {
        self.output_columns().into_iter().collect()
    }

    /// The operator's name, for plan printing.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeScan(_) => "NodeScan",
            Self::Expand(_) => "Expand",
            Self::Filter(_) => "Filter",
            Self::Project(_) => "Project",
            Self::Join(_) => "Join",
            Self::Aggregate(_) => "Aggregate",
            Self::Sort(_) => "Sort",
            Self::Distinct(_) => "Distinct",
            Self::Limit(_) => "Limit",
            Self::Skip(_) => "Skip",
            Self::Empty => "Empty",
        }
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.name(), indent = depth * 2)?;
        match self {
            Self::NodeScan(scan) => {
                write!(f, " {}", scan.variable)?;
                if let Some(label) = &scan.label {
                    write!(f, ":{label}")?;
                }
                writeln!(f)
            }
            Self::Expand(expand) => {
                writeln!(
                    f,
                    " ({})-[{}:{}]-({}) {:?}",
                    expand.from_variable,
                    expand.edge_variable.as_deref().unwrap_or(""),
                    expand.edge_type.as_deref().unwrap_or("*"),
                    expand.to_variable,
                    expand.direction
                )?;
                expand.input.fmt_tree(f, depth + 1)
            }
            Self::Filter(filter) => {
                writeln!(f, " {}", filter.predicate)?;
                filter.input.fmt_tree(f, depth + 1)
            }
            Self::Project(project) => {
                let names: Vec<String> = project.projections.iter().map(Projection::name).collect();
                writeln!(f, " {}", names.join(", "))?;
                project.input.fmt_tree(f, depth + 1)
            }
            Self::Join(join) => {
                let conditions: Vec<String> = join
                    .conditions
                    .iter()
                    .map(|c| format!("{} = {}", c.left, c.right))
                    .collect();
                writeln!(f, " {}", conditions.join(" AND "))?;
                join.left.fmt_tree(f, depth + 1)?;
                join.right.fmt_tree(f, depth + 1)
            }
            Self::Aggregate(agg) => {
                let names: Vec<String> = agg
                    .group_by
                    .iter()
                    .map(Projection::name)
                    .chain(agg.aggregates.iter().map(AggregateExpr::name))
                    .collect();
                writeln!(f, " {}", names.join(", "))?;
                agg.input.fmt_tree(f, depth + 1)
            }
            Self::Sort(sort) => {
                let keys: Vec<String> = sort
                    .keys
                    .iter()
                    .map(|k| match k.order {
                        SortOrder::Ascending => k.expression.to_string(),
                        SortOrder::Descending => format!("{} DESC", k.expression),
                    })
                    .collect();
                writeln!(f, " {}", keys.join(", "))?;
                sort.input.fmt_tree(f, depth + 1)
            }
            Self::Distinct(DistinctOp { input }) => {
                writeln!(f)?;
                input.fmt_tree(f, depth + 1)
            }
            Self::Limit(LimitOp { count, input }) | Self::Skip(SkipOp { count, input }) => {
                writeln!(f, " {count}")?;
                input.fmt_tree(f, depth + 1)
            }
            Self::Empty => writeln!(f),
        }
    }
}

/// A logical expression.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalExpression {
    /// A literal value.
    Literal(Value),

    /// A variable reference.
    Variable(String),

    /// Property access (e.g., n.name).
    Property {
        /// The variable to access.
        variable: String,
        /// The property name.
        property: String,
    },

    /// Binary operation.
    Binary {
        /// Left operand.
        left: Box<LogicalExpression>,
        /// Operator.
        op: BinaryOp,
        /// Right operand.
        right: Box<LogicalExpression>,
    },

    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<LogicalExpression>,
    },

    /// Function call.
    FunctionCall {
        /// Function name.
        name: String,
        /// Arguments.
        args: Vec<LogicalExpression>,
    },

    /// List literal.
    List(Vec<LogicalExpression>),
}

impl LogicalExpression {
    /// A literal.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// A variable reference.
    #[must_use]
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// `variable.property`.
    #[must_use]
    pub fn property(variable: impl Into<String>, property: impl Into<String>) -> Self {
        Self::Property {
            variable: variable.into(),
            property: property.into(),
        }
    }

    /// A function call.
    #[must_use]
    pub fn call(name: impl Into<String>, args: Vec<Self>) -> Self {
        Self::FunctionCall {
            name: name.into(),
            args,
        }
    }

    /// `self <op> other`.
    #[must_use]
    pub fn binary(self, op: BinaryOp, other: Self) -> Self {
        Self::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    /// `self = other`.
    #[must_use]
    pub fn eq(self, other: Self) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// `self <> other`.
    #[must_use]
    pub fn ne(self, other: Self) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    /// `self < other`.
    #[must_use]
    pub fn lt(self, other: Self) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    /// `self <= other`.
    #[must_use]
    pub fn le(self, other: Self) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    /// `self > other`.
    #[must_use]
    pub fn gt(self, other: Self) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    /// `self >= other`.
    #[must_use]
    pub fn ge(self, other: Self) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    /// `self AND other`.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        self.binary(BinaryOp::And, other)
    }

    /// `self OR other`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    /// `NOT self`.
    #[must_use]
    pub fn not(self) -> Self {
        Self::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    /// `self IS NULL`.
    #[must_use]
    pub fn is_null(self) -> Self {
        Self::Unary {
            op: UnaryOp::IsNull,
            operand: Box::new(self),
        }
    }

    /// Variables the expression reads.
    #[must_use]
    pub fn variables(&self) -> FxHashSet<String> {
        let mut vars = FxHashSet::default();
        self.collect_variables(&mut vars);
        vars
    }

    fn collect_variables(&self, vars: &mut FxHashSet<String>) {
        match self {
            Self::Literal(_) => {}
            Self::Variable(name) => {
                vars.insert(name.clone());
            }
            Self::Property { variable, .. } => {
                vars.insert(variable.clone());
            }
            Self::Binary { left, right, .. } => {
                left.collect_variables(vars);
                right.collect_variables(vars);
            }
            Self::Unary { operand, .. } => operand.collect_variables(vars),
            Self::FunctionCall { args, .. } | Self::List(args) => {
                for arg in args {
                    arg.collect_variables(vars);
                }
            }
        }
    }

    /// Splits a conjunction into its parts.
    #[must_use]
    pub fn into_conjuncts(self) -> Vec<Self> {
        match self {
            Self::Binary {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let mut parts = left.into_conjuncts();
                parts.extend(right.into_conjuncts());
                parts
            }
            other => vec![other],
        }
    }

    /// Joins predicates with AND; `None` for an empty list.
    #[must_use]
    pub fn conjunction(parts: Vec<Self>) -> Option<Self> {
        parts.into_iter().reduce(Self::and)
    }
}

impl From<Value> for LogicalExpression {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl fmt::Display for LogicalExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(Value::String(s)) => write!(f, "'{s}'"),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Variable(name) => write!(f, "{name}"),
            Self::Property { variable, property } => write!(f, "{variable}.{property}"),
            Self::Binary { left, op, right } => write!(f, "{left} {op} {right}"),
            Self::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Self::FunctionCall { name, args } => {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "{name}({})", args.join(", "))
            }
            Self::List(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LogicalExpression as E;

    #[test]
    fn test_simple_node_scan_plan() {
        let plan = LogicalOperator::node_scan("n", Some("Person"))
            .project(vec![(E::variable("n"), None)])
            .into_plan();

        if let LogicalOperator::Project(project) = &plan.root {
            assert_eq!(project.projections.len(), 1);
            if let LogicalOperator::NodeScan(scan) = project.input.as_ref() {
                assert_eq!(scan.variable, "n");
                assert_eq!(scan.label, Some("Person".into()));
            } else {
                panic!("Expected NodeScan");
            }
        } else {
            panic!("Expected Project");
        }
        assert_eq!(plan.output_columns(), vec!["n"]);
    }

    #[test]
    fn test_expand_columns() {
        let op = LogicalOperator::node_scan("a", None)
            .expand("a", Some("KNOWS"), Direction::Outgoing, "b")
            .with_edge_variable("e");
        assert_eq!(op.output_columns(), vec!["a", "e", "b"]);
    }

    #[test]
    fn test_aggregate_column_names() {
        let op = LogicalOperator::node_scan("n", Some("Person")).aggregate(
            vec![(E::property("n", "city"), None)],
            vec![
                AggregateExpr::count_star(),
                AggregateExpr::new(AggregateFunction::Avg, E::property("n", "age")).alias("age"),
            ],
        );
        assert_eq!(op.output_columns(), vec!["n.city", "count(*)", "age"]);
    }

    #[test]
    fn test_expression_display_and_variables() {
        let e = E::property("n", "age")
            .gt(E::literal(26))
            .and(E::property("m", "name").eq(E::literal("Bob")));
        assert_eq!(e.to_string(), "n.age > 26 AND m.name = 'Bob'");
        let vars = e.variables();
        assert!(vars.contains("n") && vars.contains("m"));
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_conjunct_round_trip() {
        let a = E::property("n", "a").eq(E::literal(1));
        let b = E::property("n", "b").eq(E::literal(2));
        let c = E::property("n", "c").eq(E::literal(3));
        let parts = a.clone().and(b.clone()).and(c.clone()).into_conjuncts();
        assert_eq!(parts, vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(E::conjunction(parts), Some(a.and(b).and(c)));
        assert_eq!(E::conjunction(Vec::new()), None);
    }

    #[test]
    fn test_plan_display() {
        let plan = LogicalOperator::node_scan("n", Some("Person"))
            .filter(E::property("n", "age").gt(E::literal(26)))
            .limit(5)
            .into_plan();
        let text = plan.to_string();
        assert!(text.starts_with("Limit 5\n  Filter n.age > 26\n    NodeScan n:Person"));
    }
}
