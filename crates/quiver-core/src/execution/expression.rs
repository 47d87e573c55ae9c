//! Vectorized scalar expressions.
//!
//! An [`Expression`] is evaluated against a whole [`DataChunk`] at once and
//! yields one [`Value`] per row. Property reads go to the store in batches
//! under the query's snapshot. Comparisons follow three-valued logic: any
//! comparison with `NULL` is `NULL`, and a filter keeps only rows whose
//! predicate is `true`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use quiver_common::mvcc::Snapshot;
use quiver_common::types::{LogicalType, PropertyKey, Value};
use quiver_common::utils::error::{Error, Result};
use regex::Regex;

use super::chunk::DataChunk;
use super::operators::{OperatorError, OperatorResult};
use super::selection::SelectionVector;
use super::vector::{Cell, ValueVector};
use crate::graph::lpg::LpgStore;
use crate::index::zone_map::CompareOp;

/// Scalar functions provided outside the core, such as by a plugin
/// registry.
pub trait FunctionResolver: Send + Sync {
    /// Calls `name`. Returns `None` if the function is unknown.
    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value>>;
}

/// Everything an expression may need besides the chunk.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    /// The store, for property reads.
    pub store: &'a LpgStore,
    /// The reading snapshot.
    pub snapshot: &'a Snapshot,
    /// Functions beyond the entity built-ins.
    pub functions: Option<&'a dyn FunctionResolver>,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Logical AND.
    And,
    /// Logical OR.
    Or,
    /// Logical XOR.
    Xor,
    /// Addition (also string and list concatenation).
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo.
    Mod,
    /// String starts with.
    StartsWith,
    /// String ends with.
    EndsWith,
    /// String contains.
    Contains,
    /// List membership.
    In,
    /// Regex full match.
    Regex,
}

impl BinaryOp {
    /// The comparison this operator performs, if it is one.
    #[must_use]
    pub const fn as_compare(self) -> Option<CompareOp> {
        match self {
            Self::Eq => Some(CompareOp::Eq),
            Self::Ne => Some(CompareOp::Ne),
            Self::Lt => Some(CompareOp::Lt),
            Self::Le => Some(CompareOp::Le),
            Self::Gt => Some(CompareOp::Gt),
            Self::Ge => Some(CompareOp::Ge),
            _ => None,
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::StartsWith => "STARTS WITH",
            Self::EndsWith => "ENDS WITH",
            Self::Contains => "CONTAINS",
            Self::In => "IN",
            Self::Regex => "=~",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical NOT.
    Not,
    /// IS NULL.
    IsNull,
    /// IS NOT NULL.
    IsNotNull,
    /// Numeric negation.
    Neg,
}

/// A scalar expression over the columns of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A constant.
    Literal(Value),
    /// An input column.
    Column(usize),
    /// A property of the node or edge in a column. Reading a key of a map
    /// value is also supported.
    Property {
        /// The entity column.
        column: usize,
        /// The property.
        key: PropertyKey,
    },
    /// Binary operation.
    Binary {
        /// Left operand.
        left: Box<Expression>,
        /// Operator.
        op: BinaryOp,
        /// Right operand.
        right: Box<Expression>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expression>,
    },
    /// Function call. `id`, `labels` and `type` are built in; anything
    /// else goes to the [`FunctionResolver`].
    Function {
        /// Function name, matched case-insensitively.
        name: String,
        /// Arguments.
        args: Vec<Expression>,
    },
    /// List constructor.
    List(Vec<Expression>),
}

impl Expression {
    /// A property read.
    #[must_use]
    pub fn property(column: usize, key: impl Into<PropertyKey>) -> Self {
        Self::Property {
            column,
            key: key.into(),
        }
    }

    /// A binary expression.
    #[must_use]
    pub fn binary(left: Self, op: BinaryOp, right: Self) -> Self {
        Self::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// A unary expression.
    #[must_use]
    pub fn unary(op: UnaryOp, operand: Self) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Matches `column.key <op> literal` (either way round), normalized so
    /// the property is on the left.
    #[must_use]
    pub fn as_property_comparison(&self) -> Option<(usize, &PropertyKey, CompareOp, &Value)> {
        let Self::Binary { left, op, right } = self else {
            return None;
        };
        let cmp = op.as_compare()?;
        match (left.as_ref(), right.as_ref()) {
            (Self::Property { column, key }, Self::Literal(v)) => Some((*column, key, cmp, v)),
            (Self::Literal(v), Self::Property { column, key }) => {
                Some((*column, key, cmp.flip(), v))
            }
            _ => None,
        }
    }

    /// Splits a conjunction into its parts.
    #[must_use]
    pub fn conjuncts(&self) -> Vec<&Self> {
        match self {
            Self::Binary {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let mut parts = left.conjuncts();
                parts.extend(right.conjuncts());
                parts
            }
            other => vec![other],
        }
    }

    /// The type this expression produces over inputs of `input_types`.
    #[must_use]
    pub fn result_type(&self, input_types: &[LogicalType]) -> LogicalType {
        match self {
            Self::Literal(v) => v.logical_type(),
            Self::Column(i) => input_types.get(*i).copied().unwrap_or(LogicalType::Any),
            Self::Property { .. } => LogicalType::Any,
            Self::Binary { left, op, right } => match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                    let l = left.result_type(input_types);
                    let r = right.result_type(input_types);
                    if l.is_numeric() && r.is_numeric() {
                        l.unify(r)
                    } else {
                        LogicalType::Any
                    }
                }
                _ => LogicalType::Bool,
            },
            Self::Unary { op, operand } => match op {
                UnaryOp::Neg => operand.result_type(input_types),
                _ => LogicalType::Bool,
            },
            Self::Function { name, .. } => match name.to_ascii_lowercase().as_str() {
                "id" => LogicalType::Int64,
                "labels" => LogicalType::List,
                "type" => LogicalType::String,
                _ => LogicalType::Any,
            },
            Self::List(_) => LogicalType::List,
        }
    }

    /// Evaluates the expression for every row of `chunk`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when an operator meets a value it cannot
    /// handle; the error aborts the query.
    pub fn evaluate(&self, chunk: &DataChunk, ctx: &EvalContext<'_>) -> OperatorResult<Vec<Value>> {
        let rows = chunk.row_count();
        match self {
            Self::Literal(v) => Ok(vec![v.clone(); rows]),
            Self::Column(i) => {
                let column = chunk.column(*i).ok_or(OperatorError::ColumnNotFound(*i))?;
                Ok((0..rows)
                    .map(|r| column.get_value(r).unwrap_or(Value::Null))
                    .collect())
            }
            Self::Property { column, key } => {
                let column = chunk
                    .column(*column)
                    .ok_or(OperatorError::ColumnNotFound(*column))?;
                Ok(read_property(column, key, ctx))
            }
            Self::Binary { left, op, right } => {
                let l = left.evaluate(chunk, ctx)?;
                let r = right.evaluate(chunk, ctx)?;
                let mut regex_cache = None;
                l.into_iter()
                    .zip(r)
                    .map(|(a, b)| self.apply_binary(*op, a, b, &mut regex_cache))
                    .collect()
            }
            Self::Unary { op, operand } => operand
                .evaluate(chunk, ctx)?
                .into_iter()
                .map(|v| self.apply_unary(*op, v))
                .collect(),
            Self::Function { name, args } => self.evaluate_function(name, args, chunk, ctx),
            Self::List(items) => {
                let columns = items
                    .iter()
                    .map(|e| e.evaluate(chunk, ctx))
                    .collect::<OperatorResult<Vec<_>>>()?;
                Ok((0..rows)
                    .map(|r| Value::list(columns.iter().map(|c| c[r].clone())))
                    .collect())
            }
        }
    }

    /// Evaluates the expression as a predicate: a row is selected only if
    /// the expression is `true`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the expression yields a non-boolean.
    pub fn evaluate_predicate(
        &self,
        chunk: &DataChunk,
        ctx: &EvalContext<'_>,
    ) -> OperatorResult<SelectionVector> {
        let values = self.evaluate(chunk, ctx)?;
        let mut selection = SelectionVector::new();
        for (row, value) in values.iter().enumerate() {
            match value {
                Value::Bool(true) => selection.push(row),
                Value::Bool(false) | Value::Null => {}
                other => return Err(self.mismatch("BOOLEAN", other)),
            }
        }
        Ok(selection)
    }

    fn mismatch(&self, expected: &str, found: &Value) -> OperatorError {
        OperatorError::TypeMismatch {
            context: self.to_string(),
            expected: expected.to_string(),
            found: found.type_name().to_string(),
        }
    }

    fn apply_binary(
        &self,
        op: BinaryOp,
        a: Value,
        b: Value,
        regex_cache: &mut Option<(Arc<str>, Regex)>,
    ) -> OperatorResult<Value> {
        match op {
            BinaryOp::And => return self.logic(a, b, |x, y| x && y, Some(false)),
            BinaryOp::Or => return self.logic(a, b, |x, y| x || y, Some(true)),
            BinaryOp::Xor => return self.logic(a, b, |x, y| x ^ y, None),
            _ => {}
        }
        if a.is_null() || b.is_null() {
            return Ok(if op == BinaryOp::In { self.membership(&a, &b)? } else { Value::Null });
        }
        match op {
            BinaryOp::Eq => Ok(Value::Bool(values_equal(&a, &b))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(&a, &b))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ord = a.compare(&b).ok_or_else(|| self.mismatch(a.type_name(), &b))?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                self.arithmetic(op, &a, &b)
            }
            BinaryOp::StartsWith | BinaryOp::EndsWith | BinaryOp::Contains => {
                let s = a.as_str().ok_or_else(|| self.mismatch("STRING", &a))?;
                let t = b.as_str().ok_or_else(|| self.mismatch("STRING", &b))?;
                Ok(Value::Bool(match op {
                    BinaryOp::StartsWith => s.starts_with(t),
                    BinaryOp::EndsWith => s.ends_with(t),
                    _ => s.contains(t),
                }))
            }
            BinaryOp::In => self.membership(&a, &b),
            BinaryOp::Regex => {
                let s = a.as_str().ok_or_else(|| self.mismatch("STRING", &a))?;
                let Value::String(pattern) = &b else {
                    return Err(self.mismatch("STRING", &b));
                };
                let cached = regex_cache.as_ref().is_some_and(|(p, _)| p == pattern);
                if !cached {
                    let re = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                        OperatorError::Core(Error::InvalidValue(format!(
                            "bad regular expression {pattern:?}: {e}"
                        )))
                    })?;
                    *regex_cache = Some((Arc::clone(pattern), re));
                }
                Ok(Value::Bool(
                    regex_cache.as_ref().is_some_and(|(_, re)| re.is_match(s)),
                ))
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => Ok(Value::Null),
        }
    }

    /// Three-valued logic; `dominant` is the value that decides the result
    /// regardless of the other (possibly null) operand.
    fn logic(
        &self,
        a: Value,
        b: Value,
        f: impl Fn(bool, bool) -> bool,
        dominant: Option<bool>,
    ) -> OperatorResult<Value> {
        let as_bool = |v: &Value| match v {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            other => Err(self.mismatch("BOOLEAN", other)),
        };
        let (x, y) = (as_bool(&a)?, as_bool(&b)?);
        Ok(match (x, y) {
            (Some(x), Some(y)) => Value::Bool(f(x, y)),
            (Some(v), None) | (None, Some(v)) if Some(v) == dominant => Value::Bool(v),
            _ => Value::Null,
        })
    }

    fn membership(&self, needle: &Value, haystack: &Value) -> OperatorResult<Value> {
        if haystack.is_null() {
            return Ok(Value::Null);
        }
        let items = haystack
            .as_list()
            .ok_or_else(|| self.mismatch("LIST", haystack))?;
        if needle.is_null() {
            return Ok(if items.is_empty() { Value::Bool(false) } else { Value::Null });
        }
        if items.iter().any(|item| values_equal(needle, item)) {
            Ok(Value::Bool(true))
        } else if items.iter().any(Value::is_null) {
            Ok(Value::Null)
        } else {
            Ok(Value::Bool(false))
        }
    }

    fn arithmetic(&self, op: BinaryOp, a: &Value, b: &Value) -> OperatorResult<Value> {
        let overflow = || {
            OperatorError::Core(Error::InvalidValue(format!(
                "integer overflow in {a} {} {b}",
                op.symbol()
            )))
        };
        match (a, b) {
            (Value::Int64(x), Value::Int64(y)) => {
                let (x, y) = (*x, *y);
                if matches!(op, BinaryOp::Div | BinaryOp::Mod) && y == 0 {
                    return Err(OperatorError::Core(Error::InvalidValue(format!(
                        "division by zero in {self}"
                    ))));
                }
                let result = match op {
                    BinaryOp::Add => x.checked_add(y),
                    BinaryOp::Sub => x.checked_sub(y),
                    BinaryOp::Mul => x.checked_mul(y),
                    BinaryOp::Div => x.checked_div(y),
                    _ => x.checked_rem(y),
                };
                result.map(Value::Int64).ok_or_else(overflow)
            }
            (Value::Int64(_) | Value::Float64(_), Value::Int64(_) | Value::Float64(_)) => {
                let (x, y) = (a.as_number().unwrap_or(0.0), b.as_number().unwrap_or(0.0));
                Ok(Value::Float64(match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    _ => x % y,
                }))
            }
            (Value::String(x), Value::String(y)) if op == BinaryOp::Add => {
                Ok(Value::from(format!("{x}{y}")))
            }
            (Value::List(x), Value::List(y)) if op == BinaryOp::Add => {
                Ok(Value::list(x.iter().chain(y.iter()).cloned()))
            }
            (Value::Int64(_) | Value::Float64(_), other) | (other, _) => {
                Err(self.mismatch("INT64 or FLOAT64", other))
            }
        }
    }

    fn apply_unary(&self, op: UnaryOp, v: Value) -> OperatorResult<Value> {
        match op {
            UnaryOp::IsNull => Ok(Value::Bool(v.is_null())),
            UnaryOp::IsNotNull => Ok(Value::Bool(!v.is_null())),
            UnaryOp::Not => match v {
                Value::Null => Ok(Value::Null),
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(self.mismatch("BOOLEAN", &other)),
            },
            UnaryOp::Neg => match v {
                Value::Null => Ok(Value::Null),
                Value::Int64(i) => i.checked_neg().map(Value::Int64).ok_or_else(|| {
                    OperatorError::Core(Error::InvalidValue(format!("integer overflow in -{i}")))
                }),
                Value::Float64(f) => Ok(Value::Float64(-f)),
                other => Err(self.mismatch("INT64 or FLOAT64", &other)),
            },
        }
    }

    fn evaluate_function(
        &self,
        name: &str,
        args: &[Expression],
        chunk: &DataChunk,
        ctx: &EvalContext<'_>,
    ) -> OperatorResult<Vec<Value>> {
        let lower = name.to_ascii_lowercase();
        if let ([Self::Column(c)], "id" | "labels" | "type") = (args, lower.as_str()) {
            let column = chunk.column(*c).ok_or(OperatorError::ColumnNotFound(*c))?;
            return Ok((0..chunk.row_count())
                .map(|r| entity_function(&lower, column.get_cell(r), ctx))
                .collect());
        }
        let columns = args
            .iter()
            .map(|a| a.evaluate(chunk, ctx))
            .collect::<OperatorResult<Vec<_>>>()?;
        let resolver = ctx
            .functions
            .ok_or_else(|| OperatorError::UnknownFunction(name.to_string()))?;
        let mut out = Vec::with_capacity(chunk.row_count());
        let mut row_args = Vec::with_capacity(columns.len());
        for r in 0..chunk.row_count() {
            row_args.clear();
            row_args.extend(columns.iter().map(|c| c[r].clone()));
            match resolver.call(&lower, &row_args) {
                Some(result) => out.push(result.map_err(|e| match e {
                    Error::TypeMismatch {
                        expected, found, ..
                    } => OperatorError::TypeMismatch {
                        context: self.to_string(),
                        expected,
                        found,
                    },
                    other => OperatorError::Core(other),
                })?),
                None => return Err(OperatorError::UnknownFunction(name.to_string())),
            }
        }
        Ok(out)
    }
}

fn entity_function(name: &str, cell: Option<Cell>, ctx: &EvalContext<'_>) -> Value {
    match (name, cell) {
        ("id", Some(Cell::Node(id))) => Value::Int64(id.as_u64() as i64),
        ("id", Some(Cell::Edge(id))) => Value::Int64(id.as_u64() as i64),
        ("labels", Some(Cell::Node(id))) => ctx
            .store
            .get_node(id, ctx.snapshot)
            .map_or(Value::Null, |n| {
                Value::list(n.labels.iter().map(|l| Value::String(Arc::clone(l))))
            }),
        ("type", Some(Cell::Edge(id))) => ctx
            .store
            .get_edge_record(id, ctx.snapshot)
            .and_then(|r| ctx.store.edge_type_name(r.edge_type))
            .map_or(Value::Null, Value::String),
        _ => Value::Null,
    }
}

/// Reads `key` for every row of an entity column, batched per column.
fn read_property(column: &ValueVector, key: &PropertyKey, ctx: &EvalContext<'_>) -> Vec<Value> {
    if let Some(ids) = column.node_ids() {
        let mut out = Vec::with_capacity(ids.len());
        ctx.store
            .node_property_batch(ids, key, ctx.snapshot, &mut out);
        return out;
    }
    (0..column.len())
        .map(|r| match column.get_cell(r) {
            Some(Cell::Edge(id)) => ctx
                .store
                .get_edge_property(id, key, ctx.snapshot)
                .unwrap_or(Value::Null),
            Some(Cell::Node(id)) => ctx
                .store
                .get_node_property(id, key, ctx.snapshot)
                .unwrap_or(Value::Null),
            Some(Cell::Value(Value::Map(m))) => m.get(key).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        })
        .collect()
}

/// Query equality: numbers compare across types, containers
/// structurally, and values of different types are unequal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match a.compare(b) {
        Some(ord) => ord == Ordering::Equal,
        None => matches!((a, b), (Value::Map(_), Value::Map(_))) && a == b,
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::Column(i) => write!(f, "#{i}"),
            Self::Property { column, key } => write!(f, "#{column}.{key}"),
            Self::Binary { left, op, right } => write!(f, "{left} {} {right}", op.symbol()),
            Self::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Self::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Self::List(items) => {
                write!(f, "[")?;
                for (i, a) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_common::mvcc::WriteSet;
    use quiver_common::types::{EpochId, NodeId, TxId};

    fn people() -> (LpgStore, Snapshot, Vec<NodeId>) {
        let store = LpgStore::new();
        let snap = Snapshot::new(EpochId::new(0), TxId::new(1));
        let mut ws = WriteSet::new();
        let ids = [("Alix", Some(30)), ("Gus", Some(25)), ("Vincent", None)]
            .into_iter()
            .map(|(name, age)| {
                let mut props = vec![(PropertyKey::new("name"), Value::from(name))];
                if let Some(age) = age {
                    props.push((PropertyKey::new("age"), Value::Int64(age)));
                }
                store.create_node(&snap, &mut ws, &["Person"], props).unwrap()
            })
            .collect();
        (store, snap, ids)
    }

    fn node_chunk(ids: &[NodeId]) -> DataChunk {
        DataChunk::from_columns(vec![ValueVector::from_nodes(ids.to_vec())])
    }

    #[test]
    fn test_property_comparison_with_nulls() {
        let (store, snap, ids) = people();
        let ctx = EvalContext {
            store: &store,
            snapshot: &snap,
            functions: None,
        };
        let expr = Expression::binary(
            Expression::property(0, "age"),
            BinaryOp::Gt,
            Expression::Literal(Value::Int64(26)),
        );
        let chunk = node_chunk(&ids);
        assert_eq!(
            expr.evaluate(&chunk, &ctx).unwrap(),
            vec![Value::Bool(true), Value::Bool(false), Value::Null]
        );
        let selected = expr.evaluate_predicate(&chunk, &ctx).unwrap();
        assert_eq!(selected.iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_type_mismatch_names_expression() {
        let (store, snap, ids) = people();
        let ctx = EvalContext {
            store: &store,
            snapshot: &snap,
            functions: None,
        };
        let expr = Expression::binary(
            Expression::property(0, "name"),
            BinaryOp::Lt,
            Expression::Literal(Value::Int64(3)),
        );
        let err = expr.evaluate(&node_chunk(&ids), &ctx).unwrap_err();
        assert!(matches!(
            err,
            OperatorError::TypeMismatch { ref context, .. } if context == "#0.name < 3"
        ));
    }

    #[test]
    fn test_three_valued_logic() {
        let (store, snap, _) = people();
        let ctx = EvalContext {
            store: &store,
            snapshot: &snap,
            functions: None,
        };
        let chunk = DataChunk::rows_only(1);
        let eval = |e: Expression| e.evaluate(&chunk, &ctx).unwrap()[0].clone();
        let null = || Expression::Literal(Value::Null);
        let t = || Expression::Literal(Value::Bool(true));
        let f = || Expression::Literal(Value::Bool(false));
        assert_eq!(eval(Expression::binary(null(), BinaryOp::And, f())), Value::Bool(false));
        assert_eq!(eval(Expression::binary(null(), BinaryOp::And, t())), Value::Null);
        assert_eq!(eval(Expression::binary(null(), BinaryOp::Or, t())), Value::Bool(true));
        assert_eq!(eval(Expression::unary(UnaryOp::IsNull, null())), Value::Bool(true));
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let (store, snap, _) = people();
        let ctx = EvalContext {
            store: &store,
            snapshot: &snap,
            functions: None,
        };
        let chunk = DataChunk::rows_only(1);
        let lit = |v: Value| Expression::Literal(v);
        let eval = |e: Expression| e.evaluate(&chunk, &ctx);
        assert_eq!(
            eval(Expression::binary(lit(Value::Int64(7)), BinaryOp::Div, lit(Value::Float64(2.0))))
                .unwrap()[0],
            Value::Float64(3.5)
        );
        assert!(eval(Expression::binary(lit(Value::Int64(1)), BinaryOp::Div, lit(Value::Int64(0)))).is_err());
        assert_eq!(
            eval(Expression::binary(lit(Value::from("Alix")), BinaryOp::Regex, lit(Value::from("A.*"))))
                .unwrap()[0],
            Value::Bool(true)
        );
        assert_eq!(
            eval(Expression::binary(
                lit(Value::Int64(2)),
                BinaryOp::In,
                lit(Value::list([Value::Float64(2.0), Value::Int64(3)]))
            ))
            .unwrap()[0],
            Value::Bool(true)
        );
    }

    #[test]
    fn test_entity_functions_and_resolver() {
        struct Double;
        impl FunctionResolver for Double {
            fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value>> {
                (name == "double").then(|| Ok(Value::Int64(args[0].as_int64().unwrap_or(0) * 2)))
            }
        }
        let (store, snap, ids) = people();
        let ctx = EvalContext {
            store: &store,
            snapshot: &snap,
            functions: Some(&Double),
        };
        let chunk = node_chunk(&ids[..1]);
        let labels = Expression::Function {
            name: "labels".into(),
            args: vec![Expression::Column(0)],
        };
        assert_eq!(
            labels.evaluate(&chunk, &ctx).unwrap(),
            vec![Value::list([Value::from("Person")])]
        );
        let double = Expression::Function {
            name: "DOUBLE".into(),
            args: vec![Expression::property(0, "age")],
        };
        assert_eq!(double.evaluate(&chunk, &ctx).unwrap(), vec![Value::Int64(60)]);
        let unknown = Expression::Function {
            name: "nope".into(),
            args: vec![],
        };
        assert!(matches!(
            unknown.evaluate(&chunk, &ctx),
            Err(OperatorError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_property_comparison_pattern() {
        let e = Expression::binary(
            Expression::Literal(Value::Int64(26)),
            BinaryOp::Lt,
            Expression::property(1, "age"),
        );
        let (column, key, op, value) = e.as_property_comparison().unwrap();
        assert_eq!((column, key.as_str(), op, value), (1, "age", CompareOp::Gt, &Value::Int64(26)));
    }
}
