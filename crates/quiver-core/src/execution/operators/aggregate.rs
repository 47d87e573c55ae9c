//! Hash aggregation.
//!
//! [`HashAggregateSink`] groups its input on key columns and folds each
//! group's [`AggregateExpr`]s. The finished groups are written to a
//! [`ChunkBuffer`] read by the next pipeline: key columns first, then one
//! column per aggregate.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use quiver_common::memory::MemoryGrant;
use quiver_common::types::{LogicalType, Value};
use quiver_common::utils::error::Error;

use super::{OperatorError, OperatorResult};
use crate::execution::chunk::{DEFAULT_CHUNK_SIZE, DataChunk};
use crate::execution::context::ExecutionContext;
use crate::execution::expression::Expression;
use crate::execution::pipeline::Sink;
use crate::execution::sink::ChunkBuffer;
use crate::execution::vector::{Cell, CellKey};

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    /// `count(*)`: rows in the group.
    CountStar,
    /// `count(x)`: non-null values.
    Count,
    /// Sum of numbers; `0` for no values.
    Sum,
    /// Average; null for no values.
    Avg,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Non-null values as a list.
    Collect,
}

impl AggregateFunction {
    /// The function's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CountStar | Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Collect => "collect",
        }
    }

    /// Looks a function up by (case-insensitive) name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "collect" => Some(Self::Collect),
            _ => None,
        }
    }

    /// The result type given the input type.
    #[must_use]
    pub fn result_type(self, input: LogicalType) -> LogicalType {
        match self {
            Self::CountStar | Self::Count => LogicalType::Int64,
            Self::Avg => LogicalType::Float64,
            Self::Sum if input.is_numeric() => input,
            Self::Sum => LogicalType::Any,
            Self::Min | Self::Max => input,
            Self::Collect => LogicalType::List,
        }
    }
}

/// One aggregate of a [`HashAggregateSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    /// The function.
    pub function: AggregateFunction,
    /// Its argument; `None` only for `count(*)`.
    pub input: Option<Expression>,
    /// Folds only distinct argument values.
    pub distinct: bool,
}

impl AggregateExpr {
    /// `count(*)`.
    #[must_use]
    pub fn count_star() -> Self {
        Self {
            function: AggregateFunction::CountStar,
            input: None,
            distinct: false,
        }
    }

    /// `function(input)`.
    #[must_use]
    pub fn new(function: AggregateFunction, input: Expression) -> Self {
        Self {
            function,
            input: Some(input),
            distinct: false,
        }
    }

    /// `function(DISTINCT input)`.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    SumInt(i64),
    SumFloat(f64),
    Avg { sum: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Collect(Vec<Value>),
}

impl Accumulator {
    fn new(function: AggregateFunction) -> Self {
        match function {
            AggregateFunction::CountStar | AggregateFunction::Count => Self::Count(0),
            AggregateFunction::Sum => Self::SumInt(0),
            AggregateFunction::Avg => Self::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => Self::Min(None),
            AggregateFunction::Max => Self::Max(None),
            AggregateFunction::Collect => Self::Collect(Vec::new()),
        }
    }

    fn update(&mut self, value: &Value) -> OperatorResult {
        if value.is_null() {
            return Ok(());
        }
        let not_numeric = |function: &str| OperatorError::TypeMismatch {
            context: format!("{function}()"),
            expected: "INT64 or FLOAT64".to_string(),
            found: value.type_name().to_string(),
        };
        match self {
            Self::Count(n) => *n += 1,
            Self::SumInt(total) => match value {
                Value::Int64(i) => {
                    *total = total.checked_add(*i).ok_or_else(|| {
                        OperatorError::Core(Error::InvalidValue("integer overflow in sum()".to_string()))
                    })?;
                }
                Value::Float64(f) => *self = Self::SumFloat(*total as f64 + f),
                _ => return Err(not_numeric("sum")),
            },
            Self::SumFloat(total) => *total += value.as_number().ok_or_else(|| not_numeric("sum"))?,
            Self::Avg { sum, count } => {
                *sum += value.as_number().ok_or_else(|| not_numeric("avg"))?;
                *count += 1;
            }
            Self::Min(current) => {
                if current.as_ref().is_none_or(|c| value.total_cmp(c).is_lt()) {
                    *current = Some(value.clone());
                }
            }
            Self::Max(current) => {
                if current.as_ref().is_none_or(|c| value.total_cmp(c).is_gt()) {
                    *current = Some(value.clone());
                }
            }
            Self::Collect(values) => values.push(value.clone()),
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Self::Count(n) | Self::SumInt(n) => Value::Int64(n),
            Self::SumFloat(f) => Value::Float64(f),
            Self::Avg { count: 0, .. } => Value::Null,
            Self::Avg { sum, count } => Value::Float64(sum / count as f64),
            Self::Min(v) | Self::Max(v) => v.unwrap_or(Value::Null),
            Self::Collect(values) => Value::list(values),
        }
    }
}

struct Group {
    keys: Vec<Cell>,
    accumulators: Vec<Accumulator>,
    seen: Vec<Option<HashSet<CellKey>>>,
}

struct AggregateState {
    groups: HashMap<Vec<CellKey>, Group>,
    key_types: Option<Vec<LogicalType>>,
    grant: MemoryGrant,
}

/// GROUP BY with aggregation. Aggregation does not spill; a group table
/// that outgrows the memory budget fails the query with
/// `ResourceExhausted`.
pub struct HashAggregateSink {
    group_columns: Vec<usize>,
    aggregates: Vec<AggregateExpr>,
    output: Arc<ChunkBuffer>,
    state: Mutex<Option<AggregateState>>,
}

impl HashAggregateSink {
    /// Groups on `group_columns` and writes the groups to `output`.
    #[must_use]
    pub fn new(group_columns: Vec<usize>, aggregates: Vec<AggregateExpr>, output: Arc<ChunkBuffer>) -> Self {
        Self {
            group_columns,
            aggregates,
            output,
            state: Mutex::new(None),
        }
    }

    fn new_group(&self, keys: Vec<Cell>) -> Group {
        Group {
            keys,
            accumulators: self.aggregates.iter().map(|a| Accumulator::new(a.function)).collect(),
            seen: self
                .aggregates
                .iter()
                .map(|a| a.distinct.then(HashSet::new))
                .collect(),
        }
    }

    fn result_types(&self, key_types: &[LogicalType]) -> Vec<LogicalType> {
        key_types
            .iter()
            .copied()
            .chain(self.aggregates.iter().map(|a| match a.function {
                AggregateFunction::CountStar | AggregateFunction::Count => LogicalType::Int64,
                _ => LogicalType::Any,
            }))
            .collect()
    }
}

impl Sink for HashAggregateSink {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext) -> OperatorResult {
        let eval = ctx.eval();
        let inputs = self
            .aggregates
            .iter()
            .map(|a| match &a.input {
                Some(expr) => expr
                    .evaluate(&chunk, &eval)
                    .map(Some)
                    .map_err(|e| e.in_operator("Aggregate")),
                None => Ok(None),
            })
            .collect::<OperatorResult<Vec<_>>>()?;

        let mut guard = self.state.lock();
        let state = guard.get_or_insert_with(|| AggregateState {
            groups: HashMap::new(),
            key_types: None,
            grant: ctx.execution_grant(),
        });
        if state.key_types.is_none() {
            state.key_types = Some(
                self.group_columns
                    .iter()
                    .map(|c| chunk.column(*c).map_or(LogicalType::Any, |v| v.data_type()))
                    .collect(),
            );
        }
        let star = Value::Bool(true);
        for row in 0..chunk.row_count() {
            let cells = self
                .group_columns
                .iter()
                .map(|c| {
                    chunk
                        .column(*c)
                        .and_then(|v| v.get_cell(row))
                        .ok_or(OperatorError::ColumnNotFound(*c))
                })
                .collect::<OperatorResult<Vec<Cell>>>()?;
            let key: Vec<CellKey> = cells.iter().map(Cell::key).collect();
            if !state.groups.contains_key(&key) {
                let bytes = cells.iter().map(Cell::estimated_size).sum::<usize>()
                    + self.aggregates.len() * std::mem::size_of::<Accumulator>()
                    + 64;
                if !state.grant.try_grow(bytes) {
                    return Err(OperatorError::ResourceExhausted {
                        context: "Aggregate".to_string(),
                        requested: bytes,
                        available: ctx.memory().available().unwrap_or(0),
                    });
                }
                state.groups.insert(key.clone(), self.new_group(cells));
            }
            let Some(group) = state.groups.get_mut(&key) else {
                continue;
            };
            for (i, aggregate) in self.aggregates.iter().enumerate() {
                let value = match &inputs[i] {
                    Some(values) => &values[row],
                    None => &star,
                };
                if let Some(seen) = group.seen[i].as_mut() {
                    if value.is_null() || !seen.insert(Cell::Value(value.clone()).key()) {
                        continue;
                    }
                }
                if aggregate.function == AggregateFunction::CountStar {
                    if let Accumulator::Count(n) = &mut group.accumulators[i] {
                        *n += 1;
                    }
                } else {
                    group.accumulators[i].update(value)?;
                }
            }
        }
        Ok(())
    }

    fn finalize(&self, ctx: &ExecutionContext) -> OperatorResult {
        let state = self.state.lock().take();
        let (mut groups, key_types) = match state {
            Some(s) => (s.groups, s.key_types.unwrap_or_default()),
            None => (HashMap::new(), vec![LogicalType::Any; self.group_columns.len()]),
        };
        // A global aggregate over no rows still yields one row.
        if self.group_columns.is_empty() && groups.is_empty() {
            groups.insert(Vec::new(), self.new_group(Vec::new()));
        }
        let types = self.result_types(&key_types);
        let mut rows = Vec::with_capacity(DEFAULT_CHUNK_SIZE.min(groups.len()));
        for group in groups.into_values() {
            let mut row = group.keys;
            row.extend(group.accumulators.into_iter().map(|a| Cell::Value(a.finish())));
            rows.push(row);
            if rows.len() >= DEFAULT_CHUNK_SIZE {
                self.output.push(DataChunk::from_rows(&types, rows.drain(..)));
            }
        }
        if !rows.is_empty() {
            self.output.push(DataChunk::from_rows(&types, rows));
        }
        tracing::trace!(groups = self.output.row_count(), snapshot = ?ctx.snapshot(), "aggregate finished");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Aggregate"
    }
}
