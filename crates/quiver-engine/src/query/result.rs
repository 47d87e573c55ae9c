//! Query results: a streaming cursor and its materialized form.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::Receiver;
use quiver_common::types::{Date, LogicalType, Timestamp, Value};
use quiver_common::utils::error::{Error, Result};
use quiver_core::execution::{DataChunk, ExecutionContext, QueryStats, ResultMessage};

/// Name and declared type of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type; `Any` when only execution can tell.
    pub data_type: LogicalType,
}

impl ColumnInfo {
    /// Creates column metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// One result row, addressable by position or column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    names: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// The value at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// The value of column `name`.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.names.iter().position(|n| n == name)?;
        self.values.get(index)
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Takes the values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true for a row without columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A cancellation handle for a running query.
///
/// Cheap to clone and usable from any thread. Cancelling is cooperative:
/// workers notice it at their next morsel boundary.
#[derive(Clone)]
pub struct QueryHandle {
    ctx: Arc<ExecutionContext>,
}

impl QueryHandle {
    pub(crate) fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    /// Requests cancellation. The cursor then ends with `Cancelled`.
    pub fn cancel(&self) {
        if !self.ctx.is_cancelled() {
            tracing::debug!("query cancellation requested");
        }
        self.ctx.cancel();
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// Execution counters so far.
    #[must_use]
    pub fn stats(&self) -> QueryStats {
        self.ctx.query_stats()
    }
}

impl fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A pull-based cursor over a running query.
///
/// Only the chunk being read is held here; further chunks wait in a
/// bounded queue, and producers block while it is full. Dropping the
/// cursor stops the query and waits for its workers to finish.
pub struct ResultStream {
    columns: Vec<ColumnInfo>,
    names: Arc<[String]>,
    receiver: Option<Receiver<ResultMessage>>,
    handle: QueryHandle,
    coordinator: Option<JoinHandle<()>>,
    chunk: Option<DataChunk>,
    position: usize,
    failed: bool,
}

impl ResultStream {
    pub(crate) fn new(
        columns: Vec<ColumnInfo>,
        receiver: Receiver<ResultMessage>,
        handle: QueryHandle,
        coordinator: JoinHandle<()>,
    ) -> Self {
        let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();
        Self {
            columns,
            names,
            receiver: Some(receiver),
            handle,
            coordinator: Some(coordinator),
            chunk: None,
            position: 0,
            failed: false,
        }
    }

    /// Result columns. Available before the first row.
    #[must_use]
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Result column names.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// A handle that cancels this query.
    #[must_use]
    pub fn handle(&self) -> QueryHandle {
        self.handle.clone()
    }

    /// Cancels this query.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Execution counters so far.
    #[must_use]
    pub fn stats(&self) -> QueryStats {
        self.handle.stats()
    }

    /// The next chunk of rows not yet returned, or `None` at the end.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the query.
    pub fn next_chunk(&mut self) -> Option<Result<DataChunk>> {
        if let Some(chunk) = self.chunk.take() {
            let rest = chunk.row_count() - self.position;
            let chunk = chunk.slice(self.position, rest);
            self.position = 0;
            if !chunk.is_empty() {
                return Some(Ok(chunk));
            }
        }
        self.receive()
    }

    /// Reads the rest of the stream into memory.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the query.
    pub fn into_result(mut self) -> Result<QueryResult> {
        let mut rows = Vec::new();
        while let Some(chunk) = self.next_chunk() {
            let chunk = chunk?;
            rows.extend(
                chunk
                    .rows()
                    .map(|row| row.into_iter().map(|c| c.into_value()).collect()),
            );
        }
        self.finish();
        Ok(QueryResult {
            columns: self.columns.clone(),
            rows,
            stats: self.stats(),
        })
    }

    /// The single value of a one-row, one-column result.
    ///
    /// # Errors
    ///
    /// Returns `Query` unless the result has exactly one row and one
    /// column, and `TypeMismatch` if the value does not convert to `T`.
    pub fn scalar<T: FromValue>(self) -> Result<T> {
        self.into_result()?.scalar()
    }

    fn receive(&mut self) -> Option<Result<DataChunk>> {
        if self.failed {
            return None;
        }
        loop {
            let message = self.receiver.as_ref()?.recv().ok();
            match message {
                Some(Ok(chunk)) if chunk.is_empty() => {}
                Some(Ok(chunk)) => return Some(Ok(chunk)),
                Some(Err(e)) => {
                    self.failed = true;
                    self.finish();
                    return Some(Err(e));
                }
                None => {
                    self.finish();
                    return None;
                }
            }
        }
    }

    /// Stops production and waits for the coordinator to exit.
    fn finish(&mut self) {
        self.receiver = None;
        if let Some(coordinator) = self.coordinator.take()
            && coordinator.join().is_err()
        {
            tracing::error!("query thread panicked");
        }
    }
}

impl Iterator for ResultStream {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = &self.chunk
                && self.position < chunk.row_count()
            {
                let values = chunk
                    .row(self.position)
                    .into_iter()
                    .map(|c| c.into_value())
                    .collect();
                self.position += 1;
                return Some(Ok(Row {
                    names: Arc::clone(&self.names),
                    values,
                }));
            }
            match self.receive()? {
                Ok(chunk) => {
                    self.chunk = Some(chunk);
                    self.position = 0;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        if self.coordinator.is_some() {
            self.handle.cancel();
            self.finish();
        }
    }
}

impl fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// A fully materialized query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Result columns.
    pub columns: Vec<ColumnInfo>,
    /// Rows in result order.
    pub rows: Vec<Vec<Value>>,
    /// Execution counters.
    pub stats: QueryStats,
}

impl QueryResult {
    /// Result column names.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The values of column `name`, in row order.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|c| c.name == name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// The single value of a one-row, one-column result.
    ///
    /// # Errors
    ///
    /// Returns `Query` unless the result has exactly one row and one
    /// column, and `TypeMismatch` if the value does not convert to `T`.
    pub fn scalar<T: FromValue>(self) -> Result<T> {
        match (self.columns.len(), self.rows.len()) {
            (1, 1) => {}
            (columns, rows) => {
                return Err(Error::Query(format!(
                    "scalar() needs 1 row and 1 column, got {rows} row(s) and {columns} column(s)"
                )));
            }
        }
        let value = self
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or(Value::Null);
        T::from_value(value)
    }
}

/// Conversion from a result value.
pub trait FromValue: Sized {
    /// Converts `value`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `value` has another type.
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: &str, found: &Value) -> Error {
    Error::TypeMismatch {
        context: "scalar()".to_string(),
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        value.as_int64().ok_or_else(|| mismatch("INT64", &value))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        value.as_number().ok_or_else(|| mismatch("FLOAT64", &value))
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("BOOL", &value))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch("STRING", &value))
    }
}

impl FromValue for Date {
    fn from_value(value: Value) -> Result<Self> {
        value.as_date().ok_or_else(|| mismatch("DATE", &value))
    }
}

impl FromValue for Timestamp {
    fn from_value(value: Value) -> Result<Self> {
        value.as_datetime().ok_or_else(|| mismatch("DATETIME", &value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult {
            columns: vec![ColumnInfo::new("x", LogicalType::Any)],
            rows,
            stats: QueryStats::default(),
        }
    }

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(result(vec![vec![Value::Int64(3)]]).scalar::<i64>().unwrap(), 3);
        assert!((result(vec![vec![Value::Int64(3)]]).scalar::<f64>().unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(result(vec![vec![Value::Null]]).scalar::<Option<i64>>().unwrap(), None);
        assert_eq!(
            result(vec![vec![Value::from("a")]]).scalar::<String>().unwrap(),
            "a"
        );
    }

    #[test]
    fn test_scalar_rejects_wrong_shape_or_type() {
        assert!(matches!(result(vec![]).scalar::<i64>(), Err(Error::Query(_))));
        assert!(matches!(
            result(vec![vec![Value::Int64(1)], vec![Value::Int64(2)]]).scalar::<i64>(),
            Err(Error::Query(_))
        ));
        assert!(matches!(
            result(vec![vec![Value::from("a")]]).scalar::<i64>(),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_row_access_by_name() {
        let row = Row {
            names: Arc::from(vec!["a".to_string(), "b".to_string()]),
            values: vec![Value::Int64(1), Value::Bool(true)],
        };
        assert_eq!(row.get_by_name("b"), Some(&Value::Bool(true)));
        assert_eq!(row.get(0), Some(&Value::Int64(1)));
        assert_eq!(row.get_by_name("c"), None);
    }
}
