//! DataChunk for batched tuple processing.

use quiver_common::types::LogicalType;

use super::selection::SelectionVector;
use super::vector::{Cell, ValueVector};

/// Default chunk size (number of tuples).
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// A chunk of data containing multiple columns.
///
/// DataChunk is the unit every push operator consumes and produces. Chunks
/// are always flat: filtering gathers the surviving rows into a new chunk
/// instead of carrying a selection along.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChunk {
    columns: Vec<ValueVector>,
    count: usize,
}

impl DataChunk {
    /// Creates a new empty data chunk with the given schema.
    #[must_use]
    pub fn new(column_types: &[LogicalType]) -> Self {
        Self::with_capacity(column_types, DEFAULT_CHUNK_SIZE)
    }

    /// Creates a new empty data chunk with the given schema and capacity.
    #[must_use]
    pub fn with_capacity(column_types: &[LogicalType], capacity: usize) -> Self {
        Self {
            columns: column_types
                .iter()
                .map(|t| ValueVector::with_capacity(*t, capacity))
                .collect(),
            count: 0,
        }
    }

    /// Creates a chunk from equally long columns.
    #[must_use]
    pub fn from_columns(columns: Vec<ValueVector>) -> Self {
        let count = columns.first().map_or(0, ValueVector::len);
        debug_assert!(columns.iter().all(|c| c.len() == count));
        Self { columns, count }
    }

    /// Builds a chunk of `types` from rows.
    #[must_use]
    pub fn from_rows(types: &[LogicalType], rows: impl IntoIterator<Item = Vec<Cell>>) -> Self {
        let rows = rows.into_iter();
        let mut chunk = Self::with_capacity(types, rows.size_hint().0);
        for row in rows {
            chunk.push_row(row);
        }
        chunk
    }

    /// A chunk of `count` rows without columns. Used for aggregates over
    /// nothing but the row count.
    #[must_use]
    pub fn rows_only(count: usize) -> Self {
        Self {
            columns: Vec::new(),
            count,
        }
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.count
    }

    /// Returns true if the chunk has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Gets a column by index.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&ValueVector> {
        self.columns.get(index)
    }

    /// All columns.
    #[must_use]
    pub fn columns(&self) -> &[ValueVector] {
        &self.columns
    }

    /// Takes the columns out of the chunk.
    #[must_use]
    pub fn into_columns(self) -> Vec<ValueVector> {
        self.columns
    }

    /// The column types.
    #[must_use]
    pub fn types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(ValueVector::data_type).collect()
    }

    /// Appends a row. `row` must have one cell per column.
    pub fn push_row(&mut self, row: impl IntoIterator<Item = Cell>) {
        for (column, cell) in self.columns.iter_mut().zip(row) {
            column.push_cell(cell);
        }
        self.count += 1;
    }

    /// The cells of one row.
    #[must_use]
    pub fn row(&self, index: usize) -> Vec<Cell> {
        self.columns
            .iter()
            .filter_map(|c| c.get_cell(index))
            .collect()
    }

    /// Iterates the rows as cell vectors.
    pub fn rows(&self) -> impl Iterator<Item = Vec<Cell>> + '_ {
        (0..self.count).map(|i| self.row(i))
    }

    /// Gathers the selected rows into a new chunk.
    #[must_use]
    pub fn select(&self, selection: &SelectionVector) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| c.take(selection.iter()))
                .collect(),
            count: selection.len(),
        }
    }

    /// Rows `start..start + len` as a new chunk.
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> Self {
        let end = (start + len).min(self.count);
        let start = start.min(end);
        Self {
            columns: self.columns.iter().map(|c| c.take(start..end)).collect(),
            count: end - start,
        }
    }

    /// Appends the rows of a chunk with the same schema.
    pub fn append(&mut self, other: &Self) {
        for (a, b) in self.columns.iter_mut().zip(&other.columns) {
            a.extend_from(b);
        }
        self.count += other.count;
    }

    /// Appends a column; its length must match the row count.
    pub fn add_column(&mut self, column: ValueVector) {
        debug_assert!(self.columns.is_empty() || column.len() == self.count);
        if self.columns.is_empty() {
            self.count = column.len();
        }
        self.columns.push(column);
    }

    /// Rough in-memory footprint in bytes.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        self.columns.iter().map(ValueVector::estimated_size).sum::<usize>() + 32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_common::types::{NodeId, Value};

    fn sample() -> DataChunk {
        let mut chunk = DataChunk::new(&[LogicalType::Node, LogicalType::Int64]);
        for i in 0..5 {
            chunk.push_row([Cell::Node(NodeId::new(i)), Cell::Value(Value::Int64(i as i64 * 10))]);
        }
        chunk
    }

    #[test]
    fn test_push_and_read_rows() {
        let chunk = sample();
        assert_eq!(chunk.row_count(), 5);
        assert_eq!(
            chunk.row(2),
            vec![Cell::Node(NodeId::new(2)), Cell::Value(Value::Int64(20))]
        );
        assert_eq!(chunk.types(), vec![LogicalType::Node, LogicalType::Int64]);
    }

    #[test]
    fn test_select_and_slice() {
        let chunk = sample();
        let selected = chunk.select(&SelectionVector::from_predicate(5, |i| i >= 3));
        assert_eq!(selected.row_count(), 2);
        assert_eq!(selected.column(0).unwrap().get_node_id(0), Some(NodeId::new(3)));

        let sliced = chunk.slice(4, 10);
        assert_eq!(sliced.row_count(), 1);
        assert_eq!(chunk.slice(9, 2).row_count(), 0);
    }

    #[test]
    fn test_append() {
        let mut a = sample();
        a.append(&sample());
        assert_eq!(a.row_count(), 10);
        assert_eq!(a.column(1).unwrap().len(), 10);
    }
}
