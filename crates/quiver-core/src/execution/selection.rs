//! SelectionVector for filtering rows without copying columns.

/// Indices of the rows of a chunk that survive a filter, in row order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionVector {
    indices: Vec<u32>,
}

impl SelectionVector {
    /// Creates an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects every row of a chunk with `count` rows.
    #[must_use]
    pub fn all(count: usize) -> Self {
        Self {
            indices: (0..count as u32).collect(),
        }
    }

    /// Selects the rows for which `predicate` holds.
    #[must_use]
    pub fn from_predicate<F>(count: usize, predicate: F) -> Self
    where
        F: Fn(usize) -> bool,
    {
        Self {
            indices: (0..count)
                .filter(|&i| predicate(i))
                .map(|i| i as u32)
                .collect(),
        }
    }

    /// Selects the rows whose mask entry is true.
    #[must_use]
    pub fn from_mask(mask: &[bool]) -> Self {
        Self::from_predicate(mask.len(), |i| mask[i])
    }

    /// Adds a row index. Indices must be pushed in increasing order.
    pub fn push(&mut self, index: usize) {
        debug_assert!(self.indices.last().is_none_or(|&l| (l as usize) < index));
        self.indices.push(index as u32);
    }

    /// Number of selected rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The `i`-th selected row.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<usize> {
        self.indices.get(i).map(|&r| r as usize)
    }

    /// Returns true if `row` is selected.
    #[must_use]
    pub fn contains(&self, row: usize) -> bool {
        self.indices.binary_search(&(row as u32)).is_ok()
    }

    /// Keeps the selected rows for which `predicate` also holds.
    #[must_use]
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(usize) -> bool,
    {
        Self {
            indices: self
                .indices
                .iter()
                .copied()
                .filter(|&r| predicate(r as usize))
                .collect(),
        }
    }

    /// Iterates the selected rows.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().map(|&r| r as usize)
    }

    /// Truncates the selection to its first `len` rows.
    pub fn truncate(&mut self, len: usize) {
        self.indices.truncate(len);
    }
}
