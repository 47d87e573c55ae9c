//! Dictionary encoding for low-cardinality strings.
//!
//! Each distinct string is stored once; rows hold a bit-packed code into
//! the dictionary. Equality predicates can be answered on codes alone via
//! [`DictionaryEncoding::code_of`].

use std::sync::Arc;

use quiver_common::utils::hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::bitpack::BitPackedInts;

/// A dictionary-encoded string sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEncoding {
    dictionary: Vec<Arc<str>>,
    codes: BitPackedInts,
}

impl DictionaryEncoding {
    /// Returns the string at row `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<str>> {
        let code = self.codes.get(index)?;
        self.dictionary.get(code as usize)
    }

    /// Returns the code assigned to `value`, if it occurs.
    #[must_use]
    pub fn code_of(&self, value: &str) -> Option<u32> {
        self.dictionary
            .iter()
            .position(|s| s.as_ref() == value)
            .map(|p| p as u32)
    }

    /// Returns the code at row `index`.
    #[must_use]
    pub fn code_at(&self, index: usize) -> Option<u32> {
        self.codes.get(index).map(|c| c as u32)
    }

    /// The distinct strings, in code order.
    #[must_use]
    pub fn dictionary(&self) -> &[Arc<str>] {
        &self.dictionary
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Approximate bytes used.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.dictionary.iter().map(|s| s.len() + 16).sum::<usize>() + self.codes.size_bytes()
    }
}

/// Builds a [`DictionaryEncoding`] row by row.
#[derive(Debug, Default)]
pub struct DictionaryBuilder {
    lookup: FxHashMap<Arc<str>, u32>,
    dictionary: Vec<Arc<str>>,
    codes: Vec<u64>,
}

impl DictionaryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row.
    pub fn push(&mut self, value: &Arc<str>) {
        let code = match self.lookup.get(value) {
            Some(&code) => code,
            None => {
                let code = self.dictionary.len() as u32;
                self.dictionary.push(Arc::clone(value));
                self.lookup.insert(Arc::clone(value), code);
                code
            }
        };
        self.codes.push(u64::from(code));
    }

    /// Number of distinct strings so far.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.dictionary.len()
    }

    /// Finishes encoding.
    #[must_use]
    pub fn build(self) -> DictionaryEncoding {
        DictionaryEncoding {
            codes: BitPackedInts::pack(&self.codes),
            dictionary: self.dictionary,
        }
    }
}
