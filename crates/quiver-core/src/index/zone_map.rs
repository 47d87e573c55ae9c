//! Zone maps: per-block min/max summaries used to skip blocks.
//!
//! A zone map answers "can any row of this block satisfy `x <op> v`?".
//! It may answer yes when the true answer is no, never the reverse.

use std::cmp::Ordering;

use quiver_common::types::Value;
use serde::{Deserialize, Serialize};

/// Comparison operator for zone map checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Equal to value.
    Eq,
    /// Not equal to value.
    Ne,
    /// Less than value.
    Lt,
    /// Less than or equal to value.
    Le,
    /// Greater than value.
    Gt,
    /// Greater than or equal to value.
    Ge,
}

impl CompareOp {
    /// The operator with operands swapped (`a < b` iff `b > a`).
    #[must_use]
    pub const fn flip(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }
}

/// Summary of the values in one block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneMapEntry {
    /// Smallest non-null value.
    pub min: Option<Value>,
    /// Largest non-null value.
    pub max: Option<Value>,
    /// Number of null rows.
    pub null_count: usize,
    /// Number of rows.
    pub row_count: usize,
    /// False if the block mixes incomparable types; such blocks are never
    /// skipped.
    pub comparable: bool,
}

impl ZoneMapEntry {
    /// Creates an empty entry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            comparable: true,
            ..Self::default()
        }
    }

    /// Builds an entry over `values`.
    #[must_use]
    pub fn build<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let mut entry = Self::new();
        for v in values {
            entry.observe(v);
        }
        entry
    }

    /// Folds one more value into the summary.
    pub fn observe(&mut self, value: &Value) {
        self.row_count += 1;
        if value.is_null() {
            self.null_count += 1;
            return;
        }
        if !self.comparable {
            return;
        }
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => match (value.compare(min), value.compare(max)) {
                (Some(lo), Some(hi)) => {
                    if lo == Ordering::Less {
                        self.min = Some(value.clone());
                    }
                    if hi == Ordering::Greater {
                        self.max = Some(value.clone());
                    }
                }
                _ => {
                    self.comparable = false;
                    self.min = None;
                    self.max = None;
                }
            },
            _ => {
                self.min = Some(value.clone());
                self.max = Some(value.clone());
            }
        }
    }

    /// Returns true if every row is null.
    #[must_use]
    pub fn all_null(&self) -> bool {
        self.row_count == self.null_count
    }

    /// Returns false only if no row can satisfy `x <op> value`.
    ///
    /// Nulls never satisfy a comparison, so an all-null block is skipped.
    #[must_use]
    pub fn might_match(&self, op: CompareOp, value: &Value) -> bool {
        if value.is_null() || (self.all_null() && self.row_count > 0) {
            return false;
        }
        if !self.comparable {
            return true;
        }
        let (Some(min), Some(max)) = (&self.min, &self.max) else {
            return self.row_count > 0;
        };
        let (Some(vs_min), Some(vs_max)) = (value.compare(min), value.compare(max)) else {
            // Comparing across types; let the evaluator decide.
            return true;
        };
        match op {
            CompareOp::Eq => vs_min != Ordering::Less && vs_max != Ordering::Greater,
            CompareOp::Ne => !(vs_min == Ordering::Equal && vs_max == Ordering::Equal),
            // some x < value  iff  min < value
            CompareOp::Lt => vs_min == Ordering::Greater,
            CompareOp::Le => vs_min != Ordering::Less,
            CompareOp::Gt => vs_max == Ordering::Less,
            CompareOp::Ge => vs_max != Ordering::Greater,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ages() -> ZoneMapEntry {
        ZoneMapEntry::build(&[Value::Int64(20), Value::Null, Value::Int64(30), Value::Int64(25)])
    }

    #[test]
    fn test_build() {
        let zm = ages();
        assert_eq!(zm.min, Some(Value::Int64(20)));
        assert_eq!(zm.max, Some(Value::Int64(30)));
        assert_eq!(zm.null_count, 1);
        assert_eq!(zm.row_count, 4);
    }

    #[test]
    fn test_range_checks() {
        let zm = ages();
        assert!(zm.might_match(CompareOp::Gt, &Value::Int64(26)));
        assert!(!zm.might_match(CompareOp::Gt, &Value::Int64(30)));
        assert!(zm.might_match(CompareOp::Ge, &Value::Int64(30)));
        assert!(!zm.might_match(CompareOp::Lt, &Value::Int64(20)));
        assert!(zm.might_match(CompareOp::Le, &Value::Int64(20)));
        assert!(!zm.might_match(CompareOp::Eq, &Value::Int64(31)));
        assert!(zm.might_match(CompareOp::Eq, &Value::Float64(22.5)));
    }

    #[test]
    fn test_ne_skips_constant_block() {
        let zm = ZoneMapEntry::build(&[Value::from("x"), Value::from("x")]);
        assert!(!zm.might_match(CompareOp::Ne, &Value::from("x")));
        assert!(zm.might_match(CompareOp::Ne, &Value::from("y")));
    }

    #[test]
    fn test_mixed_and_null_blocks() {
        let mixed = ZoneMapEntry::build(&[Value::Int64(1), Value::from("a")]);
        assert!(!mixed.comparable);
        assert!(mixed.might_match(CompareOp::Gt, &Value::Int64(100)));

        let nulls = ZoneMapEntry::build(&[Value::Null, Value::Null]);
        assert!(!nulls.might_match(CompareOp::Eq, &Value::Int64(1)));

        // Cross-type predicates are never pruned
        assert!(ages().might_match(CompareOp::Eq, &Value::from("20")));
    }
}
