//! Logical types for columns, vectors and result metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared type of a column or expression.
///
/// `Node` and `Edge` columns carry entity references; every other variant
/// corresponds to a [`Value`](super::Value) variant. `Any` is used when a
/// column may hold mixed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LogicalType {
    /// Type is unknown or mixed.
    #[default]
    Any,
    /// Only nulls.
    Null,
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// UTF-8 string.
    String,
    /// Calendar date.
    Date,
    /// Timestamp.
    DateTime,
    /// List of values.
    List,
    /// String-keyed map of values.
    Map,
    /// Reference to a node.
    Node,
    /// Reference to an edge.
    Edge,
}

impl LogicalType {
    /// Returns true for numeric types.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }

    /// Returns true for entity reference types.
    #[must_use]
    pub const fn is_entity(self) -> bool {
        matches!(self, Self::Node | Self::Edge)
    }

    /// Returns the common type of two column types, widening to `Any`
    /// when they disagree.
    #[must_use]
    pub fn unify(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Null, b) => b,
            (a, Self::Null) => a,
            (Self::Int64, Self::Float64) | (Self::Float64, Self::Int64) => Self::Float64,
            _ => Self::Any,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "ANY",
            Self::Null => "NULL",
            Self::Bool => "BOOLEAN",
            Self::Int64 => "INT64",
            Self::Float64 => "FLOAT64",
            Self::String => "STRING",
            Self::Date => "DATE",
            Self::DateTime => "DATETIME",
            Self::List => "LIST",
            Self::Map => "MAP",
            Self::Node => "NODE",
            Self::Edge => "EDGE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unify() {
        assert_eq!(LogicalType::Int64.unify(LogicalType::Int64), LogicalType::Int64);
        assert_eq!(LogicalType::Null.unify(LogicalType::String), LogicalType::String);
        assert_eq!(LogicalType::Int64.unify(LogicalType::Float64), LogicalType::Float64);
        assert_eq!(LogicalType::Bool.unify(LogicalType::String), LogicalType::Any);
    }
}
