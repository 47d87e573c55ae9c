//! Physical push operators.
//!
//! Operators are pushed chunks by their pipeline and push their output to
//! the next stage:
//!
//! **Streaming operators** (stay inside a pipeline):
//! - [`FilterOperator`] - Apply predicates
//! - [`ProjectOperator`] - Select/compute columns
//! - [`ExpandOperator`] - Traverse edges (the core of graph queries)
//! - [`HashProbeOperator`] - Probe side of a hash join
//! - [`NestedLoopJoinOperator`] / [`IndexNestedLoopJoinOperator`]
//! - [`DistinctOperator`], [`SkipOperator`], [`LimitOperator`]
//!
//! **Pipeline breakers** (sinks that end a pipeline):
//! - [`HashBuildSink`] - Build side of a hash join
//! - [`SortSink`] - ORDER BY with external merge on spill
//! - [`HashAggregateSink`] - GROUP BY with aggregation
//!
//! [`MergeJoinSource`] starts a pipeline from two sorted inputs.

mod aggregate;
mod distinct;
mod expand;
mod filter;
mod join;
mod limit;
mod project;
mod sort;

pub use aggregate::{AggregateExpr, AggregateFunction, HashAggregateSink};
pub use distinct::DistinctOperator;
pub use expand::ExpandOperator;
pub use filter::FilterOperator;
pub use join::{
    HashBuildSink, HashProbeOperator, IndexNestedLoopJoinOperator, JoinTable, MergeJoinSource,
    NestedLoopJoinOperator,
};
pub use limit::{LimitOperator, SkipOperator};
pub use project::ProjectOperator;
pub use sort::{NullOrder, SortDirection, SortKey, SortSink, SortedOutput, SortedSource, compare_rows};

use quiver_common::utils::error::Error;
use thiserror::Error;

/// Error during operator execution.
#[derive(Error, Debug)]
pub enum OperatorError {
    /// An expression met a value of the wrong type.
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Operator and expression that failed.
        context: String,
        /// Expected type name.
        expected: String,
        /// Found type name.
        found: String,
    },
    /// Column not found.
    #[error("column not found: #{0}")]
    ColumnNotFound(usize),
    /// A function name no registry knows.
    #[error("unknown function: {0}()")]
    UnknownFunction(String),
    /// The memory limit was reached and the operator could not spill.
    #[error("resource exhausted in {context}: requested {requested} bytes, {available} available")]
    ResourceExhausted {
        /// The operator.
        context: String,
        /// Bytes requested.
        requested: usize,
        /// Bytes available.
        available: usize,
    },
    /// The query was cancelled.
    #[error("query cancelled")]
    Cancelled,
    /// Execution error.
    #[error("execution error in {operator}: {message}")]
    Execution {
        /// The operator.
        operator: &'static str,
        /// What went wrong.
        message: String,
    },
    /// An error from storage, spilling or a registered function.
    #[error(transparent)]
    Core(#[from] Error),
}

impl OperatorError {
    /// Prefixes type-mismatch context with the operator name.
    #[must_use]
    pub fn in_operator(self, operator: &str) -> Self {
        match self {
            Self::TypeMismatch {
                context,
                expected,
                found,
            } => Self::TypeMismatch {
                context: format!("{operator}({context})"),
                expected,
                found,
            },
            other => other,
        }
    }

    /// An execution error for `operator`.
    pub fn execution(operator: &'static str, message: impl Into<String>) -> Self {
        Self::Execution {
            operator,
            message: message.into(),
        }
    }
}

impl From<OperatorError> for Error {
    fn from(e: OperatorError) -> Self {
        match e {
            OperatorError::TypeMismatch {
                context,
                expected,
                found,
            } => Error::TypeMismatch {
                context,
                expected,
                found,
            },
            OperatorError::ResourceExhausted {
                context,
                requested,
                available,
            } => Error::ResourceExhausted {
                context,
                requested,
                available,
            },
            OperatorError::Cancelled => Error::Cancelled,
            OperatorError::Core(e) => e,
            other => Error::Query(other.to_string()),
        }
    }
}

/// Result of running an operator step.
pub type OperatorResult<T = ()> = Result<T, OperatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_keeps_context() {
        let err = OperatorError::TypeMismatch {
            context: "#0.age > 26".to_string(),
            expected: "INT64".to_string(),
            found: "STRING".to_string(),
        }
        .in_operator("Filter");
        let err: Error = err.into();
        assert_eq!(
            err.to_string(),
            "type mismatch in Filter(#0.age > 26): expected INT64, found STRING"
        );
    }

    #[test]
    fn test_cancel_maps_to_cancelled() {
        assert!(matches!(Error::from(OperatorError::Cancelled), Error::Cancelled));
    }
}
