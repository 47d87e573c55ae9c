//! Error types shared by every Quiver crate.
//!
//! Errors are grouped by who has to react to them: [`TransactionError`]
//! aborts only the owning transaction, [`StorageError`] comes from disk or a
//! storage backend, and the remaining top-level variants abort the query
//! that raised them. Every variant carries enough context (operator, key,
//! value, transaction) to be diagnosed from the message alone.

use thiserror::Error;

use crate::types::{EdgeId, NodeId, TxId};

/// The main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// An expression was evaluated against an incompatible value.
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Operator or expression that failed.
        context: String,
        /// Expected type.
        expected: String,
        /// Actual type.
        found: String,
    },

    /// A node with live incident edges was deleted without cascade.
    #[error("cannot delete node {node}: it still has {edges} incident edge(s), use a detaching delete")]
    EdgeConstraintViolation {
        /// The node being deleted.
        node: NodeId,
        /// Number of visible incident edges.
        edges: usize,
    },

    /// The memory limit was reached and the operation could not spill.
    #[error("resource exhausted in {context}: requested {requested} bytes, {available} available")]
    ResourceExhausted {
        /// Operator or operation that ran out of memory.
        context: String,
        /// Bytes requested.
        requested: usize,
        /// Bytes still available under the limit.
        available: usize,
    },

    /// The query was cancelled.
    #[error("query cancelled")]
    Cancelled,

    /// Node not found.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Edge not found.
    #[error("edge not found: {0}")]
    EdgeNotFound(EdgeId),

    /// Transaction error.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Query planning or execution error that is not a type error.
    #[error("query error: {0}")]
    Query(String),

    /// Invalid value or argument.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal invariant broken.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a type mismatch error.
    pub fn type_mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            context: context.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Returns true for commit-time write conflicts; the caller may retry
    /// in a new transaction.
    #[must_use]
    pub const fn is_write_conflict(&self) -> bool {
        matches!(self, Self::Transaction(TransactionError::WriteConflict { .. }))
    }

    /// Returns true if the error indicates on-disk corruption.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Corruption(_)))
    }
}

/// Transaction-level errors. These abort the transaction, not the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// First-committer-wins validation failed.
    #[error("write conflict: {tx_id} lost on {key}, retry in a new transaction")]
    WriteConflict {
        /// The aborted transaction.
        tx_id: TxId,
        /// The conflicting key.
        key: String,
    },

    /// Operation not valid in the current transaction state.
    #[error("invalid transaction state: {0}")]
    InvalidState(String),

    /// Write attempted on a read-only database.
    #[error("database is read-only")]
    ReadOnly,

    /// The transaction was aborted after a failure and must be rolled back.
    #[error("transaction {0} was aborted and must be rolled back")]
    Aborted(TxId),
}

/// Storage and durability errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WAL or checkpoint inconsistency.
    #[error("storage corruption: {0}")]
    Corruption(String),

    /// A storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(StorageError::Io(e))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = Error::type_mismatch("Filter(age > 26)", "INT64", "STRING");
        assert_eq!(
            err.to_string(),
            "type mismatch in Filter(age > 26): expected INT64, found STRING"
        );

        let err: Error = TransactionError::WriteConflict {
            tx_id: TxId::new(3),
            key: "node 7".to_string(),
        }
        .into();
        assert!(err.is_write_conflict());
        assert!(err.to_string().contains("tx3"));
    }

    #[test]
    fn test_io_maps_to_storage() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(matches!(err, Error::Storage(StorageError::Io(_))));
        assert!(!err.is_corruption());
    }
}
