//! Core type definitions for Quiver.
//!
//! This module contains all fundamental types used throughout the graph database:
//! - Identifier types ([`NodeId`], [`EdgeId`], [`TxId`], [`EpochId`])
//! - Property types ([`Value`], [`PropertyKey`], [`LogicalType`])
//! - Temporal types ([`Date`], [`Timestamp`])

mod id;
mod logical_type;
mod timestamp;
mod value;

pub use id::{EdgeId, EdgeTypeId, EpochId, LabelId, NodeId, TxId};
pub use logical_type::LogicalType;
pub use timestamp::{Date, Timestamp};
pub use value::{PropertyKey, Value, ValueKey};
