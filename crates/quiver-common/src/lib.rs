//! # quiver-common
//!
//! Foundation layer for Quiver: types, MVCC primitives, memory accounting
//! and utilities.
//!
//! This crate provides the fundamental building blocks used by all other
//! Quiver crates. It has no internal dependencies and should be kept minimal.
//!
//! ## Modules
//!
//! - [`types`] - Core type definitions (NodeId, EdgeId, Value, etc.)
//! - [`memory`] - Memory budget tracking
//! - [`mvcc`] - MVCC primitives (VersionChain, Snapshot, WriteSet)
//! - [`utils`] - Utility functions and helpers (hashing, errors)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod memory;
pub mod mvcc;
pub mod types;
pub mod utils;

// Re-export commonly used types at crate root
pub use mvcc::{Snapshot, Stamp, Version, VersionChain, WriteKey, WriteSet};
pub use types::{
    Date, EdgeId, EpochId, LogicalType, NodeId, PropertyKey, Timestamp, TxId, Value, ValueKey,
};
pub use utils::error::{Error, Result};
