//! # quiver-engine
//!
//! The embeddable entry point of Quiver: database lifecycle, sessions,
//! snapshot-isolated transactions, query optimization and execution.
//!
//! ## Modules
//!
//! - [`database`] - QuiverDB, recovery and shutdown
//! - [`session`] - Sessions, mutations and queries
//! - [`config`] - Configuration options
//! - [`transaction`] - Transaction manager and read transactions
//! - [`checkpointer`] - Checkpoints and background maintenance
//! - [`query`] - Logical plans, optimizer, executor and results

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod checkpointer;
pub mod config;
pub mod database;
pub mod query;
pub mod session;
pub mod transaction;

pub use checkpointer::Checkpointer;
pub use config::{Config, ConfigError, SyncMode};
pub use database::QuiverDB;
pub use query::{ColumnInfo, QueryHandle, QueryResult, ResultStream, Row};
pub use session::Session;
