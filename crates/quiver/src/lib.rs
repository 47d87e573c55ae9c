//! # Quiver
//!
//! An embeddable graph database query kernel.
//!
//! Start with [`QuiverDB`]: it owns the store and hands out [`Session`]s.
//! A session mutates the graph directly and runs queries given as
//! [`LogicalPlan`]s, which a front end produces from its own query
//! language.
//!
//! ## Quick Start
//!
//! ```rust
//! use quiver::plan::{AggregateExpr, LogicalExpression as E, LogicalOperator};
//! use quiver::{QuiverDB, Value};
//!
//! let db = QuiverDB::new_in_memory()?;
//! let mut session = db.session();
//!
//! let alice = session.create_node(&["Person"], [("name", Value::from("Alice")), ("age", Value::from(30))])?;
//! let bob = session.create_node(&["Person"], [("name", Value::from("Bob")), ("age", Value::from(25))])?;
//! session.create_edge(alice, bob, "KNOWS", [])?;
//!
//! let adults = session
//!     .execute(
//!         LogicalOperator::node_scan("p", Some("Person"))
//!             .filter(E::property("p", "age").ge(E::literal(18)))
//!             .aggregate(vec![], vec![AggregateExpr::count_star().alias("adults")])
//!             .into_plan(),
//!     )?
//!     .scalar::<i64>()?;
//! assert_eq!(adults, 2);
//! # Ok::<(), quiver::Error>(())
//! ```

pub use quiver_engine::{
    ColumnInfo, Config, ConfigError, QueryHandle, QueryResult, QuiverDB, ResultStream, Row,
    Session, SyncMode,
};

/// Logical plans: the query input.
pub mod plan {
    pub use quiver_engine::query::plan::*;
}

pub use quiver_common::types::{Date, EdgeId, NodeId, PropertyKey, Timestamp, Value};
pub use quiver_common::utils::error::{Error, Result};
pub use quiver_core::{Direction, IndexKind};
