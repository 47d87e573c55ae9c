//! Query processing: from a bound logical plan to streamed results.
//!
//! - **Plan**: the logical operator tree handed over by a front end
//! - **Optimizer**: filter pushdown, access paths, join ordering and
//!   physical operator selection
//! - **Physical**: the chosen operator tree with row and cost estimates
//! - **Planner**: lowers a physical plan into push pipelines
//! - **Executor**: runs pipelines on the worker pool
//! - **Result**: the cursor and materialized results

pub mod executor;
pub mod optimizer;
pub mod physical;
pub mod plan;
pub mod planner;
pub mod result;

pub use executor::QueryExecutor;
pub use optimizer::{CardinalityEstimator, CostModel, Optimizer};
pub use physical::{PhysicalNode, PhysicalOperator, PhysicalPlan};
pub use plan::{LogicalExpression, LogicalOperator, LogicalPlan};
pub use planner::{ExecutablePlan, Planner};
pub use result::{ColumnInfo, FromValue, QueryHandle, QueryResult, ResultStream, Row};
