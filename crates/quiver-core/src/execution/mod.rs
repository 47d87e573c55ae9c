//! Push-based, vectorized query execution.
//!
//! A physical plan is a list of [`Pipeline`]s. Each pipeline has a
//! [`Source`] that produces morsels of rows, a chain of
//! [`PushOperator`]s, and a [`Sink`]. Pipeline breakers (hash build, sort,
//! aggregation) are sinks whose results feed a later pipeline.
//!
//! - [`chunk`] / [`vector`] / [`selection`] - Columnar batches
//! - [`expression`] - Scalar expression evaluation with null semantics
//! - [`operators`] - Streaming operators and breakers
//! - [`parallel`] - Morsel scheduling over a shared worker pool
//! - [`spill`] - Temporary files for sort and join spilling

pub mod chunk;
pub mod context;
pub mod expression;
pub mod operators;
pub mod parallel;
pub mod pipeline;
pub mod selection;
pub mod sink;
pub mod source;
pub mod spill;
pub mod vector;

pub use chunk::{DEFAULT_CHUNK_SIZE, DataChunk};
pub use context::{ExecutionContext, QueryStats};
pub use expression::{BinaryOp, EvalContext, Expression, FunctionResolver, UnaryOp};
pub use operators::{OperatorError, OperatorResult};
pub use parallel::{WorkerPool, run_pipelines};
pub use pipeline::{Pipeline, PushOperator, Sink, Source};
pub use selection::SelectionVector;
pub use sink::{ChannelSink, ChunkBuffer, CollectorSink, MaterializeSink, ResultMessage};
pub use source::{
    EmptySource, IndexLookup, IndexSeekSource, MaterializedSource, NodeScanSource, SingleRowSource,
    ZonePredicate,
};
pub use vector::{Cell, CellKey, ValueVector};
