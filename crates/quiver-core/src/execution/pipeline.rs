//! Push-based pipelines.
//!
//! A plan is cut into pipelines at pipeline breakers. Each pipeline reads
//! morsels from a [`Source`], pushes every chunk through a chain of
//! [`PushOperator`]s and hands the result to a [`Sink`]. Breakers are sinks
//! whose state becomes the source of a later pipeline.
//!
//! ```text
//! Pipeline 0: NodeScan(b) -> HashBuild
//! Pipeline 1: NodeScan(a) -> Expand -> HashProbe -> Filter -> ResultSink
//! ```
//!
//! Operators are shared by all workers of a pipeline, so they take `&self`
//! and keep their state behind locks or atomics.

use super::chunk::DataChunk;
use super::context::ExecutionContext;
use super::operators::OperatorResult;

/// A streaming operator inside a pipeline.
pub trait PushOperator: Send + Sync {
    /// Processes one chunk, appending zero or more output chunks to `out`.
    fn consume(
        &self,
        chunk: DataChunk,
        ctx: &ExecutionContext,
        out: &mut Vec<DataChunk>,
    ) -> OperatorResult;

    /// Emits buffered output once every morsel has been consumed. Called
    /// exactly once, on one thread.
    fn finalize(&self, _ctx: &ExecutionContext, _out: &mut Vec<DataChunk>) -> OperatorResult {
        Ok(())
    }

    /// Returns true once no further input can change the output, which
    /// lets the pipeline stop claiming morsels.
    fn is_finished(&self) -> bool {
        false
    }

    /// Operator name for errors and plan display.
    fn name(&self) -> &'static str;
}

/// The end of a pipeline.
pub trait Sink: Send + Sync {
    /// Accepts one chunk.
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext) -> OperatorResult;

    /// Completes the sink's state. Called exactly once, after all input.
    fn finalize(&self, _ctx: &ExecutionContext) -> OperatorResult {
        Ok(())
    }

    /// Returns true once the sink wants no more input.
    fn is_finished(&self) -> bool {
        false
    }

    /// Sink name.
    fn name(&self) -> &'static str;
}

/// The start of a pipeline: a fixed set of morsels.
pub trait Source: Send + Sync {
    /// Prepares the source and returns its morsel count. Called once when
    /// the pipeline starts, after every pipeline it depends on finished.
    fn morsel_count(&self, ctx: &ExecutionContext) -> OperatorResult<usize>;

    /// Produces morsel `morsel`, or `None` if it turned out empty.
    fn produce(&self, morsel: usize, ctx: &ExecutionContext) -> OperatorResult<Option<DataChunk>>;

    /// Returns true if morsels must be processed in index order.
    fn is_ordered(&self) -> bool {
        false
    }

    /// Source name.
    fn name(&self) -> &'static str;
}

/// One pipeline: source, operator chain, sink.
pub struct Pipeline {
    id: usize,
    source: Box<dyn Source>,
    operators: Vec<Box<dyn PushOperator>>,
    sink: Box<dyn Sink>,
}

impl Pipeline {
    /// Creates a pipeline.
    pub fn new(
        id: usize,
        source: Box<dyn Source>,
        operators: Vec<Box<dyn PushOperator>>,
        sink: Box<dyn Sink>,
    ) -> Self {
        Self {
            id,
            source,
            operators,
            sink,
        }
    }

    /// Pipeline id, unique within a query.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// The source.
    #[must_use]
    pub fn source(&self) -> &dyn Source {
        self.source.as_ref()
    }

    /// Returns true if morsels must run in order on one worker.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.source.is_ordered()
    }

    /// Returns true once an operator or the sink needs no more input.
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.sink.is_finished() || self.operators.iter().any(|op| op.is_finished())
    }

    /// Produces morsel `morsel` and pushes it to the sink.
    pub fn run_morsel(&self, morsel: usize, ctx: &ExecutionContext) -> OperatorResult {
        if let Some(chunk) = self.source.produce(morsel, ctx)? {
            self.push(chunk, 0, ctx)?;
        }
        Ok(())
    }

    /// Flushes every operator in order, then the sink.
    pub fn finalize(&self, ctx: &ExecutionContext) -> OperatorResult {
        for (i, op) in self.operators.iter().enumerate() {
            let mut out = Vec::new();
            op.finalize(ctx, &mut out)?;
            for chunk in out {
                self.push(chunk, i + 1, ctx)?;
            }
        }
        self.sink.finalize(ctx)
    }

    /// Pushes `chunk` through operators `from..` and into the sink.
    fn push(&self, chunk: DataChunk, from: usize, ctx: &ExecutionContext) -> OperatorResult {
        let mut current = vec![chunk];
        for op in &self.operators[from..] {
            let mut next = Vec::with_capacity(current.len());
            for chunk in current {
                if !chunk.is_empty() {
                    op.consume(chunk, ctx, &mut next)?;
                }
            }
            if next.is_empty() {
                return Ok(());
            }
            current = next;
        }
        for chunk in current {
            if !chunk.is_empty() {
                self.sink.consume(chunk, ctx)?;
            }
        }
        Ok(())
    }

    /// Names along the chain, for logging.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts = vec![self.source.name()];
        parts.extend(self.operators.iter().map(|op| op.name()));
        parts.push(self.sink.name());
        parts.join(" -> ")
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pipeline {}: {}", self.id, self.describe())
    }
}
