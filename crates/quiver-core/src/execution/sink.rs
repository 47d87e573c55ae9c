//! Pipeline sinks that move chunks rather than build operator state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{SendTimeoutError, Sender};
use parking_lot::Mutex;
use quiver_common::memory::MemoryGrant;
use quiver_common::utils::error::Error;

use super::chunk::DataChunk;
use super::context::ExecutionContext;
use super::operators::{OperatorError, OperatorResult};
use super::pipeline::Sink;

/// A message on a query's result channel.
pub type ResultMessage = Result<DataChunk, Error>;

/// How long a blocked result send waits before re-checking cancellation.
const SEND_POLL: Duration = Duration::from_millis(20);

/// Chunks buffered between two pipelines.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: Mutex<Vec<DataChunk>>,
}

impl ChunkBuffer {
    /// An empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk.
    pub fn push(&self, chunk: DataChunk) {
        self.chunks.lock().push(chunk);
    }

    /// Removes and returns every chunk.
    pub fn take_all(&self) -> Vec<DataChunk> {
        std::mem::take(&mut *self.chunks.lock())
    }

    /// Buffered rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.chunks.lock().iter().map(DataChunk::row_count).sum()
    }
}

/// Buffers every chunk for a later pipeline, charging it to the memory
/// budget.
pub struct MaterializeSink {
    buffer: std::sync::Arc<ChunkBuffer>,
    grant: Mutex<Option<MemoryGrant>>,
}

impl MaterializeSink {
    /// Writes into `buffer`.
    #[must_use]
    pub fn new(buffer: std::sync::Arc<ChunkBuffer>) -> Self {
        Self {
            buffer,
            grant: Mutex::new(None),
        }
    }
}

impl Sink for MaterializeSink {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext) -> OperatorResult {
        let bytes = chunk.estimated_size();
        {
            let mut grant = self.grant.lock();
            let grant = grant.get_or_insert_with(|| ctx.execution_grant());
            if !grant.try_grow(bytes) {
                return Err(OperatorError::ResourceExhausted {
                    context: "Materialize".to_string(),
                    requested: bytes,
                    available: ctx.memory().available().unwrap_or(0),
                });
            }
        }
        self.buffer.push(chunk);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Materialize"
    }
}

/// Streams result chunks to the cursor through a bounded channel.
///
/// A full channel blocks the producing worker, which is how back-pressure
/// reaches the pipelines. Once the receiver is gone the sink reports itself
/// finished.
pub struct ChannelSink {
    sender: Sender<ResultMessage>,
    closed: AtomicBool,
}

impl ChannelSink {
    /// Sends into `sender`.
    #[must_use]
    pub fn new(sender: Sender<ResultMessage>) -> Self {
        Self {
            sender,
            closed: AtomicBool::new(false),
        }
    }
}

impl Sink for ChannelSink {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext) -> OperatorResult {
        let mut message = Ok(chunk);
        loop {
            match self.sender.send_timeout(message, SEND_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(m)) => {
                    ctx.check_cancelled()?;
                    message = m;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.closed.store(true, Ordering::Release);
                    return Ok(());
                }
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn name(&self) -> &'static str {
        "Results"
    }
}

/// Collects chunks in memory. Used by tests and by callers that want the
/// whole result at once.
#[derive(Debug, Default)]
pub struct CollectorSink {
    chunks: Mutex<Vec<DataChunk>>,
}

impl CollectorSink {
    /// An empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the collected chunks.
    pub fn take(&self) -> Vec<DataChunk> {
        std::mem::take(&mut *self.chunks.lock())
    }
}

impl Sink for CollectorSink {
    fn consume(&self, chunk: DataChunk, _ctx: &ExecutionContext) -> OperatorResult {
        self.chunks.lock().push(chunk);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Collect"
    }
}

impl<S: Sink + ?Sized> Sink for std::sync::Arc<S> {
    fn consume(&self, chunk: DataChunk, ctx: &ExecutionContext) -> OperatorResult {
        (**self).consume(chunk, ctx)
    }

    fn finalize(&self, ctx: &ExecutionContext) -> OperatorResult {
        (**self).finalize(ctx)
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
