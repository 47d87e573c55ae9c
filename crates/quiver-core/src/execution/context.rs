//! Per-query execution state shared by every worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use quiver_common::memory::{BufferManager, MemoryGrant, MemoryRegion};
use quiver_common::mvcc::Snapshot;

use super::chunk::DEFAULT_CHUNK_SIZE;
use super::expression::{EvalContext, FunctionResolver};
use super::operators::{OperatorError, OperatorResult};
use super::spill::SpillManager;
use crate::graph::lpg::LpgStore;

/// Counters for one query execution.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    morsels_total: AtomicUsize,
    morsels_processed: AtomicUsize,
    rows_scanned: AtomicU64,
    blocks_skipped: AtomicU64,
}

/// A point-in-time copy of [`ExecutionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Morsels the pipelines were split into.
    pub morsels_total: usize,
    /// Morsels actually pushed through a pipeline.
    pub morsels_processed: usize,
    /// Entities produced by scans.
    pub rows_scanned: u64,
    /// Storage blocks skipped by zone maps.
    pub blocks_skipped: u64,
    /// Spill files created.
    pub spill_files: usize,
    /// Bytes written to spill files.
    pub spilled_bytes: u64,
}

impl ExecutionStats {
    pub(crate) fn add_morsels(&self, n: usize) {
        self.morsels_total.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn morsel_done(&self) {
        self.morsels_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_rows_scanned(&self, n: usize) {
        self.rows_scanned.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn block_skipped(&self) {
        self.blocks_skipped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything operators need besides their input chunk.
pub struct ExecutionContext {
    store: Arc<LpgStore>,
    snapshot: Snapshot,
    functions: Option<Arc<dyn FunctionResolver>>,
    memory: BufferManager,
    spill: Option<Arc<SpillManager>>,
    cancelled: Arc<AtomicBool>,
    morsel_size: usize,
    stats: ExecutionStats,
}

impl ExecutionContext {
    /// A context reading `store` at `snapshot`, with no memory limit and
    /// no spilling.
    #[must_use]
    pub fn new(store: Arc<LpgStore>, snapshot: Snapshot) -> Self {
        Self {
            store,
            snapshot,
            functions: None,
            memory: BufferManager::unlimited(),
            spill: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            morsel_size: DEFAULT_CHUNK_SIZE,
            stats: ExecutionStats::default(),
        }
    }

    /// Resolves non-built-in functions through `functions`.
    #[must_use]
    pub fn with_functions(mut self, functions: Arc<dyn FunctionResolver>) -> Self {
        self.functions = Some(functions);
        self
    }

    /// Charges operator state to `memory`.
    #[must_use]
    pub fn with_memory(mut self, memory: BufferManager) -> Self {
        self.memory = memory;
        self
    }

    /// Lets spill-capable operators spill through `spill`.
    #[must_use]
    pub fn with_spill(mut self, spill: Arc<SpillManager>) -> Self {
        self.spill = Some(spill);
        self
    }

    /// Observes an externally owned cancellation flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Rows per morsel.
    #[must_use]
    pub fn with_morsel_size(mut self, rows: usize) -> Self {
        self.morsel_size = rows.max(1);
        self
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &Arc<LpgStore> {
        &self.store
    }

    /// The reading snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// The expression evaluation context.
    #[must_use]
    pub fn eval(&self) -> EvalContext<'_> {
        EvalContext {
            store: &self.store,
            snapshot: &self.snapshot,
            functions: self.functions.as_deref(),
        }
    }

    /// The memory manager.
    #[must_use]
    pub fn memory(&self) -> &BufferManager {
        &self.memory
    }

    /// An empty grant in the execution region.
    #[must_use]
    pub fn execution_grant(&self) -> MemoryGrant {
        self.memory.empty_grant(MemoryRegion::ExecutionBuffers)
    }

    /// The spill manager, if spilling is enabled.
    #[must_use]
    pub fn spill(&self) -> Option<&Arc<SpillManager>> {
        self.spill.as_ref()
    }

    /// Rows per morsel.
    #[must_use]
    pub fn morsel_size(&self) -> usize {
        self.morsel_size
    }

    /// Requests cancellation. Workers observe it at morsel boundaries.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fails with `Cancelled` once cancellation was requested.
    pub fn check_cancelled(&self) -> OperatorResult {
        if self.is_cancelled() {
            Err(OperatorError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Live counters.
    #[must_use]
    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// A copy of the counters, including spill activity.
    #[must_use]
    pub fn query_stats(&self) -> QueryStats {
        QueryStats {
            morsels_total: self.stats.morsels_total.load(Ordering::Relaxed),
            morsels_processed: self.stats.morsels_processed.load(Ordering::Relaxed),
            rows_scanned: self.stats.rows_scanned.load(Ordering::Relaxed),
            blocks_skipped: self.stats.blocks_skipped.load(Ordering::Relaxed),
            spill_files: self.spill.as_ref().map_or(0, |s| s.files_created()),
            spilled_bytes: self.spill.as_ref().map_or(0, |s| s.bytes_written()),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("snapshot", &self.snapshot)
            .field("morsel_size", &self.morsel_size)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
