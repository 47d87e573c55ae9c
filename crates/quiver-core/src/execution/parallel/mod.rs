//! Morsel-driven parallel execution.
//!
//! A query's pipelines run one after another in dependency order. Within a
//! pipeline, the calling thread and up to `workers - 1` helpers from the
//! shared [`WorkerPool`] claim morsels from a [`MorselScheduler`] until it
//! drains. Cancellation and early termination are checked between morsels,
//! never inside one.

mod pool;
mod scheduler;

pub use pool::WorkerPool;
pub use scheduler::{Morsel, MorselScheduler};

use std::sync::Arc;

use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;

use super::context::ExecutionContext;
use super::operators::{OperatorError, OperatorResult};
use super::pipeline::Pipeline;

/// Shared state of one pipeline run.
struct PipelineRun {
    pipeline: Arc<Pipeline>,
    scheduler: MorselScheduler,
    error: Mutex<Option<OperatorError>>,
}

impl PipelineRun {
    fn fail(&self, error: OperatorError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.scheduler.stop();
    }

    fn work(&self, ctx: &ExecutionContext) {
        while let Some(morsel) = self.scheduler.next_morsel() {
            if ctx.is_cancelled() {
                self.fail(OperatorError::Cancelled);
                break;
            }
            if let Err(e) = self.pipeline.run_morsel(morsel.index, ctx) {
                self.fail(e);
                break;
            }
            self.scheduler.complete();
            ctx.stats().morsel_done();
            if self.pipeline.is_saturated() {
                self.scheduler.stop();
            }
        }
    }
}

/// Runs `pipelines` in order. Each pipeline uses up to `workers` threads:
/// the caller plus helpers from `pool`.
pub fn run_pipelines(
    pipelines: &[Arc<Pipeline>],
    ctx: &Arc<ExecutionContext>,
    pool: &WorkerPool,
    workers: usize,
) -> OperatorResult {
    for pipeline in pipelines {
        run_pipeline(pipeline, ctx, pool, workers)?;
    }
    Ok(())
}

/// Runs one pipeline to completion, including finalization.
pub fn run_pipeline(
    pipeline: &Arc<Pipeline>,
    ctx: &Arc<ExecutionContext>,
    pool: &WorkerPool,
    workers: usize,
) -> OperatorResult {
    ctx.check_cancelled()?;
    let morsels = pipeline.source().morsel_count(ctx)?;
    ctx.stats().add_morsels(morsels);
    let run = Arc::new(PipelineRun {
        pipeline: Arc::clone(pipeline),
        scheduler: MorselScheduler::new(pipeline.id(), morsels),
        error: Mutex::new(None),
    });

    let helpers = if pipeline.is_ordered() {
        0
    } else {
        workers.saturating_sub(1).min(morsels.saturating_sub(1))
    };
    tracing::debug!(
        pipeline = pipeline.id(),
        chain = %pipeline.describe(),
        morsels,
        helpers,
        "starting pipeline"
    );

    let wait = WaitGroup::new();
    for _ in 0..helpers {
        let run = Arc::clone(&run);
        let ctx = Arc::clone(ctx);
        let wg = wait.clone();
        pool.submit(move || {
            run.work(&ctx);
            drop(wg);
        });
    }
    run.work(ctx);
    wait.wait();

    if let Some(error) = run.error.lock().take() {
        tracing::debug!(pipeline = pipeline.id(), error = %error, "pipeline failed");
        return Err(error);
    }
    ctx.check_cancelled()?;
    pipeline.finalize(ctx)?;
    tracing::debug!(
        pipeline = pipeline.id(),
        processed = run.scheduler.completed(),
        of = morsels,
        "pipeline finished"
    );
    Ok(())
}
