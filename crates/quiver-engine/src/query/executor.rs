//! Runs lowered plans on the shared worker pool.
//!
//! Each query gets a coordinator thread that drives its pipelines in order
//! and takes part in every one of them; the pool supplies the remaining
//! workers. Result chunks travel to the cursor through a bounded channel,
//! so a slow consumer stalls the producers instead of buffering the whole
//! result.

use std::sync::Arc;

use crossbeam::channel;
use quiver_common::utils::error::{Error, Result};
use quiver_core::execution::operators::OperatorError;
use quiver_core::execution::{ChannelSink, ExecutionContext, WorkerPool, run_pipelines};

use super::physical::PhysicalPlan;
use super::planner::Planner;
use super::result::{ColumnInfo, QueryHandle, ResultStream};
use crate::transaction::ReadTransaction;

/// Executes physical plans.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: Arc<WorkerPool>,
    workers: usize,
    queue_capacity: usize,
}

impl QueryExecutor {
    /// An executor running each pipeline on up to `workers` threads from
    /// `pool` (the coordinator included), buffering at most
    /// `queue_capacity` result chunks.
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>, workers: usize, queue_capacity: usize) -> Self {
        Self {
            pool,
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Threads a pipeline may use.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Starts `plan` under `ctx` and returns a cursor over its results.
    ///
    /// `read`, the transaction owning the snapshot of `ctx` if the query
    /// has one to itself, ends once the pipelines have stopped.
    ///
    /// # Errors
    ///
    /// Returns `Query` if the plan cannot be lowered, or `Internal` if the
    /// coordinator thread cannot be started.
    pub fn execute(
        &self,
        plan: &PhysicalPlan,
        ctx: ExecutionContext,
        read: Option<ReadTransaction>,
    ) -> Result<ResultStream> {
        let (sender, receiver) = channel::bounded(self.queue_capacity);
        let lowered = Planner::new().build(plan, Box::new(ChannelSink::new(sender.clone())))?;
        let columns: Vec<ColumnInfo> = lowered
            .columns
            .iter()
            .zip(&lowered.types)
            .map(|(name, data_type)| ColumnInfo::new(name.clone(), *data_type))
            .collect();

        let ctx = Arc::new(ctx);
        let handle = QueryHandle::new(Arc::clone(&ctx));
        let pool = Arc::clone(&self.pool);
        let workers = self.workers;
        let pipelines = lowered.pipelines;
        let coordinator = std::thread::Builder::new()
            .name("quiver-query".to_string())
            .spawn(move || {
                let outcome = run_pipelines(&pipelines, &ctx, &pool, workers);
                drop(pipelines);
                match outcome {
                    Ok(()) => {}
                    Err(OperatorError::Cancelled) => {
                        tracing::debug!("query cancelled");
                        let _ = sender.send(Err(Error::Cancelled));
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "query failed");
                        let _ = sender.send(Err(e.into()));
                    }
                }
                drop(sender);
                drop(read);
            })
            .map_err(|e| Error::Internal(format!("cannot start query thread: {e}")))?;

        Ok(ResultStream::new(columns, receiver, handle, coordinator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::optimizer::Optimizer;
    use crate::query::plan::{LogicalExpression as E, LogicalOperator};
    use quiver_common::mvcc::{Snapshot, WriteSet};
    use quiver_common::types::{EpochId, TxId, Value};
    use crate::transaction::TransactionManager;
    use quiver_core::LpgStore;

    fn people(n: i64) -> Arc<LpgStore> {
        let store = Arc::new(LpgStore::new());
        let snapshot = Snapshot::new(EpochId::INITIAL, TxId::new(1));
        let mut writes = WriteSet::new();
        for i in 0..n {
            store
                .create_node(&snapshot, &mut writes, &["Person"], vec![("age".into(), Value::Int64(i))])
                .unwrap();
        }
        store.commit(TxId::new(1), EpochId::new(1), &writes);
        store
    }

    fn run(store: &Arc<LpgStore>, op: LogicalOperator, read: Option<ReadTransaction>) -> ResultStream {
        let plan = Optimizer::new().optimize(op.into_plan()).unwrap();
        let ctx = ExecutionContext::new(Arc::clone(store), Snapshot::committed(EpochId::new(1)))
            .with_morsel_size(64);
        QueryExecutor::new(Arc::new(WorkerPool::new(2)), 2, 4)
            .execute(&plan, ctx, read)
            .unwrap()
    }

    #[test]
    fn test_streams_filtered_rows() {
        let store = people(1000);
        let stream = run(
            &store,
            LogicalOperator::node_scan("n", Some("Person"))
                .filter(E::property("n", "age").lt(E::literal(10)))
                .project(vec![(E::property("n", "age"), Some("age"))]),
            None,
        );
        assert_eq!(stream.columns()[0].name, "age");
        let result = stream.into_result().unwrap();
        assert_eq!(result.row_count(), 10);
    }

    #[test]
    fn test_read_transaction_ends_after_completion() {
        let store = people(100);
        let manager = Arc::new(TransactionManager::new());
        let stream = run(
            &store,
            LogicalOperator::node_scan("n", None),
            Some(ReadTransaction::begin(&manager)),
        );
        assert_eq!(stream.into_result().unwrap().row_count(), 100);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_dropped_cursor_stops_the_query() {
        let store = people(5000);
        let manager = Arc::new(TransactionManager::new());
        let mut stream = run(
            &store,
            LogicalOperator::node_scan("n", None),
            Some(ReadTransaction::begin(&manager)),
        );
        assert!(stream.next().is_some());
        assert_eq!(manager.active_count(), 1);
        drop(stream);
        assert_eq!(manager.active_count(), 0);
    }
}
