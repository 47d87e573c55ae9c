//! SKIP and LIMIT.
//!
//! Both reserve their rows with a compare-and-swap on a shared counter, so
//! concurrent workers never over-skip or over-emit. Once a limit is
//! reached the operator reports itself finished and the pipeline stops
//! claiming morsels.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::OperatorResult;
use crate::execution::chunk::DataChunk;
use crate::execution::context::ExecutionContext;
use crate::execution::pipeline::PushOperator;

/// Atomically reserves up to `wanted` of the `cap - counter` remaining
/// slots, returning how many were reserved.
fn reserve(counter: &AtomicUsize, cap: usize, wanted: usize) -> usize {
    let mut current = counter.load(Ordering::Acquire);
    loop {
        let take = wanted.min(cap.saturating_sub(current));
        if take == 0 {
            return 0;
        }
        match counter.compare_exchange_weak(current, current + take, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return take,
            Err(actual) => current = actual,
        }
    }
}

/// Emits at most `limit` rows in total.
pub struct LimitOperator {
    limit: usize,
    emitted: AtomicUsize,
}

impl LimitOperator {
    /// Creates a new limit operator.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            emitted: AtomicUsize::new(0),
        }
    }
}

impl PushOperator for LimitOperator {
    fn consume(&self, chunk: DataChunk, _ctx: &ExecutionContext, out: &mut Vec<DataChunk>) -> OperatorResult {
        let take = reserve(&self.emitted, self.limit, chunk.row_count());
        if take == chunk.row_count() {
            out.push(chunk);
        } else if take > 0 {
            out.push(chunk.slice(0, take));
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.emitted.load(Ordering::Acquire) >= self.limit
    }

    fn name(&self) -> &'static str {
        "Limit"
    }
}

/// Drops the first `skip` rows.
pub struct SkipOperator {
    skip: usize,
    skipped: AtomicUsize,
}

impl SkipOperator {
    /// Creates a new skip operator.
    #[must_use]
    pub fn new(skip: usize) -> Self {
        Self {
            skip,
            skipped: AtomicUsize::new(0),
        }
    }
}

impl PushOperator for SkipOperator {
    fn consume(&self, chunk: DataChunk, _ctx: &ExecutionContext, out: &mut Vec<DataChunk>) -> OperatorResult {
        let dropped = reserve(&self.skipped, self.skip, chunk.row_count());
        if dropped == 0 {
            out.push(chunk);
        } else if dropped < chunk.row_count() {
            out.push(chunk.slice(dropped, chunk.row_count() - dropped));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Skip"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::vector::ValueVector;
    use crate::graph::lpg::LpgStore;
    use quiver_common::mvcc::Snapshot;
    use quiver_common::types::{EpochId, LogicalType, Value};
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(LpgStore::new()), Snapshot::committed(EpochId::new(0)))
    }

    fn range(start: i64, end: i64) -> DataChunk {
        DataChunk::from_columns(vec![ValueVector::from_values(
            LogicalType::Int64,
            (start..end).map(Value::Int64).collect(),
        )])
    }

    #[test]
    fn test_limit_across_chunks() {
        let ctx = ctx();
        let limit = LimitOperator::new(5);
        let mut out = Vec::new();
        limit.consume(range(0, 3), &ctx, &mut out).unwrap();
        assert!(!limit.is_finished());
        limit.consume(range(3, 10), &ctx, &mut out).unwrap();
        limit.consume(range(10, 20), &ctx, &mut out).unwrap();
        assert!(limit.is_finished());
        assert_eq!(out.iter().map(DataChunk::row_count).sum::<usize>(), 5);
    }

    #[test]
    fn test_skip_then_pass() {
        let ctx = ctx();
        let skip = SkipOperator::new(4);
        let mut out = Vec::new();
        skip.consume(range(0, 3), &ctx, &mut out).unwrap();
        skip.consume(range(3, 6), &ctx, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].column(0).unwrap().get_value(0), Some(Value::Int64(4)));
    }

    #[test]
    fn test_concurrent_limit_is_exact() {
        let ctx = Arc::new(ctx());
        let limit = Arc::new(LimitOperator::new(100));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (ctx, limit) = (Arc::clone(&ctx), Arc::clone(&limit));
                std::thread::spawn(move || {
                    let mut out = Vec::new();
                    for _ in 0..20 {
                        limit.consume(range(0, 7), &ctx, &mut out).unwrap();
                    }
                    out.iter().map(DataChunk::row_count).sum::<usize>()
                })
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
    }
}
