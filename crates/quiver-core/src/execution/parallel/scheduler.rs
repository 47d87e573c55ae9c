//! Morsel distribution for one pipeline.
//!
//! Workers repeatedly claim an unclaimed morsel from a shared injector
//! queue. A morsel is an index into the pipeline's source; the source
//! decides what rows it covers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::deque::{Injector, Steal};

/// One unit of work: a morsel of a pipeline's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Morsel {
    /// Pipeline the morsel belongs to.
    pub pipeline: usize,
    /// Morsel index within the source.
    pub index: usize,
}

/// Hands out the morsels of one pipeline.
pub struct MorselScheduler {
    queue: Injector<Morsel>,
    total: usize,
    claimed: AtomicUsize,
    completed: AtomicUsize,
    stopped: AtomicBool,
}

impl MorselScheduler {
    /// Queues morsels `0..count` of `pipeline` in order.
    #[must_use]
    pub fn new(pipeline: usize, count: usize) -> Self {
        let queue = Injector::new();
        for index in 0..count {
            queue.push(Morsel { pipeline, index });
        }
        Self {
            queue,
            total: count,
            claimed: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Claims the next morsel, or `None` when the queue is drained or the
    /// scheduler was stopped.
    pub fn next_morsel(&self) -> Option<Morsel> {
        if self.is_stopped() {
            return None;
        }
        loop {
            match self.queue.steal() {
                Steal::Success(morsel) => {
                    self.claimed.fetch_add(1, Ordering::Relaxed);
                    return Some(morsel);
                }
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Marks a claimed morsel as fully processed.
    pub fn complete(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    /// Stops handing out morsels. Morsels already claimed finish normally.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Returns true once [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Morsels queued initially.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Morsels handed out so far.
    #[must_use]
    pub fn claimed(&self) -> usize {
        self.claimed.load(Ordering::Relaxed)
    }

    /// Morsels processed so far.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_morsels_in_order() {
        let scheduler = MorselScheduler::new(3, 4);
        let order: Vec<usize> = std::iter::from_fn(|| scheduler.next_morsel())
            .map(|m| m.index)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(scheduler.claimed(), 4);
    }

    #[test]
    fn test_each_morsel_claimed_once() {
        let scheduler = Arc::new(MorselScheduler::new(0, 1_000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&scheduler);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(m) = s.next_morsel() {
                        seen.push(m.index);
                        s.complete();
                    }
                    seen
                })
            })
            .collect();
        let mut all: Vec<usize> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all, (0..1_000).collect::<Vec<_>>());
        assert_eq!(scheduler.completed(), 1_000);
    }

    #[test]
    fn test_stop_halts_claims() {
        let scheduler = MorselScheduler::new(0, 10);
        assert!(scheduler.next_morsel().is_some());
        scheduler.stop();
        assert!(scheduler.next_morsel().is_none());
        assert_eq!(scheduler.claimed(), 1);
    }
}
