//! Fixed-size worker thread pool.

use std::thread::JoinHandle;

use crossbeam::channel::{self, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of worker threads that run submitted jobs.
///
/// All active queries share one pool; each query's coordinator submits
/// helper jobs that claim morsels alongside it.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one).
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = channel::unbounded::<Job>();
        let handles = (0..threads)
            .filter_map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("quiver-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .map_err(|e| tracing::warn!(error = %e, "failed to spawn worker thread"))
                    .ok()
            })
            .collect();
        Self {
            sender: Some(sender),
            handles,
        }
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Queues a job. Returns false if the pool is shutting down or has no
    /// threads; the caller then runs the work itself.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.handles.is_empty() {
            return false;
        }
        self.sender
            .as_ref()
            .is_some_and(|s| s.send(Box::new(job)).is_ok())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jobs_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(3);
            assert_eq!(pool.threads(), 3);
            for _ in 0..50 {
                let c = Arc::clone(&counter);
                assert!(pool.submit(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
