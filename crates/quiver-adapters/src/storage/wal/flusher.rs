//! Background WAL fsync for [`SyncMode::Normal`](super::SyncMode::Normal).
//!
//! The flusher keeps a steady cadence by subtracting the duration of the
//! last sync from the next wait:
//!
//! ```text
//! wait = interval - last_sync_duration
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use quiver_common::utils::error::{Error, Result};

use super::WalManager;

/// Counters of a flusher's work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlusherStats {
    /// Syncs performed.
    pub flush_count: u64,
    /// Total time spent syncing, in microseconds.
    pub total_flush_time_us: u64,
    /// Longest sync, in microseconds.
    pub max_flush_time_us: u64,
    /// Syncs that took longer than the interval.
    pub exceeded_target_count: u64,
}

impl FlusherStats {
    /// Average sync duration in microseconds.
    #[must_use]
    pub fn avg_flush_time_us(&self) -> u64 {
        self.total_flush_time_us
            .checked_div(self.flush_count)
            .unwrap_or(0)
    }
}

/// A thread that fsyncs the WAL every `interval`. Dropping it performs a
/// final sync.
pub struct WalFlusher {
    interval: Duration,
    shutdown: Option<Sender<Sender<FlusherStats>>>,
    handle: Option<JoinHandle<()>>,
}

impl WalFlusher {
    /// Starts a flusher for `wal`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(wal: Arc<WalManager>, interval: Duration) -> Result<Self> {
        let (shutdown, requests) = channel::bounded::<Sender<FlusherStats>>(1);
        let handle = thread::Builder::new()
            .name("quiver-wal-flusher".to_string())
            .spawn(move || {
                let mut last = Duration::ZERO;
                let mut stats = FlusherStats::default();
                loop {
                    match requests.recv_timeout(interval.saturating_sub(last)) {
                        Ok(ack) => {
                            if let Err(e) = wal.sync() {
                                tracing::warn!(error = %e, "final WAL sync failed");
                            }
                            let _ = ack.send(stats);
                            return;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            let start = Instant::now();
                            if let Err(e) = wal.sync() {
                                tracing::warn!(error = %e, "WAL sync failed");
                                last = Duration::from_millis(10);
                                continue;
                            }
                            last = start.elapsed();
                            let us = last.as_micros() as u64;
                            stats.flush_count += 1;
                            stats.total_flush_time_us += us;
                            stats.max_flush_time_us = stats.max_flush_time_us.max(us);
                            if last > interval {
                                stats.exceeded_target_count += 1;
                                tracing::debug!(took = ?last, target = ?interval, "slow WAL sync");
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .map_err(|e| Error::Internal(format!("cannot spawn WAL flusher: {e}")))?;
        Ok(Self {
            interval,
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// The sync interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stops the thread after a final sync and returns its counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread does not acknowledge or panicked.
    pub fn shutdown(&mut self) -> Result<FlusherStats> {
        let stats = match self.shutdown.take() {
            Some(tx) => {
                let (ack_tx, ack_rx) = channel::bounded(1);
                tx.send(ack_tx)
                    .map_err(|_| Error::Internal("WAL flusher already stopped".to_string()))?;
                ack_rx
                    .recv()
                    .map_err(|_| Error::Internal("WAL flusher did not acknowledge shutdown".to_string()))?
            }
            None => FlusherStats::default(),
        };
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| Error::Internal("WAL flusher panicked".to_string()))?;
        }
        Ok(stats)
    }
}

impl Drop for WalFlusher {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            if let Err(e) = self.shutdown() {
                tracing::warn!(error = %e, "error stopping WAL flusher");
            }
        }
    }
}
