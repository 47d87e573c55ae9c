//! Checkpointing and background maintenance.
//!
//! A checkpoint bounds recovery time: it writes the committed state as
//! base files and drops the WAL segments they cover. The maintenance
//! thread takes checkpoints once enough WAL has accumulated or a period
//! passes with new commits, and in between garbage-collects old versions
//! and compacts adjacency lists.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use quiver_adapters::storage::wal::{CheckpointMeta, CheckpointStore, WalManager, WalRecord};
use quiver_common::mvcc::Snapshot;
use quiver_common::types::EpochId;
use quiver_common::utils::error::{Error, Result};
use quiver_core::LpgStore;

use crate::transaction::{ReadTransaction, TransactionManager};

/// Writes checkpoints and truncates the WAL.
pub struct Checkpointer {
    store: Arc<LpgStore>,
    tx_manager: Arc<TransactionManager>,
    wal: Option<Arc<WalManager>>,
    checkpoints: CheckpointStore,
    threshold: u64,
    /// WAL bytes written when the last checkpoint started.
    wal_bytes_at_checkpoint: AtomicU64,
    last_epoch: AtomicU64,
    running: Mutex<()>,
}

impl Checkpointer {
    /// Creates a checkpointer. `last_epoch` is the epoch of the checkpoint
    /// the database was opened from.
    pub fn new(
        store: Arc<LpgStore>,
        tx_manager: Arc<TransactionManager>,
        wal: Option<Arc<WalManager>>,
        checkpoints: CheckpointStore,
        threshold: u64,
        last_epoch: EpochId,
    ) -> Self {
        let wal_bytes = wal.as_ref().map_or(0, |w| w.bytes_written());
        Self {
            store,
            tx_manager,
            wal,
            checkpoints,
            threshold,
            wal_bytes_at_checkpoint: AtomicU64::new(wal_bytes),
            last_epoch: AtomicU64::new(last_epoch.as_u64()),
            running: Mutex::new(()),
        }
    }

    /// WAL bytes appended since the last checkpoint.
    #[must_use]
    pub fn wal_bytes_since_checkpoint(&self) -> u64 {
        self.wal.as_ref().map_or(0, |w| {
            w.bytes_written()
                .saturating_sub(self.wal_bytes_at_checkpoint.load(Ordering::Relaxed))
        })
    }

    /// Returns true once the WAL has grown past the threshold.
    #[must_use]
    pub fn should_checkpoint(&self) -> bool {
        self.wal.is_some() && self.wal_bytes_since_checkpoint() >= self.threshold
    }

    /// Returns true if something committed after the last checkpoint.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.tx_manager.current_epoch().as_u64() > self.last_epoch.load(Ordering::Acquire)
    }

    /// Epoch of the latest checkpoint.
    #[must_use]
    pub fn last_epoch(&self) -> EpochId {
        EpochId::new(self.last_epoch.load(Ordering::Acquire))
    }

    /// Takes a checkpoint of the current committed state.
    ///
    /// Commits are held back only while the WAL moves to a new segment;
    /// the image itself is read from a snapshot while writers continue.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL or the checkpoint files cannot be
    /// written. The previous checkpoint then stays in effect.
    pub fn checkpoint(&self) -> Result<CheckpointMeta> {
        let _running = self.running.lock();
        let start = Instant::now();
        let (reader, segment, bytes_before) = self.tx_manager.with_commit_lock(|_| -> Result<_> {
            let (segment, bytes) = match &self.wal {
                Some(wal) => (wal.rotate()?, wal.bytes_written()),
                None => (0, 0),
            };
            Ok((ReadTransaction::begin(&self.tx_manager), segment, bytes))
        })?;
        let epoch = reader.snapshot().epoch;
        tracing::info!(%epoch, segment, "checkpoint started");

        let image = self.store.image(&Snapshot::committed(epoch));
        let meta = self.checkpoints.write(&image, epoch, segment)?;
        drop(image);
        drop(reader);

        let mut removed = 0;
        let mut marker_bytes = 0;
        if let Some(wal) = &self.wal {
            let before_marker = wal.bytes_written();
            wal.log(&WalRecord::Checkpoint { epoch })?;
            marker_bytes = wal.bytes_written().saturating_sub(before_marker);
            removed = wal.remove_segments_before(segment)?;
        }
        self.wal_bytes_at_checkpoint
            .store(bytes_before + marker_bytes, Ordering::Relaxed);
        self.last_epoch.fetch_max(epoch.as_u64(), Ordering::AcqRel);
        tracing::info!(
            %epoch,
            base_bytes = meta.base_bytes,
            segments_removed = removed,
            took = ?start.elapsed(),
            "checkpoint finished"
        );
        Ok(meta)
    }

    /// Checkpoints if the WAL has outgrown the threshold.
    ///
    /// # Errors
    ///
    /// As [`checkpoint`](Self::checkpoint).
    pub fn try_checkpoint(&self) -> Result<Option<CheckpointMeta>> {
        if self.should_checkpoint() {
            self.checkpoint().map(Some)
        } else {
            Ok(None)
        }
    }
}

enum Signal {
    Checkpoint,
    Shutdown,
}

/// The background maintenance thread.
pub(crate) struct Maintenance {
    signals: Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Maintenance {
    /// Starts a thread waking every `interval`.
    pub(crate) fn start(
        store: Arc<LpgStore>,
        tx_manager: Arc<TransactionManager>,
        checkpointer: Option<Arc<Checkpointer>>,
        interval: Duration,
    ) -> Result<Self> {
        let (signals, receiver) = channel::bounded(1);
        let handle = std::thread::Builder::new()
            .name("quiver-maintenance".to_string())
            .spawn(move || {
                loop {
                    match receiver.recv_timeout(interval) {
                        Ok(Signal::Checkpoint) => {
                            if let Some(checkpointer) = &checkpointer
                                && let Err(e) = checkpointer.try_checkpoint()
                            {
                                tracing::error!(error = %e, "checkpoint failed");
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            collect_garbage(&store, &tx_manager);
                            store.compact_adjacency();
                            if let Some(checkpointer) = &checkpointer
                                && (checkpointer.is_dirty() || checkpointer.should_checkpoint())
                                && let Err(e) = checkpointer.checkpoint()
                            {
                                tracing::error!(error = %e, "checkpoint failed");
                            }
                        }
                        Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .map_err(|e| Error::Internal(format!("cannot spawn maintenance thread: {e}")))?;
        Ok(Self {
            signals,
            handle: Some(handle),
        })
    }

    /// Asks for a checkpoint if the WAL has outgrown its threshold. Never
    /// blocks; a request already pending absorbs this one.
    pub(crate) fn request_checkpoint(&self) {
        match self.signals.try_send(Signal::Checkpoint) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("maintenance thread is gone");
            }
        }
    }

    /// Stops the thread and waits for it.
    pub(crate) fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // A full queue only holds a checkpoint request; wait for room.
        let _ = self.signals.send(Signal::Shutdown);
        if handle.join().is_err() {
            tracing::error!("maintenance thread panicked");
        }
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Prunes versions no running transaction can see.
pub(crate) fn collect_garbage(store: &LpgStore, tx_manager: &TransactionManager) {
    let horizon = tx_manager.gc_horizon();
    let stats = store.gc(horizon);
    let pruned = tx_manager.prune();
    tracing::debug!(%horizon, ?stats, conflict_entries = pruned, "garbage collected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_adapters::storage::{DirectoryBackend, StorageBackend};
    use quiver_adapters::storage::wal::{WalConfig, WalRecovery};
    use quiver_common::mvcc::WriteSet;
    use quiver_common::types::Value;

    fn setup(dir: &std::path::Path, threshold: u64) -> (Arc<LpgStore>, Arc<TransactionManager>, Checkpointer) {
        let store = Arc::new(LpgStore::new());
        let tm = Arc::new(TransactionManager::new());
        let wal = Arc::new(WalManager::with_config(dir.join("wal"), WalConfig::default()).unwrap());
        let backend: Arc<dyn StorageBackend> = Arc::new(DirectoryBackend::open(dir).unwrap());
        let checkpointer = Checkpointer::new(
            Arc::clone(&store),
            Arc::clone(&tm),
            Some(wal),
            CheckpointStore::new(backend),
            threshold,
            EpochId::INITIAL,
        );
        (store, tm, checkpointer)
    }

    fn insert(store: &LpgStore, tm: &TransactionManager, wal: Option<&WalManager>, name: &str) {
        let snapshot = tm.begin();
        let mut writes = WriteSet::new();
        let id = store
            .create_node(&snapshot, &mut writes, &["Person"], vec![("name".into(), Value::from(name))])
            .unwrap();
        tm.commit(&snapshot, &writes, |epoch| {
            if let Some(wal) = wal {
                wal.append(&[
                    WalRecord::CreateNode {
                        tx_id: snapshot.tx_id,
                        id,
                        labels: vec!["Person".to_string()],
                        properties: vec![("name".into(), Value::from(name))],
                    },
                    WalRecord::TxCommit {
                        tx_id: snapshot.tx_id,
                        epoch,
                    },
                ])?;
            }
            store.commit(snapshot.tx_id, epoch, &writes);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_checkpoint_covers_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let (store, tm, checkpointer) = setup(dir.path(), u64::MAX);
        insert(&store, &tm, checkpointer.wal.as_deref(), "Alice");
        insert(&store, &tm, checkpointer.wal.as_deref(), "Bob");
        assert!(checkpointer.is_dirty());

        let meta = checkpointer.checkpoint().unwrap();
        assert_eq!(meta.epoch, tm.current_epoch());
        assert!(!checkpointer.is_dirty());
        assert_eq!(tm.active_count(), 0);

        let (_, image) = checkpointer.checkpoints.load().unwrap().unwrap();
        let restored = LpgStore::new();
        restored.load_image(image, meta.epoch).unwrap();
        assert_eq!(restored.node_count(Some("Person"), &Snapshot::latest()), 2);

        // Everything before the checkpoint was dropped from the log.
        let (txs, _) = WalRecovery::new(dir.path().join("wal"))
            .recover(meta.wal_segment, meta.epoch)
            .unwrap();
        assert!(txs.is_empty());
    }

    #[test]
    fn test_threshold_counts_bytes_since_last_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (store, tm, checkpointer) = setup(dir.path(), 1);
        assert!(!checkpointer.should_checkpoint());
        insert(&store, &tm, checkpointer.wal.as_deref(), "Alice");
        assert!(checkpointer.should_checkpoint());
        assert!(checkpointer.try_checkpoint().unwrap().is_some());
        assert!(!checkpointer.should_checkpoint());
    }
}
