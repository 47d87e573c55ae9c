//! Transaction manager.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use quiver_common::mvcc::{Snapshot, WriteKey, WriteSet};
use quiver_common::types::{EpochId, TxId};
use quiver_common::utils::error::{Error, Result, TransactionError};
use quiver_common::utils::hash::FxHashMap;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Reading and buffering writes.
    Active,
    /// Validated and being published.
    Committing,
    /// Visible to every later snapshot.
    Committed,
    /// Rolling back.
    Aborting,
    /// Discarded.
    Aborted,
}

/// Counters since the manager was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStats {
    /// Transactions begun.
    pub begun: u64,
    /// Transactions committed (including read-only ones).
    pub committed: u64,
    /// Transactions aborted, for any reason.
    pub aborted: u64,
    /// Aborts caused by a write conflict.
    pub conflicts: u64,
}

struct TxInfo {
    state: TxState,
    start_epoch: EpochId,
}

/// Owns the global commit epoch and validates commits.
///
/// One instance exists per open database. Readers never take the commit
/// lock: [`begin`](Self::begin) only reads the current epoch. Commits are
/// serialized by a short lock covering validation, epoch assignment and
/// publication, so commit order is visibility order.
pub struct TransactionManager {
    next_tx_id: AtomicU64,
    current_epoch: AtomicU64,
    transactions: RwLock<FxHashMap<TxId, TxInfo>>,
    /// Newest commit epoch per published key, pruned below the oldest
    /// active start epoch.
    last_commit: Mutex<FxHashMap<WriteKey, EpochId>>,
    commit_lock: Mutex<()>,
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    conflicts: AtomicU64,
}

impl TransactionManager {
    /// Creates a manager whose first transaction reads an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(EpochId::INITIAL, TxId::SYSTEM)
    }

    /// Creates a manager resuming after recovery: the current epoch is
    /// `epoch` and new transaction ids follow `last_tx`.
    #[must_use]
    pub fn starting_at(epoch: EpochId, last_tx: TxId) -> Self {
        Self {
            next_tx_id: AtomicU64::new(last_tx.as_u64().max(TxId::SYSTEM.as_u64()) + 1),
            current_epoch: AtomicU64::new(epoch.as_u64()),
            transactions: RwLock::new(FxHashMap::default()),
            last_commit: Mutex::new(FxHashMap::default()),
            commit_lock: Mutex::new(()),
            begun: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Begins a transaction and returns its snapshot.
    pub fn begin(&self) -> Snapshot {
        let tx_id = TxId::new(self.next_tx_id.fetch_add(1, Ordering::Relaxed));
        // Registered under the write lock so a concurrent gc_horizon()
        // either sees this transaction or an epoch no newer than its start.
        let mut txns = self.transactions.write();
        let epoch = self.current_epoch();
        txns.insert(
            tx_id,
            TxInfo {
                state: TxState::Active,
                start_epoch: epoch,
            },
        );
        drop(txns);
        self.begun.fetch_add(1, Ordering::Relaxed);
        Snapshot::new(epoch, tx_id)
    }

    /// The newest committed epoch.
    #[must_use]
    pub fn current_epoch(&self) -> EpochId {
        EpochId::new(self.current_epoch.load(Ordering::Acquire))
    }

    /// State of a transaction still tracked by the manager.
    #[must_use]
    pub fn state(&self, tx_id: TxId) -> Option<TxState> {
        self.transactions.read().get(&tx_id).map(|info| info.state)
    }

    /// Number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.transactions
            .read()
            .values()
            .filter(|info| info.state == TxState::Active)
            .count()
    }

    /// The oldest epoch any running transaction may still read. Versions
    /// superseded at or before it are invisible to everyone.
    #[must_use]
    pub fn gc_horizon(&self) -> EpochId {
        let txns = self.transactions.read();
        txns.values()
            .map(|info| info.start_epoch)
            .min()
            .unwrap_or_else(|| self.current_epoch())
    }

    /// Validates and commits `snapshot.tx_id`.
    ///
    /// Every validated key of `writes` is checked against commits after the
    /// transaction's start epoch; the first committer wins. On success a
    /// new epoch is assigned and `publish` runs with it while the commit
    /// lock is held; it must make the writes durable and then visible.
    /// Only after `publish` succeeds does the epoch become current.
    ///
    /// A transaction without writes commits at the current epoch and does
    /// not call `publish`.
    ///
    /// # Errors
    ///
    /// Returns `WriteConflict` if validation fails, or the error of
    /// `publish`. In both cases the transaction is left `Aborting` and the
    /// caller must roll back its pending versions and call
    /// [`abort`](Self::abort).
    pub fn commit<F>(&self, snapshot: &Snapshot, writes: &WriteSet, publish: F) -> Result<EpochId>
    where
        F: FnOnce(EpochId) -> Result<()>,
    {
        let tx_id = snapshot.tx_id;
        let start_epoch = self.transition(tx_id, TxState::Active, TxState::Committing)?;
        if writes.is_empty() {
            self.finish(tx_id, TxState::Committed);
            self.committed.fetch_add(1, Ordering::Relaxed);
            return Ok(self.current_epoch());
        }

        let _guard = self.commit_lock.lock();
        {
            let last_commit = self.last_commit.lock();
            if let Some(key) = writes
                .validated()
                .find(|key| last_commit.get(*key).is_some_and(|e| *e > start_epoch))
            {
                drop(last_commit);
                self.set_state(tx_id, TxState::Aborting);
                self.conflicts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(tx = %tx_id, key = %key, "write conflict");
                return Err(Error::Transaction(TransactionError::WriteConflict {
                    tx_id,
                    key: key.to_string(),
                }));
            }
        }

        let epoch = self.current_epoch().next();
        if let Err(e) = publish(epoch) {
            self.set_state(tx_id, TxState::Aborting);
            tracing::warn!(tx = %tx_id, error = %e, "commit failed while publishing");
            return Err(e);
        }
        {
            let mut last_commit = self.last_commit.lock();
            for key in writes.published() {
                last_commit.insert(key.clone(), epoch);
            }
        }
        self.current_epoch.store(epoch.as_u64(), Ordering::Release);
        self.finish(tx_id, TxState::Committed);
        self.committed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tx = %tx_id, %epoch, keys = writes.len(), "committed");
        Ok(epoch)
    }

    /// Marks `tx_id` as aborted and forgets it. Pending versions must
    /// already have been rolled back.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the transaction is unknown.
    pub fn abort(&self, tx_id: TxId) -> Result<()> {
        let state = self
            .state(tx_id)
            .ok_or_else(|| Self::invalid(format!("{tx_id} is not running")))?;
        if state == TxState::Active {
            self.set_state(tx_id, TxState::Aborting);
        }
        self.finish(tx_id, TxState::Aborted);
        self.aborted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tx = %tx_id, "aborted");
        Ok(())
    }

    /// Runs `f` while holding the commit lock: no commit can start or
    /// finish meanwhile. Used to take checkpoints at a stable epoch.
    pub fn with_commit_lock<T>(&self, f: impl FnOnce(EpochId) -> T) -> T {
        let _guard = self.commit_lock.lock();
        f(self.current_epoch())
    }

    /// Drops conflict-detection entries no running transaction can
    /// conflict with. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let horizon = self.gc_horizon();
        let mut last_commit = self.last_commit.lock();
        let before = last_commit.len();
        last_commit.retain(|_, epoch| *epoch > horizon);
        before - last_commit.len()
    }

    /// Counters since creation.
    #[must_use]
    pub fn stats(&self) -> TxStats {
        TxStats {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }

    /// The most recently assigned transaction id.
    #[must_use]
    pub fn last_tx_id(&self) -> TxId {
        TxId::new(self.next_tx_id.load(Ordering::Relaxed).saturating_sub(1))
    }

    fn invalid(message: String) -> Error {
        Error::Transaction(TransactionError::InvalidState(message))
    }

    fn transition(&self, tx_id: TxId, from: TxState, to: TxState) -> Result<EpochId> {
        let mut txns = self.transactions.write();
        let info = txns
            .get_mut(&tx_id)
            .ok_or_else(|| Self::invalid(format!("{tx_id} is not running")))?;
        if info.state != from {
            return Err(Self::invalid(format!(
                "{tx_id} is {:?}, expected {from:?}",
                info.state
            )));
        }
        info.state = to;
        Ok(info.start_epoch)
    }

    fn set_state(&self, tx_id: TxId, state: TxState) {
        if let Some(info) = self.transactions.write().get_mut(&tx_id) {
            info.state = state;
        }
    }

    fn finish(&self, tx_id: TxId, state: TxState) {
        debug_assert!(matches!(state, TxState::Committed | TxState::Aborted));
        self.transactions.write().remove(&tx_id);
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_common::types::{NodeId, PropertyKey};

    fn writes(keys: &[WriteKey]) -> WriteSet {
        let mut ws = WriteSet::new();
        for key in keys {
            ws.write(key.clone());
        }
        ws
    }

    #[test]
    fn test_begin_reads_current_epoch() {
        let tm = TransactionManager::new();
        let t1 = tm.begin();
        assert_eq!(t1.epoch, EpochId::INITIAL);
        let epoch = tm
            .commit(&t1, &writes(&[WriteKey::Node(NodeId::new(1))]), |_| Ok(()))
            .unwrap();
        assert_eq!(epoch, EpochId::INITIAL.next());
        let t2 = tm.begin();
        assert_eq!(t2.epoch, epoch);
        assert_ne!(t1.tx_id, t2.tx_id);
    }

    #[test]
    fn test_first_committer_wins() {
        let tm = TransactionManager::new();
        let key = WriteKey::NodeProperty(NodeId::new(1), PropertyKey::new("age"));
        let t1 = tm.begin();
        let t2 = tm.begin();
        tm.commit(&t1, &writes(&[key.clone()]), |_| Ok(())).unwrap();
        let err = tm.commit(&t2, &writes(&[key]), |_| Ok(())).unwrap_err();
        assert!(err.is_write_conflict());
        assert_eq!(tm.state(t2.tx_id), Some(TxState::Aborting));
        tm.abort(t2.tx_id).unwrap();
        assert_eq!(tm.state(t2.tx_id), None);
        assert_eq!(tm.stats().conflicts, 1);
    }

    #[test]
    fn test_disjoint_keys_both_commit() {
        let tm = TransactionManager::new();
        let t1 = tm.begin();
        let t2 = tm.begin();
        tm.commit(&t1, &writes(&[WriteKey::Node(NodeId::new(1))]), |_| Ok(()))
            .unwrap();
        tm.commit(&t2, &writes(&[WriteKey::Node(NodeId::new(2))]), |_| Ok(()))
            .unwrap();
        assert_eq!(tm.current_epoch(), EpochId::new(2));
    }

    #[test]
    fn test_later_start_does_not_conflict() {
        let tm = TransactionManager::new();
        let key = WriteKey::Node(NodeId::new(1));
        let t1 = tm.begin();
        tm.commit(&t1, &writes(&[key.clone()]), |_| Ok(())).unwrap();
        let t2 = tm.begin();
        assert!(tm.commit(&t2, &writes(&[key]), |_| Ok(())).is_ok());
    }

    #[test]
    fn test_guard_validated_but_not_published() {
        let tm = TransactionManager::new();
        let node = WriteKey::Node(NodeId::new(1));
        let t1 = tm.begin();
        let t2 = tm.begin();
        let mut guarded = WriteSet::new();
        guarded.write(WriteKey::NodeProperty(NodeId::new(1), PropertyKey::new("x")));
        guarded.guard(node.clone());
        tm.commit(&t1, &guarded, |_| Ok(())).unwrap();
        // t1 only guarded the node, so t2 deleting it does not conflict.
        assert!(tm.commit(&t2, &writes(&[node]), |_| Ok(())).is_ok());
    }

    #[test]
    fn test_touch_published_but_not_validated() {
        let tm = TransactionManager::new();
        let adjacency = WriteKey::Adjacency(NodeId::new(1));
        let t1 = tm.begin();
        let t2 = tm.begin();
        let t3 = tm.begin();
        let mut touching = WriteSet::new();
        touching.touch(adjacency.clone());
        tm.commit(&t1, &touching, |_| Ok(())).unwrap();
        // A second toucher does not validate the key.
        let mut touching = WriteSet::new();
        touching.touch(adjacency.clone());
        assert!(tm.commit(&t2, &touching, |_| Ok(())).is_ok());
        // A guard on it does.
        let mut guarding = WriteSet::new();
        guarding.write(WriteKey::Node(NodeId::new(1)));
        guarding.guard(adjacency);
        assert!(tm.commit(&t3, &guarding, |_| Ok(())).unwrap_err().is_write_conflict());
    }

    #[test]
    fn test_publish_failure_leaves_epoch() {
        let tm = TransactionManager::new();
        let t1 = tm.begin();
        let err = tm
            .commit(&t1, &writes(&[WriteKey::Node(NodeId::new(1))]), |_| {
                Err(Error::Internal("disk full".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(tm.current_epoch(), EpochId::INITIAL);
        tm.abort(t1.tx_id).unwrap();
    }

    #[test]
    fn test_read_only_commit_keeps_epoch() {
        let tm = TransactionManager::new();
        let t1 = tm.begin();
        let epoch = tm
            .commit(&t1, &WriteSet::new(), |_| panic!("nothing to publish"))
            .unwrap();
        assert_eq!(epoch, EpochId::INITIAL);
    }

    #[test]
    fn test_commit_twice_is_invalid() {
        let tm = TransactionManager::new();
        let t1 = tm.begin();
        tm.commit(&t1, &WriteSet::new(), |_| Ok(())).unwrap();
        let err = tm.commit(&t1, &WriteSet::new(), |_| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionError::InvalidState(_))
        ));
    }

    #[test]
    fn test_gc_horizon_and_prune() {
        let tm = TransactionManager::new();
        let old = tm.begin();
        for i in 0..3 {
            let t = tm.begin();
            tm.commit(&t, &writes(&[WriteKey::Node(NodeId::new(i))]), |_| Ok(()))
                .unwrap();
        }
        assert_eq!(tm.gc_horizon(), EpochId::INITIAL);
        assert_eq!(tm.prune(), 0);
        tm.commit(&old, &WriteSet::new(), |_| Ok(())).unwrap();
        assert_eq!(tm.gc_horizon(), EpochId::new(3));
        assert_eq!(tm.prune(), 3);
    }

    #[test]
    fn test_resume_after_recovery() {
        let tm = TransactionManager::starting_at(EpochId::new(7), TxId::new(40));
        let snap = tm.begin();
        assert_eq!(snap.epoch, EpochId::new(7));
        assert_eq!(snap.tx_id, TxId::new(41));
    }
}
