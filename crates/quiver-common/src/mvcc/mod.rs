//! MVCC primitives.
//!
//! Every versioned item (a node, an edge, one property of one entity) is a
//! [`VersionChain`]. A write appends a version stamped [`Stamp::Pending`]
//! with the writer's transaction id; commit restamps it with the commit
//! epoch, rollback drops it. Deletion is a version whose value is `None`
//! (a tombstone), so concurrent deleters never overwrite each other's marks.
//!
//! A [`Snapshot`] sees a version iff it is committed at an epoch `<=` the
//! snapshot epoch, or pending from the snapshot's own transaction. Among the
//! visible versions the transaction's own pending write wins, otherwise the
//! one with the newest commit epoch.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::types::{EdgeId, EpochId, NodeId, PropertyKey, TxId};
use crate::utils::hash::FxHashSet;

/// Who a version belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stamp {
    /// Committed at the given epoch.
    Committed(EpochId),
    /// Written by a still-running transaction.
    Pending(TxId),
}

/// The read view of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Snapshot {
    /// Epoch that was current when the transaction began.
    pub epoch: EpochId,
    /// The reading transaction; its own pending writes are visible.
    pub tx_id: TxId,
}

impl Snapshot {
    /// Creates a snapshot for a transaction.
    #[must_use]
    pub const fn new(epoch: EpochId, tx_id: TxId) -> Self {
        Self { epoch, tx_id }
    }

    /// A snapshot that sees exactly the committed state as of `epoch`.
    #[must_use]
    pub const fn committed(epoch: EpochId) -> Self {
        Self {
            epoch,
            tx_id: TxId::SYSTEM,
        }
    }

    /// A snapshot that sees every committed version.
    #[must_use]
    pub const fn latest() -> Self {
        Self::committed(EpochId::MAX)
    }

    /// Returns true if a version with this stamp is visible.
    #[inline]
    #[must_use]
    pub fn can_see(&self, stamp: Stamp) -> bool {
        match stamp {
            Stamp::Committed(epoch) => epoch.is_visible_at(self.epoch),
            Stamp::Pending(tx) => tx == self.tx_id && tx != TxId::SYSTEM,
        }
    }
}

/// One version of a versioned item. `None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version<T> {
    /// Owner of this version.
    pub stamp: Stamp,
    /// The value, or `None` if this version deletes the item.
    pub value: Option<T>,
}

/// The version history of one item, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionChain<T> {
    versions: SmallVec<[Version<T>; 1]>,
}

impl<T> Default for VersionChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> VersionChain<T> {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            versions: SmallVec::new(),
        }
    }

    /// Creates a chain holding one committed version.
    #[must_use]
    pub fn committed(epoch: EpochId, value: T) -> Self {
        let mut chain = Self::new();
        chain.versions.push(Version {
            stamp: Stamp::Committed(epoch),
            value: Some(value),
        });
        chain
    }

    /// Returns the version visible to `snapshot`, tombstones included.
    #[must_use]
    pub fn visible_version(&self, snapshot: &Snapshot) -> Option<&Version<T>> {
        let own = Stamp::Pending(snapshot.tx_id);
        if snapshot.tx_id != TxId::SYSTEM {
            if let Some(v) = self.versions.iter().rev().find(|v| v.stamp == own) {
                return Some(v);
            }
        }
        self.versions
            .iter()
            .filter_map(|v| match v.stamp {
                Stamp::Committed(epoch) if epoch.is_visible_at(snapshot.epoch) => Some((epoch, v)),
                _ => None,
            })
            .max_by_key(|(epoch, _)| *epoch)
            .map(|(_, v)| v)
    }

    /// Returns the value visible to `snapshot`, or `None` if the item does
    /// not exist (never written, or deleted) at that snapshot.
    #[must_use]
    pub fn read(&self, snapshot: &Snapshot) -> Option<&T> {
        self.visible_version(snapshot).and_then(|v| v.value.as_ref())
    }

    /// Returns true if the chain has a version visible to `snapshot`,
    /// including a tombstone.
    #[must_use]
    pub fn has_visible_version(&self, snapshot: &Snapshot) -> bool {
        self.visible_version(snapshot).is_some()
    }

    /// Writes a pending version for `tx`. A second write by the same
    /// transaction replaces its earlier pending value.
    pub fn write(&mut self, tx: TxId, value: Option<T>) {
        let stamp = Stamp::Pending(tx);
        if let Some(v) = self.versions.iter_mut().rev().find(|v| v.stamp == stamp) {
            v.value = value;
        } else {
            self.versions.push(Version { stamp, value });
        }
    }

    /// Installs an already-committed version (recovery and checkpoint load).
    pub fn install(&mut self, epoch: EpochId, value: Option<T>) {
        self.versions.push(Version {
            stamp: Stamp::Committed(epoch),
            value,
        });
    }

    /// Restamps the pending versions of `tx` with the commit epoch.
    /// Returns true if any version changed.
    pub fn commit(&mut self, tx: TxId, epoch: EpochId) -> bool {
        let pending = Stamp::Pending(tx);
        let mut changed = false;
        for v in self.versions.iter_mut().filter(|v| v.stamp == pending) {
            v.stamp = Stamp::Committed(epoch);
            changed = true;
        }
        changed
    }

    /// Drops the pending versions of `tx`.
    pub fn rollback(&mut self, tx: TxId) {
        let pending = Stamp::Pending(tx);
        self.versions.retain(|v| v.stamp != pending);
    }

    /// Returns true if another transaction holds a pending version.
    #[must_use]
    pub fn has_pending_from_other(&self, tx: TxId) -> bool {
        self.versions
            .iter()
            .any(|v| matches!(v.stamp, Stamp::Pending(other) if other != tx))
    }

    /// Prunes versions no snapshot at or after `horizon` can read.
    ///
    /// Keeps the newest committed version at or below the horizon (it is
    /// what the oldest reader sees) plus everything newer or pending.
    pub fn gc(&mut self, horizon: EpochId) {
        let Some(floor) = self.floor_epoch(horizon) else {
            return;
        };
        self.versions.retain(|v| match v.stamp {
            Stamp::Committed(epoch) => epoch >= floor,
            Stamp::Pending(_) => true,
        });
    }

    /// Removes and returns the newest committed version at or below
    /// `horizon` together with everything older than it, leaving only the
    /// versions some reader may still need to tell apart.
    ///
    /// Used to fold a settled value into a compressed base column.
    pub fn take_settled(&mut self, horizon: EpochId) -> Option<(EpochId, Option<T>)> {
        let floor = self.floor_epoch(horizon)?;
        let mut settled = None;
        let mut kept = SmallVec::new();
        for v in self.versions.drain(..) {
            match v.stamp {
                Stamp::Committed(epoch) if epoch < floor => {}
                Stamp::Committed(epoch) if epoch == floor && settled.is_none() => {
                    settled = Some((epoch, v.value));
                }
                _ => kept.push(v),
            }
        }
        self.versions = kept;
        settled
    }

    /// Returns true if the chain is a single settled tombstone (or empty):
    /// no reader at or after `horizon` can see the item.
    #[must_use]
    pub fn is_dead(&self, horizon: EpochId) -> bool {
        match self.versions.as_slice() {
            [] => true,
            [only] => matches!(only.stamp, Stamp::Committed(e) if e <= horizon) && only.value.is_none(),
            _ => false,
        }
    }

    /// Returns the newest committed version's epoch.
    #[must_use]
    pub fn newest_commit(&self) -> Option<EpochId> {
        self.versions
            .iter()
            .filter_map(|v| match v.stamp {
                Stamp::Committed(e) => Some(e),
                Stamp::Pending(_) => None,
            })
            .max()
    }

    /// Returns true if the chain holds no versions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Number of versions held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Iterates over the versions, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Version<T>> {
        self.versions.iter()
    }

    fn floor_epoch(&self, horizon: EpochId) -> Option<EpochId> {
        self.versions
            .iter()
            .filter_map(|v| match v.stamp {
                Stamp::Committed(e) if e <= horizon => Some(e),
                _ => None,
            })
            .max()
    }
}

/// A key a transaction reads-for-update or writes, used for
/// first-committer-wins validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WriteKey {
    /// Existence and labels of a node.
    Node(NodeId),
    /// Existence of an edge.
    Edge(EdgeId),
    /// One property of a node.
    NodeProperty(NodeId, PropertyKey),
    /// One property of an edge.
    EdgeProperty(EdgeId, PropertyKey),
    /// The incident-edge set of a node.
    Adjacency(NodeId),
}

impl fmt::Display for WriteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {id}"),
            Self::Edge(id) => write!(f, "edge {id}"),
            Self::NodeProperty(id, key) => write!(f, "node {id} property '{key}'"),
            Self::EdgeProperty(id, key) => write!(f, "edge {id} property '{key}'"),
            Self::Adjacency(id) => write!(f, "incident edges of node {id}"),
        }
    }
}

/// The keys one transaction touched.
///
/// - `writes` are validated at commit and published to later committers.
/// - `guards` are validated but not published: the transaction depends on
///   them not changing (an edge creator depends on its endpoints).
/// - `touches` are published but not validated: concurrent edge creations
///   on one node do not conflict with each other, but must conflict with a
///   concurrent delete of that node.
#[derive(Debug, Default, Clone)]
pub struct WriteSet {
    writes: FxHashSet<WriteKey>,
    guards: FxHashSet<WriteKey>,
    touches: FxHashSet<WriteKey>,
}

impl WriteSet {
    /// Creates an empty write set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a written key.
    pub fn write(&mut self, key: WriteKey) {
        self.writes.insert(key);
    }

    /// Records a key that must not be committed by anyone else meanwhile.
    pub fn guard(&mut self, key: WriteKey) {
        self.guards.insert(key);
    }

    /// Records a key whose change must be visible to later validators.
    pub fn touch(&mut self, key: WriteKey) {
        self.touches.insert(key);
    }

    /// Keys written by this transaction; these own pending versions.
    pub fn writes(&self) -> impl Iterator<Item = &WriteKey> {
        self.writes.iter()
    }

    /// Keys checked against later commits at validation time.
    pub fn validated(&self) -> impl Iterator<Item = &WriteKey> {
        self.writes.iter().chain(self.guards.difference(&self.writes))
    }

    /// Keys recorded in the commit log on success.
    pub fn published(&self) -> impl Iterator<Item = &WriteKey> {
        self.writes.iter().chain(self.touches.difference(&self.writes))
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.touches.is_empty()
    }

    /// Number of written keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Clears all keys.
    pub fn clear(&mut self) {
        self.writes.clear();
        self.guards.clear();
        self.touches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TxId = TxId(1);
    const T2: TxId = TxId(2);

    #[test]
    fn test_pending_visible_only_to_owner() {
        let mut chain = VersionChain::new();
        chain.write(T1, Some(10));

        assert_eq!(chain.read(&Snapshot::new(EpochId(0), T1)), Some(&10));
        assert_eq!(chain.read(&Snapshot::new(EpochId(0), T2)), None);
        assert_eq!(chain.read(&Snapshot::latest()), None);
    }

    #[test]
    fn test_commit_makes_visible_from_epoch() {
        let mut chain = VersionChain::committed(EpochId(1), "a");
        chain.write(T1, Some("b"));
        assert!(chain.commit(T1, EpochId(3)));

        assert_eq!(chain.read(&Snapshot::committed(EpochId(2))), Some(&"a"));
        assert_eq!(chain.read(&Snapshot::committed(EpochId(3))), Some(&"b"));
    }

    #[test]
    fn test_tombstone_hides_item() {
        let mut chain = VersionChain::committed(EpochId(1), 5);
        chain.write(T1, None);

        // Own delete hides the item, others still see it
        assert_eq!(chain.read(&Snapshot::new(EpochId(1), T1)), None);
        assert_eq!(chain.read(&Snapshot::new(EpochId(1), T2)), Some(&5));

        chain.commit(T1, EpochId(2));
        assert_eq!(chain.read(&Snapshot::committed(EpochId(2))), None);
        assert!(chain.has_visible_version(&Snapshot::committed(EpochId(2))));
    }

    #[test]
    fn test_rollback_leaves_no_trace() {
        let mut chain = VersionChain::committed(EpochId(1), 1);
        chain.write(T1, Some(2));
        chain.write(T1, Some(3));
        assert_eq!(chain.len(), 2);

        chain.rollback(T1);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.read(&Snapshot::latest()), Some(&1));
    }

    #[test]
    fn test_concurrent_pending_writers() {
        let mut chain = VersionChain::committed(EpochId(1), 0);
        chain.write(T1, Some(1));
        chain.write(T2, None);
        assert!(chain.has_pending_from_other(T1));

        assert_eq!(chain.read(&Snapshot::new(EpochId(1), T1)), Some(&1));
        assert_eq!(chain.read(&Snapshot::new(EpochId(1), T2)), None);

        chain.rollback(T2);
        assert!(!chain.has_pending_from_other(T1));
    }

    #[test]
    fn test_gc_keeps_what_readers_need() {
        let mut chain = VersionChain::committed(EpochId(1), 1);
        chain.install(EpochId(4), Some(2));
        chain.install(EpochId(8), Some(3));

        chain.gc(EpochId(5));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.read(&Snapshot::committed(EpochId(5))), Some(&2));
        assert_eq!(chain.read(&Snapshot::committed(EpochId(9))), Some(&3));
    }

    #[test]
    fn test_take_settled_and_dead() {
        let mut chain = VersionChain::committed(EpochId(1), 1);
        chain.install(EpochId(2), None);
        assert!(!chain.is_dead(EpochId(2)));
        chain.gc(EpochId(2));
        assert!(chain.is_dead(EpochId(2)));

        let mut chain = VersionChain::committed(EpochId(1), 7);
        chain.install(EpochId(6), Some(8));
        assert_eq!(chain.take_settled(EpochId(3)), Some((EpochId(1), Some(7))));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.take_settled(EpochId(3)), None);
    }

    #[test]
    fn test_write_set_partitions() {
        let mut ws = WriteSet::new();
        ws.write(WriteKey::Edge(EdgeId(1)));
        ws.guard(WriteKey::Node(NodeId(1)));
        ws.touch(WriteKey::Adjacency(NodeId(1)));

        let validated: Vec<_> = ws.validated().cloned().collect();
        assert!(validated.contains(&WriteKey::Node(NodeId(1))));
        assert!(!validated.contains(&WriteKey::Adjacency(NodeId(1))));

        let published: Vec<_> = ws.published().cloned().collect();
        assert!(published.contains(&WriteKey::Adjacency(NodeId(1))));
        assert!(!published.contains(&WriteKey::Node(NodeId(1))));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn history() -> impl Strategy<Value = Vec<(u64, Option<i64>)>> {
            proptest::collection::vec((1u64..4, proptest::option::of(0i64..100)), 1..12).prop_map(
                |steps| {
                    let mut epoch = 0;
                    steps
                        .into_iter()
                        .map(|(gap, value)| {
                            epoch += gap;
                            (epoch, value)
                        })
                        .collect()
                },
            )
        }

        fn expected(history: &[(u64, Option<i64>)], at: u64) -> Option<i64> {
            history
                .iter()
                .take_while(|(epoch, _)| *epoch <= at)
                .last()
                .and_then(|(_, value)| *value)
        }

        proptest! {
            #[test]
            fn reads_the_newest_version_at_or_below_the_snapshot(
                history in history(),
                at in 0u64..40,
            ) {
                let mut chain = VersionChain::new();
                for (epoch, value) in &history {
                    chain.install(EpochId(*epoch), *value);
                }
                let seen = chain.read(&Snapshot::committed(EpochId(at))).copied();
                prop_assert_eq!(seen, expected(&history, at));
            }

            #[test]
            fn gc_never_changes_what_live_snapshots_read(
                history in history(),
                horizon in 0u64..40,
                offset in 0u64..10,
            ) {
                let mut chain = VersionChain::new();
                for (epoch, value) in &history {
                    chain.install(EpochId(*epoch), *value);
                }
                chain.gc(EpochId(horizon));
                let at = horizon + offset;
                let seen = chain.read(&Snapshot::committed(EpochId(at))).copied();
                prop_assert_eq!(seen, expected(&history, at));
            }
        }
    }
}
