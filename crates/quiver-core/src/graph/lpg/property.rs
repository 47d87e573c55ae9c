//! Versioned columnar property storage.
//!
//! Each property key has its own [`PropertyColumn`]. A column is split in
//! two layers:
//!
//! - the **base**: immutable, codec-compressed [`ColumnBlock`]s of
//!   [`BLOCK_SIZE`] rows, holding values every live reader agrees on;
//! - the **deltas**: a [`VersionChain`] per entity slot holding writes that
//!   some reader may still need to tell apart.
//!
//! A read takes the delta version visible to the snapshot and falls back to
//! the base when there is none. [`PropertyColumn::consolidate`] folds
//! versions older than the GC horizon into the base and re-encodes the
//! affected blocks. A block with deltas has a stale zone map and is never
//! pruned.

use std::collections::BTreeMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::RwLock;
use quiver_common::mvcc::{Snapshot, VersionChain};
use quiver_common::types::{EdgeId, EpochId, LogicalType, NodeId, PropertyKey, TxId, Value};
use quiver_common::utils::hash::{FxHashMap, FxHashSet};

use crate::index::zone_map::CompareOp;
use crate::storage::{BLOCK_SIZE, ColumnBlock};

/// Entity ids usable as property storage keys. The slot is the row.
pub trait EntityId: Copy + Eq + Hash + Send + Sync + 'static {
    /// Row of this entity in every column.
    fn slot(self) -> usize;
    /// Entity id of a row.
    fn from_slot(slot: usize) -> Self;
}

impl EntityId for NodeId {
    fn slot(self) -> usize {
        self.index()
    }

    fn from_slot(slot: usize) -> Self {
        NodeId::new(slot as u64)
    }
}

impl EntityId for EdgeId {
    fn slot(self) -> usize {
        self.index()
    }

    fn from_slot(slot: usize) -> Self {
        EdgeId::new(slot as u64)
    }
}

/// One property across all entities of a kind.
#[derive(Debug, Default)]
pub struct PropertyColumn {
    base: Vec<ColumnBlock>,
    deltas: FxHashMap<usize, VersionChain<Value>>,
    /// Delta slots per block; a block listed here has a stale zone map.
    dirty: FxHashMap<usize, usize>,
    declared_type: Option<LogicalType>,
}

impl PropertyColumn {
    /// Creates an empty column.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a column whose base is already encoded (checkpoint load).
    #[must_use]
    pub fn from_base(base: Vec<ColumnBlock>) -> Self {
        let declared_type = base
            .iter()
            .filter(|b| !b.zone_map().all_null())
            .map(ColumnBlock::logical_type)
            .reduce(LogicalType::unify);
        Self {
            base,
            declared_type,
            ..Self::default()
        }
    }

    fn base_value(&self, slot: usize) -> Value {
        self.base
            .get(slot / BLOCK_SIZE)
            .map_or(Value::Null, |b| b.get(slot % BLOCK_SIZE))
    }

    /// The value of `slot` visible to `snapshot`.
    #[must_use]
    pub fn get(&self, slot: usize, snapshot: &Snapshot) -> Option<Value> {
        if let Some(version) = self.deltas.get(&slot).and_then(|c| c.visible_version(snapshot)) {
            return version.value.clone();
        }
        let base = self.base_value(slot);
        (!base.is_null()).then_some(base)
    }

    fn chain_mut(&mut self, slot: usize) -> &mut VersionChain<Value> {
        let dirty = &mut self.dirty;
        self.deltas.entry(slot).or_insert_with(|| {
            *dirty.entry(slot / BLOCK_SIZE).or_default() += 1;
            VersionChain::new()
        })
    }

    fn drop_chain(&mut self, slot: usize) {
        if self.deltas.remove(&slot).is_some() {
            let block = slot / BLOCK_SIZE;
            if let Some(count) = self.dirty.get_mut(&block) {
                *count -= 1;
                if *count == 0 {
                    self.dirty.remove(&block);
                }
            }
        }
    }

    fn observe_type(&mut self, value: Option<&Value>) {
        if let Some(v) = value.filter(|v| !v.is_null()) {
            let t = v.logical_type();
            self.declared_type = Some(self.declared_type.map_or(t, |d| d.unify(t)));
        }
    }

    /// Writes a pending value (`None` removes the property).
    pub fn write(&mut self, slot: usize, tx: TxId, value: Option<Value>) {
        self.observe_type(value.as_ref());
        self.chain_mut(slot).write(tx, value);
    }

    /// Installs a committed value (recovery).
    pub fn install(&mut self, slot: usize, epoch: EpochId, value: Option<Value>) {
        self.observe_type(value.as_ref());
        self.chain_mut(slot).install(epoch, value);
    }

    /// Commits the pending write of `tx` on `slot`.
    pub fn commit(&mut self, slot: usize, tx: TxId, epoch: EpochId) {
        if let Some(chain) = self.deltas.get_mut(&slot) {
            chain.commit(tx, epoch);
        }
    }

    /// Drops the pending write of `tx` on `slot`.
    pub fn rollback(&mut self, slot: usize, tx: TxId) {
        let empty = self.deltas.get_mut(&slot).is_some_and(|chain| {
            chain.rollback(tx);
            chain.is_empty()
        });
        if empty {
            self.drop_chain(slot);
        }
    }

    /// Returns every value ever held by `slot` that some version still
    /// references, base included. Used to prune index entries.
    #[must_use]
    pub fn retained_values(&self, slot: usize) -> Vec<Value> {
        let mut values: Vec<Value> = self
            .deltas
            .get(&slot)
            .map(|c| c.iter().filter_map(|v| v.value.clone()).collect())
            .unwrap_or_default();
        let base = self.base_value(slot);
        if !base.is_null() {
            values.push(base);
        }
        values
    }

    /// Reads the visible values of `slots` into `out`, one entry per slot
    /// (`Null` when absent). Decodes each touched base block once.
    pub fn scan(&self, slots: Range<usize>, snapshot: &Snapshot, out: &mut Vec<Value>) {
        let mut decoded: Option<(usize, Vec<Value>)> = None;
        for slot in slots {
            if let Some(version) = self.deltas.get(&slot).and_then(|c| c.visible_version(snapshot)) {
                out.push(version.value.clone().unwrap_or(Value::Null));
                continue;
            }
            let block = slot / BLOCK_SIZE;
            if decoded.as_ref().is_none_or(|(b, _)| *b != block) {
                decoded = self.base.get(block).map(|b| (block, b.decode()));
            }
            let value = decoded
                .as_ref()
                .and_then(|(_, values)| values.get(slot % BLOCK_SIZE).cloned())
                .unwrap_or(Value::Null);
            out.push(value);
        }
    }

    /// Returns false only if no row of `block` can satisfy `x <op> value`.
    #[must_use]
    pub fn might_match(&self, block: usize, op: CompareOp, value: &Value) -> bool {
        if self.dirty.contains_key(&block) {
            return true;
        }
        self.base.get(block).is_some_and(|b| b.might_match(op, value))
    }

    /// Prunes versions no reader at or after `horizon` needs.
    pub fn gc(&mut self, horizon: EpochId) {
        for chain in self.deltas.values_mut() {
            chain.gc(horizon);
        }
    }

    /// Folds settled versions into the base. Returns the number of slots
    /// folded.
    pub fn consolidate(&mut self, horizon: EpochId) -> usize {
        let mut settled: BTreeMap<usize, Vec<(usize, Value)>> = BTreeMap::new();
        let mut emptied = Vec::new();
        for (&slot, chain) in &mut self.deltas {
            if let Some((_, value)) = chain.take_settled(horizon) {
                settled
                    .entry(slot / BLOCK_SIZE)
                    .or_default()
                    .push((slot % BLOCK_SIZE, value.unwrap_or(Value::Null)));
            }
            if chain.is_empty() {
                emptied.push(slot);
            }
        }
        let folded = settled.values().map(Vec::len).sum();
        for (block, updates) in settled {
            self.rewrite_block(block, &updates);
        }
        for slot in emptied {
            self.drop_chain(slot);
        }
        folded
    }

    fn rewrite_block(&mut self, block: usize, updates: &[(usize, Value)]) {
        let mut values = self.base.get(block).map(ColumnBlock::decode).unwrap_or_default();
        let needed = updates.iter().map(|(o, _)| o + 1).max().unwrap_or(0);
        if values.len() < needed {
            values.resize(needed, Value::Null);
        }
        for (offset, value) in updates {
            values[*offset] = value.clone();
        }
        while self.base.len() <= block {
            self.base.push(ColumnBlock::encode(&[]));
        }
        self.base[block] = ColumnBlock::encode(&values);
    }

    /// Removes every trace of `slot` so the slot can be reused.
    pub fn purge(&mut self, slot: usize) {
        self.drop_chain(slot);
        if !self.base_value(slot).is_null() {
            self.rewrite_block(slot / BLOCK_SIZE, &[(slot % BLOCK_SIZE, Value::Null)]);
        }
    }

    /// Encodes the values visible to `snapshot` for slots `0..rows`.
    #[must_use]
    pub fn snapshot_blocks(&self, rows: usize, snapshot: &Snapshot) -> Vec<ColumnBlock> {
        let mut blocks = Vec::with_capacity(rows.div_ceil(BLOCK_SIZE));
        let mut start = 0;
        while start < rows {
            let end = (start + BLOCK_SIZE).min(rows);
            let mut values = Vec::with_capacity(end - start);
            self.scan(start..end, snapshot, &mut values);
            blocks.push(ColumnBlock::encode(&values));
            start = end;
        }
        blocks
    }

    /// Type of the values written so far; `None` if only nulls.
    #[must_use]
    pub fn declared_type(&self) -> Option<LogicalType> {
        self.declared_type
    }

    /// Number of slots with pending or unsettled versions.
    #[must_use]
    pub fn delta_count(&self) -> usize {
        self.deltas.len()
    }

    /// Base blocks (for inspection and statistics).
    #[must_use]
    pub fn base_blocks(&self) -> &[ColumnBlock] {
        &self.base
    }

    /// Approximate bytes held.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.base.iter().map(ColumnBlock::size_bytes).sum::<usize>()
            + self
                .deltas
                .values()
                .flat_map(VersionChain::iter)
                .map(|v| 24 + v.value.as_ref().map_or(0, Value::estimated_size))
                .sum::<usize>()
    }
}

/// Shared handle on one column; the latch is per column.
pub type ColumnHandle = Arc<RwLock<PropertyColumn>>;

/// All property columns of one entity kind.
///
/// Generic over the entity ID type (`NodeId` or `EdgeId`).
pub struct PropertyStorage<Id: EntityId = NodeId> {
    columns: RwLock<FxHashMap<PropertyKey, ColumnHandle>>,
    _marker: PhantomData<Id>,
}

impl<Id: EntityId> PropertyStorage<Id> {
    /// Creates an empty property storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            columns: RwLock::new(FxHashMap::default()),
            _marker: PhantomData,
        }
    }

    /// Returns the column for `key`, if it exists.
    #[must_use]
    pub fn column(&self, key: &PropertyKey) -> Option<ColumnHandle> {
        self.columns.read().get(key).cloned()
    }

    fn column_or_create(&self, key: &PropertyKey) -> ColumnHandle {
        if let Some(col) = self.column(key) {
            return col;
        }
        Arc::clone(self.columns.write().entry(key.clone()).or_default())
    }

    fn handles(&self) -> Vec<(PropertyKey, ColumnHandle)> {
        self.columns
            .read()
            .iter()
            .map(|(k, c)| (k.clone(), Arc::clone(c)))
            .collect()
    }

    /// Writes a pending value for `id`.
    pub fn write(&self, id: Id, key: &PropertyKey, tx: TxId, value: Option<Value>) {
        self.column_or_create(key).write().write(id.slot(), tx, value);
    }

    /// Installs a committed value for `id` (recovery).
    pub fn install(&self, id: Id, key: &PropertyKey, epoch: EpochId, value: Option<Value>) {
        self.column_or_create(key).write().install(id.slot(), epoch, value);
    }

    /// The value of one property visible to `snapshot`.
    #[must_use]
    pub fn get(&self, id: Id, key: &PropertyKey, snapshot: &Snapshot) -> Option<Value> {
        self.column(key)?.read().get(id.slot(), snapshot)
    }

    /// All properties of `id` visible to `snapshot`.
    #[must_use]
    pub fn get_all(&self, id: Id, snapshot: &Snapshot) -> BTreeMap<PropertyKey, Value> {
        self.handles()
            .into_iter()
            .filter_map(|(key, col)| col.read().get(id.slot(), snapshot).map(|v| (key, v)))
            .collect()
    }

    /// Commits the pending write of `tx` on one property.
    pub fn commit(&self, id: Id, key: &PropertyKey, tx: TxId, epoch: EpochId) {
        if let Some(col) = self.column(key) {
            col.write().commit(id.slot(), tx, epoch);
        }
    }

    /// Drops the pending write of `tx` on one property.
    pub fn rollback(&self, id: Id, key: &PropertyKey, tx: TxId) {
        if let Some(col) = self.column(key) {
            col.write().rollback(id.slot(), tx);
        }
    }

    /// Values still referenced by any version of one property.
    #[must_use]
    pub fn retained_values(&self, id: Id, key: &PropertyKey) -> Vec<Value> {
        self.column(key)
            .map(|c| c.read().retained_values(id.slot()))
            .unwrap_or_default()
    }

    /// Prunes old versions in every column.
    pub fn gc(&self, horizon: EpochId) {
        for (_, col) in self.handles() {
            col.write().gc(horizon);
        }
    }

    /// Folds settled versions of every column into its base.
    pub fn consolidate(&self, horizon: EpochId) -> usize {
        self.handles()
            .into_iter()
            .map(|(_, col)| col.write().consolidate(horizon))
            .sum()
    }

    /// Removes every property of a reclaimed entity.
    pub fn purge(&self, id: Id) {
        for (_, col) in self.handles() {
            col.write().purge(id.slot());
        }
    }

    /// Keys of all columns.
    #[must_use]
    pub fn keys(&self) -> Vec<PropertyKey> {
        self.columns.read().keys().cloned().collect()
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.read().len()
    }

    /// Encodes every column as of `snapshot` (checkpoint).
    #[must_use]
    pub fn snapshot_columns(&self, rows: usize, snapshot: &Snapshot) -> Vec<(PropertyKey, Vec<ColumnBlock>)> {
        let mut out: Vec<_> = self
            .handles()
            .into_iter()
            .map(|(key, col)| {
                let blocks = col.read().snapshot_blocks(rows, snapshot);
                (key, blocks)
            })
            .filter(|(_, blocks)| blocks.iter().any(|b| !b.zone_map().all_null()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Replaces a column with an already-encoded base (checkpoint load).
    pub fn load_column(&self, key: PropertyKey, blocks: Vec<ColumnBlock>) {
        self.columns
            .write()
            .insert(key, Arc::new(RwLock::new(PropertyColumn::from_base(blocks))));
    }

    /// Ids whose current or historical values include `value` for `key`,
    /// found by scanning. Used to populate a new index.
    #[must_use]
    pub fn entries(&self, key: &PropertyKey) -> Vec<(Id, Value)> {
        let Some(col) = self.column(key) else {
            return Vec::new();
        };
        let col = col.read();
        let mut slots: FxHashSet<usize> = col.deltas.keys().copied().collect();
        for (b, block) in col.base.iter().enumerate() {
            for offset in 0..block.len() {
                slots.insert(b * BLOCK_SIZE + offset);
            }
        }
        let mut out = Vec::new();
        for slot in slots {
            for value in col.retained_values(slot) {
                out.push((Id::from_slot(slot), value));
            }
        }
        out
    }

    /// Approximate bytes held by all columns.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.handles().iter().map(|(_, c)| c.read().size_bytes()).sum()
    }
}

impl<Id: EntityId> Default for PropertyStorage<Id> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TxId = TxId(1);
    const T2: TxId = TxId(2);

    fn at(epoch: u64) -> Snapshot {
        Snapshot::committed(EpochId(epoch))
    }

    #[test]
    fn test_write_commit_read() {
        let mut col = PropertyColumn::new();
        col.write(3, T1, Some(Value::Int64(30)));
        assert_eq!(col.get(3, &Snapshot::new(EpochId(0), T1)), Some(Value::Int64(30)));
        assert_eq!(col.get(3, &at(5)), None);

        col.commit(3, T1, EpochId(1));
        assert_eq!(col.get(3, &at(1)), Some(Value::Int64(30)));
        assert_eq!(col.get(3, &at(0)), None);
    }

    #[test]
    fn test_rollback_drops_delta() {
        let mut col = PropertyColumn::new();
        col.write(0, T1, Some(Value::from("x")));
        col.rollback(0, T1);
        assert_eq!(col.delta_count(), 0);
        assert!(!col.might_match(0, CompareOp::Eq, &Value::from("x")));
    }

    #[test]
    fn test_consolidate_moves_settled_values_to_base() {
        let mut col = PropertyColumn::new();
        for slot in 0..100 {
            col.install(slot, EpochId(1), Some(Value::Int64(slot as i64)));
        }
        col.install(7, EpochId(5), Some(Value::Int64(700)));

        assert_eq!(col.consolidate(EpochId(3)), 100);
        // Slot 7 keeps its newer version as a delta
        assert_eq!(col.delta_count(), 1);
        assert_eq!(col.get(7, &at(3)), Some(Value::Int64(7)));
        assert_eq!(col.get(7, &at(5)), Some(Value::Int64(700)));
        assert_eq!(col.get(50, &at(3)), Some(Value::Int64(50)));
        assert!(col.base_blocks()[0].codec() != crate::storage::CompressionCodec::None);
    }

    #[test]
    fn test_dirty_block_is_not_pruned() {
        let mut col = PropertyColumn::new();
        for slot in 0..10 {
            col.install(slot, EpochId(1), Some(Value::Int64(20)));
        }
        col.consolidate(EpochId(1));
        assert!(!col.might_match(0, CompareOp::Gt, &Value::Int64(26)));

        col.write(4, T2, Some(Value::Int64(40)));
        assert!(col.might_match(0, CompareOp::Gt, &Value::Int64(26)));
    }

    #[test]
    fn test_tombstone_consolidates_to_null() {
        let mut col = PropertyColumn::new();
        col.install(1, EpochId(1), Some(Value::Int64(1)));
        col.install(1, EpochId(2), None);
        col.consolidate(EpochId(2));
        assert_eq!(col.get(1, &at(9)), None);
        assert_eq!(col.delta_count(), 0);
    }

    #[test]
    fn test_scan_mixes_layers() {
        let mut col = PropertyColumn::new();
        col.install(0, EpochId(1), Some(Value::Int64(1)));
        col.install(1, EpochId(1), Some(Value::Int64(2)));
        col.consolidate(EpochId(1));
        col.write(1, T1, Some(Value::Int64(20)));

        let mut out = Vec::new();
        col.scan(0..3, &Snapshot::new(EpochId(1), T1), &mut out);
        assert_eq!(out, vec![Value::Int64(1), Value::Int64(20), Value::Null]);
    }

    #[test]
    fn test_storage_get_all_and_purge() {
        let storage: PropertyStorage<NodeId> = PropertyStorage::new();
        let id = NodeId::new(2);
        storage.install(id, &"name".into(), EpochId(1), Some(Value::from("Alix")));
        storage.install(id, &"age".into(), EpochId(1), Some(Value::Int64(30)));

        let props = storage.get_all(id, &at(1));
        let keys: Vec<&str> = props.keys().map(PropertyKey::as_str).collect();
        assert_eq!(keys, vec!["age", "name"]);

        storage.consolidate(EpochId(1));
        storage.purge(id);
        assert!(storage.get_all(id, &at(1)).is_empty());
    }
}
