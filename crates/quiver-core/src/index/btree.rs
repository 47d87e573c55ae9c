//! Ordered index for range lookups on a property.
//!
//! Keys are ordered by [`Value::total_cmp`], so integers and floats share
//! one numeric order and `30` and `30.0` are the same key. Like [`HashIndex`](super::HashIndex) it holds
//! candidates that callers re-check against their snapshot.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;
use quiver_common::types::{Value, ValueKey};
use smallvec::SmallVec;

/// Ordered index from property value to entity ids.
pub struct BTreeIndex<Id> {
    map: RwLock<BTreeMap<ValueKey, SmallVec<[Id; 2]>>>,
}

impl<Id: Copy + Eq> BTreeIndex<Id> {
    /// Creates a new empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
        }
    }

    /// Adds `id` under `value`. Nulls are not indexed.
    pub fn insert(&self, value: &Value, id: Id) {
        if value.is_null() {
            return;
        }
        let mut map = self.map.write();
        let ids = map.entry(ValueKey(value.clone())).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Removes `id` from under `value`.
    pub fn remove(&self, value: &Value, id: Id) {
        let key = ValueKey(value.clone());
        let mut map = self.map.write();
        if let Some(ids) = map.get_mut(&key) {
            ids.retain(|x| *x != id);
            if ids.is_empty() {
                map.remove(&key);
            }
        }
    }

    /// Candidate ids for `value`.
    #[must_use]
    pub fn get(&self, value: &Value) -> SmallVec<[Id; 2]> {
        self.map
            .read()
            .get(&ValueKey(value.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Candidate `(value, id)` pairs within the bounds, in key order.
    #[must_use]
    pub fn range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Vec<(Value, Id)> {
        let to_key = |b: Bound<&Value>| match b {
            Bound::Included(v) => Bound::Included(ValueKey(v.clone())),
            Bound::Excluded(v) => Bound::Excluded(ValueKey(v.clone())),
            Bound::Unbounded => Bound::Unbounded,
        };
        let (lower, upper) = (to_key(lower), to_key(upper));
        // BTreeMap::range panics on inverted bounds
        let empty = match (&lower, &upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (
                Bound::Included(lo) | Bound::Excluded(lo),
                Bound::Included(hi) | Bound::Excluded(hi),
            ) => lo >= hi,
            _ => false,
        };
        if empty {
            return Vec::new();
        }
        self.map
            .read()
            .range((lower, upper))
            .flat_map(|(k, ids)| ids.iter().map(move |&id| (k.0.clone(), id)))
            .collect()
    }

    /// Keeps only the entries for which `keep(value, id)` holds.
    pub fn retain(&self, mut keep: impl FnMut(&Value, Id) -> bool) {
        let mut map = self.map.write();
        map.retain(|key, ids| {
            ids.retain(|id| keep(&key.0, *id));
            !ids.is_empty()
        });
    }

    /// Number of distinct indexed values.
    #[must_use]
    pub fn distinct_values(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl<Id: Copy + Eq> Default for BTreeIndex<Id> {
    fn default() -> Self {
        Self::new()
    }
}
