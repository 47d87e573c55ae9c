//! Hash index for equality lookups on a property.
//!
//! Entries are added for every value ever written, committed or not, and
//! pruned by garbage collection. A lookup therefore returns candidates that
//! the store re-checks against the reader's snapshot.

use std::hash::Hash;

use parking_lot::RwLock;
use quiver_common::types::{Value, ValueKey};
use quiver_common::utils::hash::FxHashMap;
use smallvec::SmallVec;

/// Multi-valued hash index from property value to entity ids.
///
/// # Example
///
/// ```
/// use quiver_common::types::{NodeId, Value};
/// use quiver_core::index::HashIndex;
///
/// let index: HashIndex<NodeId> = HashIndex::new();
/// index.insert(&Value::from("alice"), NodeId::new(1));
/// index.insert(&Value::from("alice"), NodeId::new(7));
///
/// assert_eq!(index.get(&Value::from("alice")).len(), 2);
/// ```
pub struct HashIndex<Id> {
    map: RwLock<FxHashMap<ValueKey, SmallVec<[Id; 2]>>>,
}

impl<Id: Copy + Eq + Hash> HashIndex<Id> {
    /// Creates a new empty hash index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(FxHashMap::default()),
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

    /// Candidate ids for `value`.
    #[must_use]
    pub fn get(&self, value: &Value) -> SmallVec<[Id; 2]> {
        self.map
            .read()
            .get(&ValueKey(value.clone()))
            .cloned()
            .unwrap_or_default()
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

    /// Clears all entries from the index.
    pub fn clear(&self) {
        self.map.write().clear();
    }
}

impl<Id: Copy + Eq + Hash> Default for HashIndex<Id> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_common::types::NodeId;

    #[test]
    fn test_insert_get_remove() {
        let index: HashIndex<NodeId> = HashIndex::new();
        index.insert(&Value::Int64(30), NodeId::new(1));
        index.insert(&Value::Int64(30), NodeId::new(1));
        index.insert(&Value::Int64(30), NodeId::new(2));
        index.insert(&Value::Null, NodeId::new(3));

        assert_eq!(index.get(&Value::Int64(30)).as_slice(), &[NodeId::new(1), NodeId::new(2)]);
        assert_eq!(index.distinct_values(), 1);

        index.remove(&Value::Int64(30), NodeId::new(1));
        index.remove(&Value::Int64(30), NodeId::new(2));
        assert!(index.is_empty());
    }

    #[test]
    fn test_float_and_negative_zero() {
        let index: HashIndex<NodeId> = HashIndex::new();
        index.insert(&Value::Float64(-0.0), NodeId::new(1));
        assert_eq!(index.get(&Value::Float64(0.0)).len(), 1);
        assert_eq!(index.get(&Value::Int64(0)).len(), 1);

        index.insert(&Value::Int64(25), NodeId::new(2));
        index.insert(&Value::Float64(25.0), NodeId::new(3));
        assert_eq!(index.distinct_values(), 2);
        assert_eq!(index.get(&Value::Float64(25.0)).as_slice(), &[NodeId::new(2), NodeId::new(3)]);
        assert!(index.get(&Value::Float64(25.5)).is_empty());
    }
}
