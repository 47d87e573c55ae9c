//! Identifier types for graph elements and transactions.
//!
//! All identifiers are thin `u64` (or `u32`) newtypes. Entity ids index
//! directly into the storage arenas, so they are dense and only handed out
//! again after the slot has been reclaimed by version GC.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
        #[repr(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// The invalid/null id.
            pub const INVALID: Self = Self(u64::MAX);

            /// Creates an id from a raw value.
            #[inline]
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// Returns the arena slot this id addresses.
            #[inline]
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Checks if this is a valid id.
            #[inline]
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != u64::MAX
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", stringify!($name), self.0)
                } else {
                    write!(f, "{}(INVALID)", stringify!($name))
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a node in the graph.
    NodeId
);

entity_id!(
    /// Unique identifier for an edge in the graph.
    EdgeId
);

/// Unique identifier for a transaction.
///
/// Transaction ids are handed out monotonically by the transaction manager
/// and tag pending versions until commit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[repr(transparent)]
pub struct TxId(pub u64);

impl TxId {
    /// The invalid/null transaction ID. Also used for system writes
    /// (recovery replay, checkpoint load).
    pub const SYSTEM: Self = Self(0);

    /// Creates a new TxId from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Global commit sequence number.
///
/// Every commit advances the epoch by one; a snapshot is the epoch that was
/// current when its transaction began.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[repr(transparent)]
pub struct EpochId(pub u64);

impl EpochId {
    /// The epoch of an empty database.
    pub const INITIAL: Self = Self(0);

    /// An epoch newer than any real commit.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new EpochId from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next epoch.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Checks whether something committed at this epoch is visible to a
    /// reader at `viewing_epoch`.
    #[inline]
    #[must_use]
    pub const fn is_visible_at(self, viewing_epoch: Self) -> bool {
        self.0 <= viewing_epoch.0
    }
}

impl fmt::Debug for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EpochId({})", self.0)
    }
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interned label identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LabelId(pub u32);

/// Interned edge type identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EdgeTypeId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_basics() {
        let id = NodeId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert_eq!(id.index(), 42);
        assert!(id.is_valid());
        assert!(!NodeId::INVALID.is_valid());
        assert_eq!(format!("{id:?}"), "NodeId(42)");
        assert_eq!(format!("{:?}", EdgeId::INVALID), "EdgeId(INVALID)");
    }

    #[test]
    fn test_epoch_visibility() {
        let e5 = EpochId::new(5);
        assert!(e5.is_visible_at(EpochId::new(5)));
        assert!(e5.is_visible_at(EpochId::new(9)));
        assert!(!e5.is_visible_at(EpochId::new(4)));
        assert_eq!(e5.next(), EpochId::new(6));
    }

    #[test]
    fn test_tx_id_next() {
        assert_eq!(TxId::SYSTEM.next(), TxId::new(1));
        assert_eq!(TxId::new(7).to_string(), "tx7");
    }
}
