//! Read-only transactions for queries outside an explicit transaction.

use std::sync::Arc;

use quiver_common::mvcc::{Snapshot, WriteSet};

use super::TransactionManager;

/// A read-only transaction that ends when dropped.
///
/// While it lives its snapshot holds back the GC horizon, so every version
/// the snapshot can see stays in place.
pub struct ReadTransaction {
    manager: Arc<TransactionManager>,
    snapshot: Snapshot,
}

impl ReadTransaction {
    /// Begins a read-only transaction.
    #[must_use]
    pub fn begin(manager: &Arc<TransactionManager>) -> Self {
        Self {
            manager: Arc::clone(manager),
            snapshot: manager.begin(),
        }
    }

    /// The transaction's snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }
}

impl Drop for ReadTransaction {
    fn drop(&mut self) {
        // Without writes a commit cannot conflict; it only ends the transaction.
        if let Err(e) = self.manager.commit(&self.snapshot, &WriteSet::new(), |_| Ok(())) {
            tracing::warn!(tx = %self.snapshot.tx_id, error = %e, "ending read transaction failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_transaction_holds_horizon() {
        let manager = Arc::new(TransactionManager::new());
        let read = ReadTransaction::begin(&manager);
        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager.gc_horizon(), read.snapshot().epoch);
        drop(read);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.stats().committed, 1);
    }
}
