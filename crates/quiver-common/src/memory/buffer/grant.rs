//! RAII memory grants.

use std::sync::Arc;

use super::manager::Inner;
use super::region::MemoryRegion;

/// A reservation against the budget, released when dropped.
pub struct MemoryGrant {
    inner: Arc<Inner>,
    region: MemoryRegion,
    size: usize,
}

impl MemoryGrant {
    pub(super) fn new(inner: Arc<Inner>, region: MemoryRegion, size: usize) -> Self {
        Self {
            inner,
            region,
            size,
        }
    }

    /// Bytes held by this grant.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The region this grant is charged to.
    #[must_use]
    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    /// Tries to grow the grant by `additional` bytes.
    pub fn try_grow(&mut self, additional: usize) -> bool {
        if self.inner.try_reserve(additional, self.region) {
            self.size += additional;
            true
        } else {
            false
        }
    }

    /// Returns `bytes` (capped at the grant size) to the budget.
    pub fn shrink(&mut self, bytes: usize) {
        let bytes = bytes.min(self.size);
        self.inner.release(bytes, self.region);
        self.size -= bytes;
    }

    /// Merges another grant (charged to the same region) into this one.
    pub fn absorb(&mut self, mut other: MemoryGrant) {
        self.size += std::mem::take(&mut other.size);
    }
}

impl Drop for MemoryGrant {
    fn drop(&mut self) {
        if self.size > 0 {
            self.inner.release(self.size, self.region);
        }
    }
}

impl std::fmt::Debug for MemoryGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGrant")
            .field("region", &self.region)
            .field("size", &self.size)
            .finish()
    }
}
