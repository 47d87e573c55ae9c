//! The buffer manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::grant::MemoryGrant;
use super::region::MemoryRegion;
use crate::utils::error::{Error, Result};

/// How close allocations are to the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    /// Below 70% of the budget.
    Normal,
    /// 70% to 85%.
    Moderate,
    /// 85% to 95%.
    High,
    /// Above 95%.
    Critical,
}

impl PressureLevel {
    /// Returns true if spill-capable operators should spill proactively.
    #[must_use]
    pub const fn should_spill(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// A point-in-time view of the manager's accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStats {
    /// The budget, if limited.
    pub budget: Option<usize>,
    /// Bytes currently reserved.
    pub allocated: usize,
    /// Highest reservation seen.
    pub peak: usize,
    /// Bytes reserved per region, in [`MemoryRegion::ALL`] order.
    pub per_region: [usize; 4],
}

pub(super) struct Inner {
    budget: Option<usize>,
    allocated: AtomicUsize,
    peak: AtomicUsize,
    per_region: [AtomicUsize; 4],
}

impl Inner {
    pub(super) fn try_reserve(&self, bytes: usize, region: MemoryRegion) -> bool {
        let mut current = self.allocated.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(bytes);
            if self.budget.is_some_and(|budget| next > budget) {
                return false;
            }
            match self.allocated.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.per_region[region.index()].fetch_add(bytes, Ordering::Relaxed);
                    self.peak.fetch_max(next, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub(super) fn release(&self, bytes: usize, region: MemoryRegion) {
        self.allocated.fetch_sub(bytes, Ordering::AcqRel);
        self.per_region[region.index()].fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// Shared memory budget.
///
/// Cheap to clone; all clones draw from the same budget.
#[derive(Clone)]
pub struct BufferManager {
    inner: Arc<Inner>,
}

impl BufferManager {
    /// Creates a manager with no limit.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Creates a manager limited to `budget` bytes.
    #[must_use]
    pub fn with_budget(budget: usize) -> Self {
        Self::new(Some(budget))
    }

    /// Creates a manager with an optional limit.
    #[must_use]
    pub fn new(budget: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                budget,
                allocated: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                per_region: Default::default(),
            }),
        }
    }

    /// Tries to reserve `bytes`; returns `None` if the budget would be exceeded.
    #[must_use]
    pub fn try_allocate(&self, bytes: usize, region: MemoryRegion) -> Option<MemoryGrant> {
        self.inner
            .try_reserve(bytes, region)
            .then(|| MemoryGrant::new(Arc::clone(&self.inner), region, bytes))
    }

    /// Reserves `bytes` or fails with `ResourceExhausted` naming `context`.
    pub fn reserve(
        &self,
        bytes: usize,
        region: MemoryRegion,
        context: &str,
    ) -> Result<MemoryGrant> {
        self.try_allocate(bytes, region)
            .ok_or_else(|| Error::ResourceExhausted {
                context: context.to_string(),
                requested: bytes,
                available: self.available().unwrap_or(usize::MAX),
            })
    }

    /// An empty grant that can later grow.
    #[must_use]
    pub fn empty_grant(&self, region: MemoryRegion) -> MemoryGrant {
        MemoryGrant::new(Arc::clone(&self.inner), region, 0)
    }

    /// The configured budget.
    #[must_use]
    pub fn budget(&self) -> Option<usize> {
        self.inner.budget
    }

    /// Bytes currently reserved.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Acquire)
    }

    /// Bytes still available, if limited.
    #[must_use]
    pub fn available(&self) -> Option<usize> {
        self.inner
            .budget
            .map(|budget| budget.saturating_sub(self.allocated()))
    }

    /// Current pressure level.
    #[must_use]
    pub fn pressure_level(&self) -> PressureLevel {
        let Some(budget) = self.inner.budget.filter(|b| *b > 0) else {
            return PressureLevel::Normal;
        };
        let ratio = self.allocated() as f64 / budget as f64;
        if ratio > 0.95 {
            PressureLevel::Critical
        } else if ratio > 0.85 {
            PressureLevel::High
        } else if ratio >= 0.70 {
            PressureLevel::Moderate
        } else {
            PressureLevel::Normal
        }
    }

    /// Returns an accounting snapshot.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        let mut per_region = [0; 4];
        for region in MemoryRegion::ALL {
            per_region[region.index()] =
                self.inner.per_region[region.index()].load(Ordering::Relaxed);
        }
        BufferStats {
            budget: self.inner.budget,
            allocated: self.allocated(),
            peak: self.inner.peak.load(Ordering::Relaxed),
            per_region,
        }
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("budget", &self.inner.budget)
            .field("allocated", &self.allocated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_enforced() {
        let manager = BufferManager::with_budget(100);
        let a = manager.try_allocate(60, MemoryRegion::GraphStorage).unwrap();
        assert!(manager.try_allocate(50, MemoryRegion::GraphStorage).is_none());
        assert_eq!(manager.available(), Some(40));
        drop(a);
        assert!(manager.try_allocate(100, MemoryRegion::GraphStorage).is_some());
    }

    #[test]
    fn test_reserve_reports_context() {
        let manager = BufferManager::with_budget(10);
        let err = manager
            .reserve(20, MemoryRegion::ExecutionBuffers, "HashBuild")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceExhausted { ref context, requested: 20, available: 10 } if context == "HashBuild"
        ));
    }

    #[test]
    fn test_grant_grow_and_shrink() {
        let manager = BufferManager::with_budget(100);
        let mut grant = manager.empty_grant(MemoryRegion::ExecutionBuffers);
        assert!(grant.try_grow(80));
        assert!(!grant.try_grow(30));
        grant.shrink(50);
        assert_eq!(manager.allocated(), 30);
        assert_eq!(manager.stats().per_region[2], 30);
        assert_eq!(manager.stats().peak, 80);
    }

    #[test]
    fn test_pressure_levels() {
        let manager = BufferManager::with_budget(100);
        assert_eq!(manager.pressure_level(), PressureLevel::Normal);
        let _g = manager.try_allocate(90, MemoryRegion::GraphStorage).unwrap();
        assert_eq!(manager.pressure_level(), PressureLevel::High);
        assert!(manager.pressure_level().should_spill());
        assert_eq!(BufferManager::unlimited().pressure_level(), PressureLevel::Normal);
    }
}
