//! Paged slot arena for node and edge records.
//!
//! Ids are slot indexes. Slots are handed out in increasing order and a
//! slot is only reused after garbage collection has reclaimed its record,
//! so an id never names two live entities at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

/// Slots per page.
pub const PAGE_SIZE: usize = 1024;

type Page<T> = RwLock<Vec<Option<T>>>;

/// A growable array of optional records with per-page latches.
pub struct SlotArena<T> {
    pages: RwLock<Vec<Arc<Page<T>>>>,
    next: AtomicU64,
    free: Mutex<Vec<u64>>,
}

impl<T> SlotArena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: RwLock::new(Vec::new()),
            next: AtomicU64::new(0),
            free: Mutex::new(Vec::new()),
        }
    }

    /// Stores `value` in a fresh or reclaimed slot and returns the slot.
    pub fn allocate(&self, value: T) -> u64 {
        let slot = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| self.next.fetch_add(1, Ordering::AcqRel));
        self.put(slot, value);
        slot
    }

    /// Stores `value` at a specific slot (recovery). Later allocations
    /// start above it.
    pub fn insert_at(&self, slot: u64, value: T) {
        self.next.fetch_max(slot + 1, Ordering::AcqRel);
        self.free.lock().retain(|&s| s != slot);
        self.put(slot, value);
    }

    fn put(&self, slot: u64, value: T) {
        let page = self.page_for_write(slot);
        page.write()[slot as usize % PAGE_SIZE] = Some(value);
    }

    fn page_for_write(&self, slot: u64) -> Arc<Page<T>> {
        let index = slot as usize / PAGE_SIZE;
        if let Some(page) = self.pages.read().get(index) {
            return Arc::clone(page);
        }
        let mut pages = self.pages.write();
        while pages.len() <= index {
            pages.push(Arc::new(RwLock::new(
                std::iter::repeat_with(|| None).take(PAGE_SIZE).collect(),
            )));
        }
        Arc::clone(&pages[index])
    }

    fn page(&self, slot: u64) -> Option<Arc<Page<T>>> {
        self.pages.read().get(slot as usize / PAGE_SIZE).cloned()
    }

    /// Runs `f` on the record at `slot`, if any.
    pub fn with<R>(&self, slot: u64, f: impl FnOnce(&T) -> R) -> Option<R> {
        let page = self.page(slot)?;
        let guard = page.read();
        guard[slot as usize % PAGE_SIZE].as_ref().map(f)
    }

    /// Runs `f` on the record at `slot` mutably, if any.
    pub fn with_mut<R>(&self, slot: u64, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let page = self.page(slot)?;
        let mut guard = page.write();
        guard[slot as usize % PAGE_SIZE].as_mut().map(f)
    }

    /// Removes the record at `slot` and makes the slot reusable.
    pub fn free(&self, slot: u64) -> Option<T> {
        let page = self.page(slot)?;
        let taken = page.write()[slot as usize % PAGE_SIZE].take();
        if taken.is_some() {
            self.free.lock().push(slot);
        }
        taken
    }

    /// One past the highest slot ever allocated.
    #[must_use]
    pub fn high_water(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Raises the high-water mark to at least `high_water`.
    pub fn ensure_high_water(&self, high_water: u64) {
        self.next.fetch_max(high_water, Ordering::AcqRel);
    }

    /// Calls `f` for each occupied slot in `[start, end)`, taking each page
    /// latch once.
    pub fn for_each_in(&self, start: u64, end: u64, mut f: impl FnMut(u64, &T)) {
        let end = end.min(self.high_water());
        let mut slot = start;
        while slot < end {
            let page_start = slot - slot % PAGE_SIZE as u64;
            let page_end = (page_start + PAGE_SIZE as u64).min(end);
            if let Some(page) = self.page(slot) {
                let guard = page.read();
                for s in slot..page_end {
                    if let Some(record) = &guard[s as usize % PAGE_SIZE] {
                        f(s, record);
                    }
                }
            }
            slot = page_end;
        }
    }

    /// Calls `f` mutably for each occupied slot, page by page.
    pub fn for_each_mut(&self, mut f: impl FnMut(u64, &mut T)) {
        let pages: Vec<Arc<Page<T>>> = self.pages.read().clone();
        for (p, page) in pages.iter().enumerate() {
            let mut guard = page.write();
            for (i, record) in guard.iter_mut().enumerate() {
                if let Some(record) = record {
                    f((p * PAGE_SIZE + i) as u64, record);
                }
            }
        }
    }

    /// Marks every empty slot below the high-water mark as reusable.
    /// Called once after loading records with [`insert_at`](Self::insert_at).
    pub fn rebuild_free_list(&self) {
        let pages: Vec<Arc<Page<T>>> = self.pages.read().clone();
        let high = self.high_water();
        let mut free = self.free.lock();
        free.clear();
        for (p, page) in pages.iter().enumerate() {
            let guard = page.read();
            for (i, record) in guard.iter().enumerate() {
                let slot = (p * PAGE_SIZE + i) as u64;
                if slot < high && record.is_none() {
                    free.push(slot);
                }
            }
        }
        // Lowest slots are reused first
        free.reverse();
    }

    /// Number of reclaimed slots awaiting reuse.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.free.lock().len()
    }
}

impl<T> Default for SlotArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_read() {
        let arena = SlotArena::new();
        let a = arena.allocate("a");
        let b = arena.allocate("b");
        assert_eq!((a, b), (0, 1));
        assert_eq!(arena.with(b, |v| *v), Some("b"));
        assert_eq!(arena.with(7, |v| *v), None);
    }

    #[test]
    fn test_free_slot_is_reused() {
        let arena = SlotArena::new();
        let a = arena.allocate(1);
        arena.allocate(2);
        assert_eq!(arena.free(a), Some(1));
        assert_eq!(arena.allocate(3), a);
        assert_eq!(arena.high_water(), 2);
    }

    #[test]
    fn test_for_each_spans_pages() {
        let arena = SlotArena::new();
        for i in 0..(PAGE_SIZE as u64 + 10) {
            arena.allocate(i);
        }
        arena.free(5);
        let mut seen = 0;
        arena.for_each_in(0, u64::MAX, |slot, v| {
            assert_eq!(slot, *v);
            seen += 1;
        });
        assert_eq!(seen, PAGE_SIZE + 9);
    }

    #[test]
    fn test_rebuild_free_list() {
        let arena = SlotArena::new();
        arena.insert_at(0, 'a');
        arena.insert_at(3, 'b');
        arena.rebuild_free_list();
        assert_eq!(arena.free_slots(), 2);
        assert_eq!(arena.allocate('c'), 1);
    }

    #[test]
    fn test_insert_at_moves_high_water() {
        let arena = SlotArena::new();
        arena.insert_at(2000, "x");
        assert_eq!(arena.high_water(), 2001);
        assert_eq!(arena.allocate("y"), 2001);
    }
}
