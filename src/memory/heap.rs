use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use dashmap::DashSet;
use parking_lot::Mutex;

use crate::error::{Error, ErrorKind};
use crate::memory::page::{Page, PageId, RecordAddress};
use crate::memory::MemoryManager;
use crate::result::Result;

/// Default, heap-backed [`MemoryManager`]. Tracks live pages and arrays in concurrent
/// sets so tests can independently verify the cleanup invariant, and so `spill()` may
/// legally be invoked from a foreign thread.
pub struct HeapMemoryManager {
    next_page_id: AtomicU32,
    live_pages: DashSet<PageId>,
    live_array_bytes: AtomicUsize,
    used_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    budget_bytes: Option<usize>,
    /// Bytes a caller has asked this manager to reclaim via `request_spill`, consumed
    /// the next time `allocate_array`/`allocate_page` would otherwise fail. Lets tests
    /// play the role of "the memory manager asks for bytes back" ahead of an
    /// allocation, exercising the foreign-trigger spill path in isolation.
    pending_reclaim: Mutex<usize>,
}

impl HeapMemoryManager {
    pub fn new() -> Self {
        Self::with_budget(None)
    }

    /// A manager that fails allocation once `used_bytes()` would exceed `budget`.
    pub fn with_budget(budget: Option<usize>) -> Self {
        Self {
            next_page_id: AtomicU32::new(0),
            live_pages: DashSet::new(),
            live_array_bytes: AtomicUsize::new(0),
            used_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            budget_bytes: budget,
            pending_reclaim: Mutex::new(0),
        }
    }

    pub fn num_live_pages(&self) -> usize {
        self.live_pages.len()
    }

    pub fn live_array_bytes(&self) -> usize {
        self.live_array_bytes.load(Ordering::Acquire)
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::Acquire)
    }

    /// Simulates the memory manager demanding `bytes` back; the next allocation call
    /// treats that much headroom as already reclaimed.
    pub fn note_pending_reclaim(&self, bytes: usize) {
        *self.pending_reclaim.lock() += bytes;
    }

    fn track_alloc(&self, bytes: usize) -> Result<()> {
        let mut pending = self.pending_reclaim.lock();
        let effective_budget = self.budget_bytes.map(|b| b + *pending);

        let prev = self.used_bytes.fetch_add(bytes, Ordering::AcqRel);
        let new_total = prev + bytes;

        if let Some(budget) = effective_budget {
            if new_total > budget {
                self.used_bytes.fetch_sub(bytes, Ordering::AcqRel);
                return Err(Error::new(ErrorKind::MemoryUnavailable));
            }
        }

        *pending = pending.saturating_sub(bytes.min(*pending));
        self.peak_bytes.fetch_max(new_total, Ordering::AcqRel);
        Ok(())
    }

    fn track_free(&self, bytes: usize) {
        self.used_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }
}

impl Default for HeapMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager for HeapMemoryManager {
    fn allocate_page(&self, min_bytes: usize) -> Result<Page> {
        self.track_alloc(min_bytes)?;
        let id = PageId(self.next_page_id.fetch_add(1, Ordering::Relaxed));
        self.live_pages.insert(id);
        Ok(Page::new(id, min_bytes))
    }

    fn free_page(&self, page: Page) {
        self.track_free(page.size());
        self.live_pages.remove(&page.id());
    }

    fn allocate_array(&self, len: usize) -> Result<Box<[u64]>> {
        let bytes = len * size_of::<u64>();
        self.track_alloc(bytes)?;
        self.live_array_bytes.fetch_add(bytes, Ordering::AcqRel);
        Ok(vec![0u64; len].into_boxed_slice())
    }

    fn free_array(&self, array: Box<[u64]>) {
        let bytes = array.len() * size_of::<u64>();
        self.live_array_bytes.fetch_sub(bytes, Ordering::AcqRel);
        self.track_free(bytes);
    }

    fn encode_address(&self, page: &Page, intra_offset: u32) -> RecordAddress {
        RecordAddress::encode(page.id(), intra_offset)
    }

    fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_page_round_trips_live_count() {
        let mgr = HeapMemoryManager::new();
        let page = mgr.allocate_page(4096).unwrap();
        assert_eq!(mgr.num_live_pages(), 1);
        mgr.free_page(page);
        assert_eq!(mgr.num_live_pages(), 0);
    }

    #[test]
    fn budget_rejects_over_allocation() {
        let mgr = HeapMemoryManager::with_budget(Some(100));
        assert!(mgr.allocate_page(200).is_err());
        assert_eq!(mgr.num_live_pages(), 0);
    }

    #[test]
    fn pending_reclaim_lets_one_allocation_through() {
        let mgr = HeapMemoryManager::with_budget(Some(100));
        mgr.note_pending_reclaim(100);
        assert!(mgr.allocate_page(200).is_ok());
    }

    #[test]
    fn peak_bytes_is_monotonic() {
        let mgr = HeapMemoryManager::new();
        let a = mgr.allocate_page(4096).unwrap();
        let peak_after_a = mgr.peak_bytes();
        mgr.free_page(a);
        let b = mgr.allocate_page(1024).unwrap();
        assert!(mgr.peak_bytes() >= peak_after_a);
        mgr.free_page(b);
    }
}
