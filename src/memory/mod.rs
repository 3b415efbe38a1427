//! Memory-manager contract and the page/pool machinery built on top of it.
pub mod heap;
pub mod page;

pub use page::{Page, PageId, PagePool, RecordAddress};

use crate::result::Result;

/// External collaborator: the task-level memory manager and page allocator.
///
/// The sorter never assumes a concrete allocation strategy; it only needs pages and
/// growable arrays it can hand to the in-memory index. `allocate_array` may fail with
/// [`crate::error::ErrorKind::MemoryUnavailable`] to signal backpressure, which the
/// insertion path treats as recoverable if a concurrent spill already freed space.
pub trait MemoryManager: Send + Sync {
    /// Allocate a page of at least `min_bytes`. Implementations are free to round up.
    fn allocate_page(&self, min_bytes: usize) -> Result<Page>;

    /// Return a page to the manager. The sorter never touches the page again afterwards.
    fn free_page(&self, page: Page);

    /// Allocate a backing array of `len` `u64` slots for the in-memory index.
    fn allocate_array(&self, len: usize) -> Result<Box<[u64]>>;

    /// Release a previously allocated array.
    fn free_array(&self, array: Box<[u64]>);

    /// Encode a `(page, intra-page offset)` pair into the opaque 64-bit record address.
    fn encode_address(&self, page: &Page, intra_offset: u32) -> RecordAddress;

    /// Currently live bytes attributed to this manager's allocations, for `peak_memory_used`.
    fn used_bytes(&self) -> usize;
}
