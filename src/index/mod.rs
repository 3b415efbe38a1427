//! In-memory index: the external collaborator the sorter drives but does not own the
//! sorting algorithm of. [`PointerArrayIndex`] is the crate's default implementation.
pub mod pointer_array;

pub use pointer_array::{PointerArrayCursor, PointerArrayIndex};

use crate::memory::RecordAddress;
use crate::record::RecordSource;
use crate::result::Result;

/// External contract for the in-memory sorter. The sorter owns this index's
/// backing array allocations: growth is driven from the outside by handing in a
/// larger array obtained from the [`crate::memory::MemoryManager`].
pub trait SortedIndex: Send + Sync + 'static {
    type Cursor: SortedCursor;

    fn has_space_for_another_record(&self) -> bool;

    /// Adopt a larger backing array, copying existing entries across. The array
    /// previously backing the index is released by the index itself.
    fn expand_pointer_array(&mut self, new_array: Box<[u64]>);

    fn insert_record(&mut self, address: RecordAddress, prefix: u64) -> Result<()>;

    /// Stable across `reset()` calls that happen afterwards only in the sense that a
    /// cursor obtained before a `reset()` keeps iterating its own frozen snapshot; it
    /// holds no reference to sorter-owned pages once `reset()` has run.
    fn sorted_iterator(&self) -> Self::Cursor;

    /// Empty the index for reuse, releasing its backing array.
    fn reset(&mut self);

    fn memory_usage(&self) -> usize;

    fn num_records(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.num_records() == 0
    }

    /// Release the backing array permanently. The index is not usable afterwards.
    fn free(self);
}

/// A [`RecordSource`] that can be cloned into an independent cursor at its current
/// position, needed by the spillable iterator to snapshot an unread tail.
pub trait SortedCursor: RecordSource + Send + 'static {
    fn try_clone(&self) -> Self;

    /// The page-backed address of the record most recently returned by `current()`.
    /// Used by the spillable iterator to identify the page it must pin across a
    /// mid-iteration spill.
    fn current_address(&self) -> RecordAddress;
}
