use serde::{Deserialize, Serialize};

/// Tunables for an [`ExternalSorter`](crate::sorter::ExternalSorter) instance.
///
/// The sorter itself never reads a config file; embedding applications load this from
/// wherever they keep their own configuration and pass it to `ExternalSorter::create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SorterConfig {
    /// Size in bytes of each page handed out by the memory manager. A single record must
    /// fit within one page.
    pub page_size: usize,
    /// Initial capacity, in entries, of the in-memory index's pointer array.
    pub initial_array_capacity: usize,
    /// Hint passed to a spill writer for the expected number of records in a run, used to
    /// size its internal buffers. Purely advisory.
    pub spill_record_count_hint: usize,
}

impl SorterConfig {
    pub const fn new(page_size: usize) -> Self {
        Self {
            page_size,
            initial_array_capacity: 1024,
            spill_record_count_hint: 1024,
        }
    }
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}
