pub use crate::config::SorterConfig;
pub use crate::error::{Error, ErrorKind};
pub use crate::index::{PointerArrayCursor, PointerArrayIndex, SortedCursor, SortedIndex};
pub use crate::memory::heap::HeapMemoryManager;
pub use crate::memory::{MemoryManager, Page, PageId, PagePool, RecordAddress};
pub use crate::record::{CurrentRecord, RecordCompare, RecordSource};
pub use crate::result::Result;
pub use crate::sorter::{ExternalSorter, SpillTrigger};
pub use crate::spill::file::{FsSpillStorage, InMemorySpillStorage, SpillStorage};
pub use crate::task::{DeferredTaskContext, NoopTaskContext, TaskContext};
