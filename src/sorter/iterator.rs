//! Spillable iterator: wraps the in-memory sorted cursor and tolerates a spill landing
//! in the middle of consumption.
use std::sync::Arc;

use parking_lot::Mutex;

use crate::index::{SortedCursor, SortedIndex};
use crate::memory::page::PageId;
use crate::memory::RecordAddress;
use crate::record::{CurrentRecord, RecordSource};
use crate::result::Result;
use crate::sorter::ExternalSorter;
use crate::spill::file::FileSpillWriter;
use crate::spill::SpillWriter;

enum Upstream<Idx: SortedIndex> {
    InMemory(Idx::Cursor),
    FromSpill(Box<dyn RecordSource + Send>),
}

/// State touched by both the owning consumer thread and a foreign `spill()` caller.
/// Guarded by one lock, the "spillable-iterator monitor".
pub(crate) struct SharedState<Idx: SortedIndex> {
    upstream: Upstream<Idx>,
    pending_swap: Option<Box<dyn RecordSource + Send>>,
    last_page: Option<PageId>,
    last_record_address: Option<RecordAddress>,
    remaining: usize,
    loaded: bool,
}

pub struct SpillableIterator<Idx: SortedIndex> {
    sorter: Arc<ExternalSorter<Idx>>,
    shared: Arc<Mutex<SharedState<Idx>>>,
    current: Option<(Vec<u8>, u64)>,
    total: usize,
}

impl<Idx: SortedIndex> SpillableIterator<Idx> {
    pub(crate) fn new(sorter: Arc<ExternalSorter<Idx>>, cursor: Idx::Cursor, total: usize) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            upstream: Upstream::InMemory(cursor),
            pending_swap: None,
            last_page: None,
            last_record_address: None,
            remaining: total,
            loaded: false,
        }));
        Self {
            sorter,
            shared,
            current: None,
            total,
        }
    }

    pub(crate) fn shared_handle(&self) -> Arc<Mutex<SharedState<Idx>>> {
        self.shared.clone()
    }

    /// Write every unread record to a new spill run and arrange for the next
    /// `load_next` to resume from it. No-op (returns `Ok(0)`) unless upstream is still
    /// the in-memory cursor, no swap is already pending, and records remain.
    pub fn spill(&mut self) -> Result<usize> {
        perform_spill(&self.sorter, &self.shared)
    }
}

impl<Idx: SortedIndex> RecordSource for SpillableIterator<Idx> {
    fn has_next(&self) -> bool {
        self.shared.lock().remaining > 0
    }

    fn load_next(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.remaining == 0 {
            return Ok(());
        }

        if let Some(swapped) = state.pending_swap.take() {
            if state.last_page.take().is_some() {
                self.sorter.free_all_pool_pages();
            }
            state.upstream = Upstream::FromSpill(swapped);
            state.last_record_address = None;
        }

        let (bytes, prefix, address) = match &mut state.upstream {
            Upstream::InMemory(cursor) => {
                cursor.load_next()?;
                let rec = cursor.current();
                let address = cursor.current_address();
                (rec.bytes.to_vec(), rec.prefix, Some(address))
            }
            Upstream::FromSpill(reader) => {
                reader.load_next()?;
                let rec = reader.current();
                (rec.bytes.to_vec(), rec.prefix, None)
            }
        };

        state.remaining -= 1;
        state.loaded = true;
        state.last_record_address = address;
        drop(state);
        self.current = Some((bytes, prefix));
        Ok(())
    }

    fn current(&self) -> CurrentRecord<'_> {
        let (bytes, prefix) = self
            .current
            .as_ref()
            .expect("load_next must be called before current");
        CurrentRecord {
            bytes,
            prefix: *prefix,
        }
    }

    fn num_records(&self) -> usize {
        self.total
    }
}

/// Shared implementation behind both [`SpillableIterator::spill`] and the sorter's
/// delegated `spill(.., Other)` path (the latter only ever holds a `Weak` to `shared`,
/// never the iterator itself, so this takes the pieces it needs directly).
/// Lock order: `shared` first, then the sorter's own monitor, never the reverse.
pub(crate) fn perform_spill<Idx: SortedIndex>(
    sorter: &Arc<ExternalSorter<Idx>>,
    shared: &Arc<Mutex<SharedState<Idx>>>,
) -> Result<usize> {
    let mut state = shared.lock();

    if !matches!(state.upstream, Upstream::InMemory(_)) || state.pending_swap.is_some() || state.remaining == 0 {
        return Ok(0);
    }

    let mut tail = match &state.upstream {
        Upstream::InMemory(cursor) => cursor.try_clone(),
        Upstream::FromSpill(_) => unreachable!("checked above"),
    };

    let freed_bytes = sorter.pool_total_bytes();

    let mut inner = sorter.lock_inner();
    let mut writer = FileSpillWriter::new(sorter.storage(), state.remaining)?;
    while tail.has_next() {
        tail.load_next()?;
        let rec = tail.current();
        writer.write(rec.prefix, rec.bytes)?;
    }
    let run = writer.close()?;
    let reader = run.reader()?;
    inner.registry.push(run);

    if let Some(index) = inner.index.as_mut() {
        index.reset();
    }
    drop(inner);

    let pinned_page = if state.loaded {
        state.last_record_address.map(|address| address.page_id())
    } else {
        None
    };
    sorter.free_pool_pages_except(pinned_page);

    state.pending_swap = Some(reader);
    state.last_page = pinned_page;

    log::debug!("spilled unread iterator tail, pinned page: {pinned_page:?}");
    Ok(freed_bytes)
}

pub(crate) type SharedStateWeak<Idx> = std::sync::Weak<Mutex<SharedState<Idx>>>;
