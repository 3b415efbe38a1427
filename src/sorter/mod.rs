//! The external sorter itself: ties the page pool, in-memory index, and spill registry
//! together behind the insertion and output-iterator surface.
pub mod iterator;

use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use zerocopy::IntoBytes;

use crate::config::SorterConfig;
use crate::error::{Error, ErrorKind};
use crate::index::SortedIndex;
use crate::layout::RecordLenHeader;
use crate::memory::page::PagePool;
use crate::memory::{MemoryManager, PageId, RecordAddress};
use crate::merge::KWayMerger;
use crate::record::{CurrentRecord, RecordCompare, RecordSource};
use crate::result::Result;
use crate::sorter::iterator::{perform_spill, SharedStateWeak, SpillableIterator};
use crate::spill::file::{FileSpillWriter, SpillStorage};
use crate::spill::{SpillRegistry, SpillWriter};
use crate::task::TaskContext;

/// Identifies who asked for a spill: the sorter itself draining its own index, or the
/// memory manager acting on behalf of some other, unrelated consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpillTrigger {
    SelfTrigger,
    Other,
}

pub(crate) struct SorterInner<Idx: SortedIndex> {
    pub(crate) index: Option<Idx>,
    pub(crate) registry: SpillRegistry,
    active_iterator: Option<SharedStateWeak<Idx>>,
    output_taken: bool,
}

/// External sorter: buffers records through an in-memory [`SortedIndex`], spills it to
/// disk under pressure, and reassembles a sorted or insertion-order stream on demand.
/// Always constructed behind an `Arc` (`create` / `create_from_existing_index`) since
/// the spillable output iterator holds a handle back to it.
pub struct ExternalSorter<Idx: SortedIndex> {
    manager: Arc<dyn MemoryManager>,
    pool: Arc<Mutex<PagePool>>,
    storage: Arc<dyn SpillStorage>,
    record_cmp: Arc<RecordCompare>,
    config: SorterConfig,
    peak_bytes: AtomicUsize,
    inner: Mutex<SorterInner<Idx>>,
}

impl<Idx: SortedIndex> ExternalSorter<Idx> {
    fn new(
        manager: Arc<dyn MemoryManager>,
        pool: Arc<Mutex<PagePool>>,
        storage: Arc<dyn SpillStorage>,
        record_cmp: RecordCompare,
        config: SorterConfig,
        task_context: &dyn TaskContext,
        index: Idx,
        registry: SpillRegistry,
    ) -> Arc<Self> {
        let sorter = Arc::new(Self {
            manager,
            pool,
            storage,
            record_cmp: Arc::new(record_cmp),
            config,
            peak_bytes: AtomicUsize::new(0),
            inner: Mutex::new(SorterInner {
                index: Some(index),
                registry,
                active_iterator: None,
                output_taken: false,
            }),
        });

        let cleanup_handle = Arc::downgrade(&sorter);
        task_context.on_completion(Box::new(move || {
            if let Some(sorter) = cleanup_handle.upgrade() {
                sorter.cleanup_resources();
            }
        }));

        sorter
    }

    /// Construct a fresh, empty sorter. `pool` must be the same page pool the caller
    /// used to construct `index`, since the sorter and the index it drives always
    /// share one pool. Cleanup is registered with `task_context` so task completion
    /// always frees its resources.
    pub fn create(
        manager: Arc<dyn MemoryManager>,
        pool: Arc<Mutex<PagePool>>,
        storage: Arc<dyn SpillStorage>,
        record_cmp: RecordCompare,
        config: SorterConfig,
        task_context: &dyn TaskContext,
        index: Idx,
    ) -> Arc<Self> {
        Self::new(manager, pool, storage, record_cmp, config, task_context, index, SpillRegistry::new())
    }

    /// Construct a sorter from an already-populated index: immediately drains it to a
    /// spill run, then operates with a zero-capacity index until the first insert grows
    /// it again, observably equivalent to "index-less". `pool` must be the same pool
    /// `index` was built against.
    pub fn create_from_existing_index(
        manager: Arc<dyn MemoryManager>,
        pool: Arc<Mutex<PagePool>>,
        storage: Arc<dyn SpillStorage>,
        record_cmp: RecordCompare,
        config: SorterConfig,
        task_context: &dyn TaskContext,
        mut index: Idx,
    ) -> Result<Arc<Self>> {
        let mut registry = SpillRegistry::new();
        if !index.is_empty() {
            let mut writer = FileSpillWriter::new(storage.clone(), index.num_records())?;
            let mut cursor = index.sorted_iterator();
            while cursor.has_next() {
                cursor.load_next()?;
                let rec = cursor.current();
                writer.write(rec.prefix, rec.bytes)?;
            }
            let run = writer.close()?;
            registry.push(run);
        }
        index.reset();
        pool.lock().free_all(manager.as_ref());

        Ok(Self::new(manager, pool, storage, record_cmp, config, task_context, index, registry))
    }

    pub(crate) fn pool_total_bytes(&self) -> usize {
        self.pool.lock().total_bytes()
    }

    pub(crate) fn free_pool_pages_except(&self, keep: Option<PageId>) {
        self.pool.lock().free_all_except(keep, self.manager.as_ref());
    }

    pub(crate) fn free_all_pool_pages(&self) {
        self.free_pool_pages_except(None);
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, SorterInner<Idx>> {
        self.inner.lock()
    }

    pub(crate) fn storage(&self) -> Arc<dyn SpillStorage> {
        self.storage.clone()
    }

    fn recompute_peak(&self) {
        let current = self.manager.used_bytes();
        self.peak_bytes.fetch_max(current, Ordering::AcqRel);
    }

    /// Drain the in-memory index into a new spill run. Returns the number of bytes
    /// released, or 0 if the index was already empty.
    fn drain_index_locked(&self, inner: &mut SorterInner<Idx>) -> Result<usize> {
        let Some(index) = inner.index.as_mut() else {
            return Ok(0);
        };
        if index.is_empty() {
            return Ok(0);
        }

        let freed_bytes = index.memory_usage() + self.pool.lock().total_bytes();
        let num_records = index.num_records();

        let mut writer = FileSpillWriter::new(self.storage.clone(), num_records)?;
        let mut cursor = index.sorted_iterator();
        while cursor.has_next() {
            cursor.load_next()?;
            let rec = cursor.current();
            writer.write(rec.prefix, rec.bytes)?;
        }
        let run = writer.close()?;
        inner.registry.push(run);

        index.reset();
        self.pool.lock().free_all(self.manager.as_ref());

        log::debug!("drained {num_records} records into a new spill run, freed {freed_bytes} bytes");
        Ok(freed_bytes)
    }

    /// Grow the index's backing array if it has no room left. If allocation fails
    /// outright, drain the index ourselves to recover space. This sorter holds its own
    /// monitor for the whole call, so no other thread can have emptied the index
    /// behind our back in the meantime.
    fn ensure_room(&self, inner: &mut SorterInner<Idx>) -> Result<()> {
        let has_room = inner
            .index
            .as_ref()
            .ok_or_else(|| Error::contract("sorter used after cleanup_resources"))?
            .has_space_for_another_record();
        if has_room {
            return Ok(());
        }

        let new_len = self.next_array_len(inner);
        match self.manager.allocate_array(new_len) {
            Ok(array) => {
                inner.index.as_mut().unwrap().expand_pointer_array(array);
                Ok(())
            }
            Err(_) => {
                let freed = self.drain_index_locked(inner)?;
                if freed == 0 {
                    return Err(Error::new(ErrorKind::MemoryUnavailable));
                }
                // Draining reset the index to `len == 0` against its existing array, so
                // the record that triggered this call now has room without growing it.
                Ok(())
            }
        }
    }

    fn next_array_len(&self, inner: &SorterInner<Idx>) -> usize {
        let current_slots = inner
            .index
            .as_ref()
            .map(|index| index.memory_usage() / size_of::<u64>())
            .unwrap_or(0)
            .max(self.config.initial_array_capacity * 2);
        current_slots * 2
    }

    fn insert_raw(&self, full_record: &[u8], prefix: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_room(&mut inner)?;

        let mut pool = self.pool.lock();
        let pages_before = pool.num_allocated_pages();
        let (page_id, offset) = pool.acquire(full_record.len(), self.manager.as_ref())?;
        if pool.num_allocated_pages() != pages_before {
            log::debug!("allocated {page_id} ({} bytes)", pool.page_size());
        }
        pool.write(page_id, offset, full_record);
        drop(pool);

        let address = RecordAddress::encode(page_id, offset as u32);
        inner.index.as_mut().unwrap().insert_record(address, prefix)?;
        drop(inner);

        self.recompute_peak();
        log::trace!("inserted record at {page_id}+{offset} with prefix {prefix}");
        Ok(())
    }

    /// Insert a plain, length-prefixed record.
    pub fn insert(&self, bytes: &[u8], prefix: u64) -> Result<()> {
        let header = RecordLenHeader::new(bytes.len() as u32);
        let mut full = Vec::with_capacity(RecordLenHeader::SIZE + bytes.len());
        full.extend_from_slice(header.as_bytes());
        full.extend_from_slice(bytes);
        self.insert_raw(&full, prefix)
    }

    /// Insert a key/value record: on-page body is `[key_len][key][value]`, with its
    /// own outer length header covering that whole inner layout.
    pub fn insert_key_value(&self, key: &[u8], value: &[u8], prefix: u64) -> Result<()> {
        let inner_len = (key.len() + value.len() + RecordLenHeader::SIZE) as u32;
        let outer = RecordLenHeader::new(inner_len);
        let key_len_header = RecordLenHeader::new(key.len() as u32);

        let mut full = Vec::with_capacity(RecordLenHeader::SIZE * 2 + key.len() + value.len());
        full.extend_from_slice(outer.as_bytes());
        full.extend_from_slice(key_len_header.as_bytes());
        full.extend_from_slice(key);
        full.extend_from_slice(value);
        self.insert_raw(&full, prefix)
    }

    /// Drains the index on demand. `requested_bytes` is advisory; both paths here
    /// perform a full drain rather than a partial one.
    pub fn spill(self: &Arc<Self>, requested_bytes: usize, trigger: SpillTrigger) -> Result<usize> {
        let _ = requested_bytes;

        if trigger == SpillTrigger::Other {
            let weak = {
                let inner = self.inner.lock();
                inner.active_iterator.clone()
            };
            let Some(weak) = weak else { return Ok(0) };
            let Some(shared) = weak.upgrade() else { return Ok(0) };
            return perform_spill(self, &shared);
        }

        let mut inner = self.inner.lock();
        let freed = self.drain_index_locked(&mut inner)?;
        drop(inner);
        self.recompute_peak();
        Ok(freed)
    }

    /// Sorted output: a k-way merge of every spill run plus the in-memory tail, wrapped
    /// so a later `spill(.., Other)` can still drain the unread portion.
    pub fn sorted_iterator(self: &Arc<Self>) -> Result<Box<dyn RecordSource + Send>> {
        let mut inner = self.inner.lock();
        if inner.output_taken {
            return Err(Error::contract("an output iterator was already taken from this sorter"));
        }
        inner.output_taken = true;

        let index = inner
            .index
            .as_ref()
            .ok_or_else(|| Error::contract("sorter used after cleanup_resources"))?;
        let cursor = index.sorted_iterator();
        let total = cursor.num_records();

        let spillable = SpillableIterator::new(self.clone(), cursor, total);
        inner.active_iterator = Some(Arc::downgrade(&spillable.shared_handle()));

        if inner.registry.is_empty() {
            drop(inner);
            return Ok(Box::new(spillable));
        }

        let mut merger = KWayMerger::new(self.clone_record_cmp(), inner.registry.len() + 1);
        for run in inner.registry.iter() {
            merger.add_if_not_empty(run.reader()?)?;
        }
        merger.add_if_not_empty(Box::new(spillable))?;
        drop(inner);
        Ok(Box::new(merger.sorted_iterator()))
    }

    /// Insertion-order output: spill readers in registry order, then the in-memory
    /// tail. No spill-during-iteration support on this path.
    pub fn insertion_order_iterator(self: &Arc<Self>) -> Result<Box<dyn RecordSource + Send>> {
        let mut inner = self.inner.lock();
        if inner.output_taken {
            return Err(Error::contract("an output iterator was already taken from this sorter"));
        }
        inner.output_taken = true;

        let mut sources: Vec<Box<dyn RecordSource + Send>> = Vec::with_capacity(inner.registry.len() + 1);
        for run in inner.registry.iter() {
            sources.push(run.reader()?);
        }
        if let Some(index) = inner.index.as_ref() {
            if !index.is_empty() {
                sources.push(Box::new(index.sorted_iterator()));
            }
        }
        drop(inner);

        Ok(Box::new(ChainedCursor::new(sources)))
    }

    /// Spills `other` fully, adopts its runs, and leaves `other` holding no resources.
    pub fn merge(&self, other: &ExternalSorter<Idx>) -> Result<()> {
        let mut other_inner = other.inner.lock();
        other.drain_index_locked(&mut other_inner)?;
        if let Some(index) = other_inner.index.take() {
            index.free();
        }
        let transferred: Vec<_> = other_inner.registry.drain().collect();
        drop(other_inner);
        other.pool.lock().free_all(other.manager.as_ref());

        let mut inner = self.inner.lock();
        for run in transferred {
            inner.registry.push(run);
        }
        drop(inner);

        self.recompute_peak();
        Ok(())
    }

    /// Idempotent: deletes every spill file (failures logged, not propagated), frees
    /// all pages, and frees the in-memory index if one remains.
    pub fn cleanup_resources(&self) {
        let mut inner = self.inner.lock();
        inner.registry.cleanup();
        self.pool.lock().free_all(self.manager.as_ref());
        if let Some(index) = inner.index.take() {
            index.free();
        }
        drop(inner);
        self.recompute_peak();
        log::debug!("sorter resources released");
    }

    pub fn peak_memory_used_bytes(&self) -> usize {
        self.recompute_peak();
        self.peak_bytes.load(Ordering::Acquire)
    }

    pub fn number_of_allocated_pages(&self) -> usize {
        self.pool.lock().num_allocated_pages()
    }

    fn clone_record_cmp(&self) -> RecordCompare {
        let cmp = self.record_cmp.clone();
        Box::new(move |a, b| (cmp)(a, b))
    }
}

/// Chains several record sources in order, advancing to the next once the current one
/// is exhausted.
struct ChainedCursor {
    sources: std::collections::VecDeque<Box<dyn RecordSource + Send>>,
    current: Option<(Vec<u8>, u64)>,
    total: usize,
}

impl ChainedCursor {
    fn new(sources: Vec<Box<dyn RecordSource + Send>>) -> Self {
        let total = sources.iter().map(|s| s.num_records()).sum();
        Self {
            sources: sources.into(),
            current: None,
            total,
        }
    }
}

impl RecordSource for ChainedCursor {
    fn has_next(&self) -> bool {
        self.sources.iter().any(|s| s.has_next())
    }

    fn load_next(&mut self) -> Result<()> {
        while let Some(front) = self.sources.front_mut() {
            if front.has_next() {
                front.load_next()?;
                let rec = front.current();
                self.current = Some((rec.bytes.to_vec(), rec.prefix));
                return Ok(());
            }
            self.sources.pop_front();
        }
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
