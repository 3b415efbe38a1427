use std::mem::size_of;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::index::{SortedCursor, SortedIndex};
use crate::memory::page::PagePool;
use crate::memory::{MemoryManager, RecordAddress};
use crate::record::{CurrentRecord, RecordCompare, RecordSource};
use crate::result::Result;

/// Default pointer-array in-memory index. Entries are stored as interleaved
/// `(address, prefix)` pairs in a flat `u64` array supplied by the sorter;
/// sorting is unstable, keyed by prefix first and falling back to a caller-supplied
/// [`RecordCompare`] over the dereferenced payload on ties.
pub struct PointerArrayIndex {
    manager: Arc<dyn MemoryManager>,
    pool: Arc<Mutex<PagePool>>,
    record_cmp: Arc<RecordCompare>,
    array: Option<Box<[u64]>>,
    len: usize,
}

impl PointerArrayIndex {
    pub fn new(
        manager: Arc<dyn MemoryManager>,
        pool: Arc<Mutex<PagePool>>,
        record_cmp: Arc<RecordCompare>,
        initial_capacity: usize,
    ) -> Result<Self> {
        let array = manager.allocate_array(initial_capacity.max(1) * 2)?;
        Ok(Self {
            manager,
            pool,
            record_cmp,
            array: Some(array),
            len: 0,
        })
    }

    fn capacity(&self) -> usize {
        self.array.as_ref().map_or(0, |a| a.len() / 2)
    }
}

impl Drop for PointerArrayIndex {
    fn drop(&mut self) {
        if let Some(array) = self.array.take() {
            self.manager.free_array(array);
        }
    }
}

impl SortedIndex for PointerArrayIndex {
    type Cursor = PointerArrayCursor;

    fn has_space_for_another_record(&self) -> bool {
        self.len < self.capacity()
    }

    fn expand_pointer_array(&mut self, mut new_array: Box<[u64]>) {
        if let Some(old) = self.array.take() {
            let valid = self.len * 2;
            new_array[..valid].copy_from_slice(&old[..valid]);
            self.manager.free_array(old);
        }
        self.array = Some(new_array);
    }

    fn insert_record(&mut self, address: RecordAddress, prefix: u64) -> Result<()> {
        if !self.has_space_for_another_record() {
            return Err(Error::contract(
                "index has no space; caller must expand_pointer_array first",
            ));
        }

        let array = self.array.as_mut().expect("index used after free");
        array[self.len * 2] = address.0;
        array[self.len * 2 + 1] = prefix;
        self.len += 1;
        Ok(())
    }

    fn sorted_iterator(&self) -> PointerArrayCursor {
        let array = self.array.as_ref().expect("index used after free");
        let mut entries: Vec<(RecordAddress, u64)> = (0..self.len)
            .map(|i| (RecordAddress(array[i * 2]), array[i * 2 + 1]))
            .collect();

        let record_cmp = self.record_cmp.clone();
        let pool = self.pool.clone();

        entries.sort_unstable_by(|a, b| {
            a.1.cmp(&b.1).then_with(|| {
                let guard = pool.lock();
                let ba = guard.read_record(a.0);
                let bb = guard.read_record(b.0);
                (record_cmp)(&ba, &bb)
            })
        });

        PointerArrayCursor {
            entries: Arc::new(entries),
            pool: self.pool.clone(),
            pos: 0,
            current: None,
            current_address: None,
        }
    }

    fn reset(&mut self) {
        self.len = 0;
    }

    fn memory_usage(&self) -> usize {
        self.array.as_ref().map_or(0, |a| a.len() * size_of::<u64>())
    }

    fn num_records(&self) -> usize {
        self.len
    }

    fn free(self) {
        // `Drop` releases the backing array back to the memory manager.
    }
}

/// Independent, clonable cursor over a frozen snapshot of sorted `(address, prefix)`
/// pairs. Holds no reference to the index itself, only to the page pool, so it
/// survives a `reset()` of the index that produced it.
pub struct PointerArrayCursor {
    entries: Arc<Vec<(RecordAddress, u64)>>,
    pool: Arc<Mutex<PagePool>>,
    pos: usize,
    current: Option<(Vec<u8>, u64)>,
    current_address: Option<RecordAddress>,
}

impl RecordSource for PointerArrayCursor {
    fn has_next(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn load_next(&mut self) -> Result<()> {
        if !self.has_next() {
            return Ok(());
        }

        let (address, prefix) = self.entries[self.pos];
        let bytes = self.pool.lock().read_record(address);
        self.current = Some((bytes, prefix));
        self.current_address = Some(address);
        self.pos += 1;
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
        self.entries.len()
    }
}

impl SortedCursor for PointerArrayCursor {
    fn try_clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            pool: self.pool.clone(),
            pos: self.pos,
            current: None,
            current_address: None,
        }
    }

    fn current_address(&self) -> RecordAddress {
        self.current_address.expect("load_next must be called before current_address")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::heap::HeapMemoryManager;

    fn ascending_bytes_cmp() -> RecordCompare {
        Box::new(|a, b| a.cmp(b))
    }

    #[test]
    fn sorts_by_prefix_then_ties_break_on_record_compare() {
        let manager: Arc<dyn MemoryManager> = Arc::new(HeapMemoryManager::new());
        let pool = Arc::new(Mutex::new(PagePool::new(4096)));
        let mut index = PointerArrayIndex::new(manager.clone(), pool.clone(), Arc::new(ascending_bytes_cmp()), 8).unwrap();

        let mut insert = |payload: &[u8], prefix: u64| {
            let header = crate::layout::RecordLenHeader::new(payload.len() as u32);
            let mut body = Vec::with_capacity(crate::layout::RecordLenHeader::SIZE + payload.len());
            body.extend_from_slice(zerocopy::IntoBytes::as_bytes(&header));
            body.extend_from_slice(payload);
            let (id, offset) = pool.lock().acquire(body.len(), manager.as_ref()).unwrap();
            pool.lock().write(id, offset, &body);
            let address = RecordAddress::encode(id, offset as u32);
            index.insert_record(address, prefix).unwrap();
        };

        insert(b"b", 1);
        insert(b"a", 1);
        insert(b"z", 0);

        let mut cursor = index.sorted_iterator();
        let mut out = Vec::new();
        while cursor.has_next() {
            cursor.load_next().unwrap();
            out.push((cursor.current().prefix, cursor.current().bytes.to_vec()));
        }

        assert_eq!(
            out,
            vec![(0, b"z".to_vec()), (1, b"a".to_vec()), (1, b"b".to_vec())]
        );
    }
}
