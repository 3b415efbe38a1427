use std::collections::HashMap;

use zerocopy::FromBytes;

use crate::error::{Error, ErrorKind};
use crate::layout::RecordLenHeader;
use crate::memory::MemoryManager;
use crate::result::Result;

/// Identifies one page owned by a [`PagePool`]. Unique within the lifetime of the pool
/// that allocated it; a pool never reuses an id even after the page is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub(crate) u32);

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page#{}", self.0)
    }
}

/// Opaque 64-bit handle encoding `(page-id, intra-page offset)`.
///
/// Dereferencing requires the page to still be live in the owning [`PagePool`]; the
/// sorter never hands out an address for a page it has already freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordAddress(pub u64);

impl RecordAddress {
    pub fn encode(page_id: PageId, intra_offset: u32) -> Self {
        Self(((page_id.0 as u64) << 32) | intra_offset as u64)
    }

    pub fn page_id(&self) -> PageId {
        PageId((self.0 >> 32) as u32)
    }

    pub fn offset(&self) -> u32 {
        self.0 as u32
    }
}

/// A contiguous, append-only byte range owned exclusively by the sorter that allocated
/// it. Random overwrite is forbidden; only the live `[0..cursor)` prefix is readable
/// data, the rest is uninitialized-but-zeroed slack.
pub struct Page {
    pub(crate) id: PageId,
    bytes: Box<[u8]>,
}

impl Page {
    pub fn new(id: PageId, size: usize) -> Self {
        Self {
            id,
            bytes: vec![0u8; size].into_boxed_slice(),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Tracks pages allocated from the memory manager and owns the *current* write page
/// plus its cursor.
pub struct PagePool {
    page_size: usize,
    pages: HashMap<PageId, Page>,
    order: Vec<PageId>,
    current: Option<PageId>,
    cursor: usize,
}

impl PagePool {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: HashMap::new(),
            order: Vec::new(),
            current: None,
            cursor: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_allocated_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.pages.values().map(Page::size).sum()
    }

    pub fn get(&self, id: PageId) -> Option<&Page> {
        self.pages.get(&id)
    }

    /// Force the cursor to the current page's end so the next insert acquires a fresh
    /// page.
    pub fn close_current_page(&mut self) {
        self.cursor = self.page_size;
    }

    /// Ensure the current page has `required` bytes free, allocating a new page from
    /// `manager` if it doesn't. Returns the page id and intra-page offset to write at.
    pub fn acquire(&mut self, required: usize, manager: &dyn MemoryManager) -> Result<(PageId, usize)> {
        if required > self.page_size {
            return Err(Error::new(ErrorKind::ContractViolation(
                "record does not fit in a single page",
            )));
        }

        let needs_new_page = match self.current {
            Some(id) => self.cursor + required > self.pages[&id].size(),
            None => true,
        };

        if needs_new_page {
            let page = manager.allocate_page(self.page_size)?;
            let id = page.id();
            self.order.push(id);
            self.pages.insert(id, page);
            self.current = Some(id);
            self.cursor = 0;
        }

        let offset = self.cursor;
        self.cursor += required;
        Ok((self.current.unwrap(), offset))
    }

    pub fn write(&mut self, id: PageId, offset: usize, bytes: &[u8]) {
        let page = self.pages.get_mut(&id).expect("page must be live to write");
        page.as_mut_slice()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Decode the length-prefixed record layout written by the insertion path: a
    /// 4-byte little-endian length followed by that many body bytes.
    pub fn read_record(&self, address: RecordAddress) -> Vec<u8> {
        let page = self
            .pages
            .get(&address.page_id())
            .expect("record address must point at a live page");
        let offset = address.offset() as usize;
        let slice = page.as_slice();
        let header = RecordLenHeader::ref_from_bytes(&slice[offset..offset + RecordLenHeader::SIZE])
            .expect("record length header must be well-formed");
        let len = header.len.get() as usize;
        let body_start = offset + RecordLenHeader::SIZE;
        slice[body_start..body_start + len].to_vec()
    }

    /// Free every page except `keep`, returning their owned storage to `manager`.
    /// Used by the spill coordinator and the pinned-page release in the spillable
    /// iterator.
    pub fn free_all_except(&mut self, keep: Option<PageId>, manager: &dyn MemoryManager) {
        let mut remaining = Vec::new();

        for id in self.order.drain(..) {
            if Some(id) == keep {
                remaining.push(id);
                continue;
            }
            if let Some(page) = self.pages.remove(&id) {
                manager.free_page(page);
            }
        }

        self.order = remaining;
        self.current = keep;
        self.cursor = keep.map(|id| self.pages[&id].size()).unwrap_or(0);
    }

    pub fn free_all(&mut self, manager: &dyn MemoryManager) {
        self.free_all_except(None, manager);
    }
}
