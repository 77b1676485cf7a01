//! Page Table - O(1) classification of addresses
//!
//! Every registered range is recorded page by page in a hash map keyed by
//! page number. Heap pages also remember which chunk they belong to, which
//! lets the sweeper decide whether an address has been swept yet.
//!
//! Ranges of different classes must not share a page. Chunks are page
//! aligned; young and static areas should be too.

use crate::error::{MgcError, Result};
use crate::object::Value;
use rustc_hash::FxHashMap;

/// Page granularity of the table
pub const PAGE_LOG: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_LOG;

bitflags::bitflags! {
    /// What a page holds
    pub struct PageClass: u8 {
        const IN_HEAP = 0b0001;
        const IN_YOUNG = 0b0010;
        const IN_STATIC_DATA = 0b0100;
    }
}

/// Index of a chunk in the major heap
pub type ChunkId = usize;

#[derive(Debug, Clone, Copy)]
struct PageEntry {
    class: PageClass,
    chunk: Option<ChunkId>,
}

/// Address-range index
#[derive(Debug, Default)]
pub struct PageTable {
    pages: FxHashMap<usize, PageEntry>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn page(addr: usize) -> usize {
        addr >> PAGE_LOG
    }

    /// Record `[start, end)` with `class`
    ///
    /// Fails only when the table itself cannot grow.
    pub fn add(
        &mut self,
        class: PageClass,
        start: usize,
        end: usize,
        chunk: Option<ChunkId>,
    ) -> Result<()> {
        if end <= start {
            return Ok(());
        }
        let first = Self::page(start);
        let last = Self::page(end - 1);
        self.pages.try_reserve(last - first + 1).map_err(|e| {
            MgcError::PageTable(format!(
                "cannot index {} pages at {:#x}: {}",
                last - first + 1,
                start,
                e
            ))
        })?;

        for page in first..=last {
            let entry = self.pages.entry(page).or_insert(PageEntry {
                class: PageClass::empty(),
                chunk: None,
            });
            entry.class |= class;
            if chunk.is_some() {
                entry.chunk = chunk;
            }
        }
        Ok(())
    }

    /// Forget `class` for `[start, end)`
    pub fn remove(&mut self, class: PageClass, start: usize, end: usize) {
        if end <= start {
            return;
        }
        for page in Self::page(start)..=Self::page(end - 1) {
            let drop_entry = match self.pages.get_mut(&page) {
                Some(entry) => {
                    entry.class.remove(class);
                    if class.contains(PageClass::IN_HEAP) {
                        entry.chunk = None;
                    }
                    entry.class.is_empty()
                }
                None => false,
            };
            if drop_entry {
                self.pages.remove(&page);
            }
        }
    }

    #[inline]
    pub fn classify(&self, addr: usize) -> PageClass {
        self.pages
            .get(&Self::page(addr))
            .map(|entry| entry.class)
            .unwrap_or_else(PageClass::empty)
    }

    /// Chunk owning the heap page of `addr`
    #[inline]
    pub fn chunk_of(&self, addr: usize) -> Option<ChunkId> {
        self.pages.get(&Self::page(addr)).and_then(|entry| entry.chunk)
    }

    #[inline]
    pub fn is_in_heap(&self, v: Value) -> bool {
        v.is_block() && self.classify(v.raw()).contains(PageClass::IN_HEAP)
    }

    #[inline]
    pub fn is_young(&self, v: Value) -> bool {
        v.is_block() && self.classify(v.raw()).contains(PageClass::IN_YOUNG)
    }

    #[inline]
    pub fn is_in_heap_or_young(&self, v: Value) -> bool {
        v.is_block()
            && self
                .classify(v.raw())
                .intersects(PageClass::IN_HEAP | PageClass::IN_YOUNG)
    }

    /// Heap, young or static data: anything with a readable header
    #[inline]
    pub fn is_in_value_area(&self, v: Value) -> bool {
        v.is_block() && !self.classify(v.raw()).is_empty()
    }

    /// Number of indexed pages
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
