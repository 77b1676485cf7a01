//! Heap Management Module - Chunked Major Heap
//!
//! The major heap is a list of chunks obtained from the OS. Chunk `i + 1`
//! follows chunk `i` in the list; addresses need not be increasing. Every
//! chunk is tiled with blocks, each starting with a header, so the whole
//! heap can be walked block by block.
//!
//! Heap Structure:
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                     MajorHeap                          │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐            │
//! │  │ Chunk 0  │ → │ Chunk 1  │ → │ Chunk 2  │ → ...      │
//! │  │ hd|..|hd │   │ hd|......│   │ hd|..|hd │            │
//! │  └──────────┘   └──────────┘   └──────────┘            │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Free blocks are blue and owned by the [`FreeList`].

pub mod chunk;
pub mod free_list;
pub mod page_table;
pub mod ref_table;

pub use chunk::Chunk;
pub use free_list::{AddressOrderedFreeList, FreeList};
pub use page_table::{ChunkId, PageClass, PageTable};
pub use ref_table::RefTable;

use crate::config::GcConfig;
use crate::error::{MgcError, Result};
use crate::memory::{read_word, WORD_SIZE};
use crate::object::{Header, Value};

/// The major heap
pub struct MajorHeap {
    chunks: Vec<Chunk>,
    page_table: PageTable,
    free_list: AddressOrderedFreeList,

    /// Current heap size in words
    stat_heap_wsz: usize,
    /// High-water mark of `stat_heap_wsz`
    stat_top_heap_wsz: usize,
    /// Number of chunks ever added, including the first
    stat_heap_chunks: usize,

    heap_chunk_min_wsz: usize,
    major_heap_increment: usize,
}

impl MajorHeap {
    /// Map the first chunk and register it
    ///
    /// The requested size is clipped the same way a growth request is,
    /// computed against an empty heap.
    pub fn new(config: &GcConfig) -> Result<Self> {
        let mut heap = Self {
            chunks: Vec::new(),
            page_table: PageTable::new(),
            free_list: AddressOrderedFreeList::new(),
            stat_heap_wsz: 0,
            stat_top_heap_wsz: 0,
            stat_heap_chunks: 0,
            heap_chunk_min_wsz: config.heap_chunk_min_wsz,
            major_heap_increment: config.major_heap_increment,
        };

        let wsz = heap.clip_heap_chunk_wsz(config.initial_heap_wsz);
        heap.add_chunk(wsz).map_err(|e| match e {
            MgcError::OutOfMemory { requested_words } => MgcError::HeapInitialization(format!(
                "cannot allocate initial major heap of {} words",
                requested_words
            )),
            other => other,
        })?;

        log::debug!(
            "Initial major heap: {} words in 1 chunk",
            heap.stat_heap_wsz
        );
        Ok(heap)
    }

    /// Size of a chunk to add for a request of `wsz` words
    ///
    /// An increment above 1000 is a word count, otherwise a percentage of
    /// the current heap. The result is never below `wsz` nor the minimum
    /// chunk size.
    pub fn clip_heap_chunk_wsz(&self, wsz: usize) -> usize {
        let incr = if self.major_heap_increment > 1000 {
            self.major_heap_increment
        } else {
            self.stat_heap_wsz / 100 * self.major_heap_increment
        };
        wsz.max(incr).max(self.heap_chunk_min_wsz)
    }

    /// Add a chunk big enough for a block of `wosize` fields
    ///
    /// Returns the number of words added.
    pub fn expand(&mut self, wosize: usize) -> Result<usize> {
        let wsz = self.clip_heap_chunk_wsz(wosize + 1);
        self.add_chunk(wsz)?;
        log::debug!(
            "Growing heap to {}k words (+{} words)",
            self.stat_heap_wsz / 1024,
            wsz
        );
        Ok(wsz)
    }

    fn add_chunk(&mut self, wsz: usize) -> Result<()> {
        let chunk = Chunk::map(wsz).map_err(|e| {
            log::warn!("Chunk mapping failed: {}", e);
            MgcError::OutOfMemory {
                requested_words: wsz,
            }
        })?;
        let id: ChunkId = self.chunks.len();

        // The page table must know the chunk before any block in it is used.
        self.page_table
            .add(PageClass::IN_HEAP, chunk.start(), chunk.limit(), Some(id))?;

        unsafe { self.free_list.make_free_blocks(chunk.start(), chunk.wsz()) };

        self.stat_heap_wsz += chunk.wsz();
        self.stat_top_heap_wsz = self.stat_top_heap_wsz.max(self.stat_heap_wsz);
        self.stat_heap_chunks += 1;
        self.chunks.push(chunk);
        Ok(())
    }

    /// Take a block of `wosize` fields from the free list
    ///
    /// Returns the header address; the header is left for the caller.
    #[inline]
    pub fn allocate(&mut self, wosize: usize) -> Option<usize> {
        self.free_list.allocate(wosize)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    pub fn free_list(&self) -> &AddressOrderedFreeList {
        &self.free_list
    }

    pub fn free_list_mut(&mut self) -> &mut AddressOrderedFreeList {
        &mut self.free_list
    }

    #[inline]
    pub fn heap_wsz(&self) -> usize {
        self.stat_heap_wsz
    }

    pub fn top_heap_wsz(&self) -> usize {
        self.stat_top_heap_wsz
    }

    pub fn heap_chunks(&self) -> usize {
        self.stat_heap_chunks
    }

    #[inline]
    pub fn is_in_heap(&self, v: Value) -> bool {
        self.page_table.is_in_heap(v)
    }

    /// Walk every block of every chunk in list order
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            chunks: &self.chunks,
            chunk: 0,
            hp: self.chunks.first().map(Chunk::start).unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for MajorHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MajorHeap")
            .field("chunks", &self.chunks.len())
            .field("heap_wsz", &self.stat_heap_wsz)
            .field("top_heap_wsz", &self.stat_top_heap_wsz)
            .field("free_wsz", &self.free_list.free_wsz())
            .finish()
    }
}

/// Iterator over `(header address, header)` of all heap blocks
pub struct Blocks<'a> {
    chunks: &'a [Chunk],
    chunk: ChunkId,
    hp: usize,
}

impl Iterator for Blocks<'_> {
    type Item = (usize, Header);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let chunk = self.chunks.get(self.chunk)?;
            if self.hp < chunk.limit() {
                let header = Header::from_raw(unsafe { read_word(self.hp) });
                let hp = self.hp;
                self.hp += header.whsize() * WORD_SIZE;
                return Some((hp, header));
            }
            self.chunk += 1;
            self.hp = self.chunks.get(self.chunk).map(Chunk::start).unwrap_or(0);
        }
    }
}
