//! Heap Chunk - one contiguous mapping owned by the major heap
//!
//! Chunks are anonymous mappings rounded up to the OS page size. The usable
//! size is exactly what was asked for; the tail of the last page is never
//! handed out.

use crate::error::{MgcError, Result};
use crate::memory::{bsize_wsize, WORD_SIZE};
use memmap2::{MmapMut, MmapOptions};

/// Round `size` up to the OS page size
pub fn align_to_page(size: usize) -> usize {
    let page = page_size::get();
    (size + page - 1) & !(page - 1)
}

/// A heap chunk
pub struct Chunk {
    /// Owning allocation handle; unmapped on drop
    mapping: MmapMut,
    /// Address of the first word
    start: usize,
    /// Bytes obtained from the OS
    alloc: usize,
    /// Usable bytes
    size: usize,
}

impl Chunk {
    /// Map a zeroed chunk of `wsz` words
    pub fn map(wsz: usize) -> Result<Self> {
        if wsz == 0 {
            return Err(MgcError::InvalidArgument("chunk size must be > 0".to_string()));
        }
        let size = bsize_wsize(wsz);
        let alloc = align_to_page(size);

        let mut mapping = MmapOptions::new().len(alloc).map_anon().map_err(|e| {
            MgcError::HeapInitialization(format!("cannot map {} bytes: {}", alloc, e))
        })?;
        let start = mapping.as_mut_ptr() as usize;
        debug_assert!(start % WORD_SIZE == 0);

        Ok(Self {
            mapping,
            start,
            alloc,
            size,
        })
    }

    /// Address of the first word
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last usable byte
    #[inline]
    pub fn limit(&self) -> usize {
        self.start + self.size
    }

    /// Usable size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Usable size in words
    #[inline]
    pub fn wsz(&self) -> usize {
        self.size / WORD_SIZE
    }

    /// Bytes obtained from the OS
    #[inline]
    pub fn alloc(&self) -> usize {
        self.alloc
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.limit()
    }

    /// Mapping length, for diagnostics
    pub fn mapped_len(&self) -> usize {
        self.mapping.len()
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("start", &format_args!("{:#x}", self.start))
            .field("size", &self.size)
            .field("alloc", &self.alloc)
            .finish()
    }
}
