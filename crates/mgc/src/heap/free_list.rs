//! Free List - blue blocks available for major-heap allocation
//!
//! The sweeper hands every reclaimed block to [`FreeList::merge_block`],
//! which coalesces it with the free block immediately before it (the merge
//! point) and with a free block immediately after it. Blue blocks seen by the
//! sweeper move the merge point forward.

use crate::memory::{write_word, WORD_SIZE};
use crate::object::{tag, Color, Header, Value, MAX_WOSIZE};
use std::collections::BTreeMap;

/// Free-list collaborator consumed by the sweeper and the allocator
pub trait FreeList {
    /// Reset the merge point at the start of a sweep
    fn init_merge(&mut self);

    /// Turn the white block `v` into free space; returns the next address to sweep
    ///
    /// # Safety
    ///
    /// `v` must be a white block inside the heap, not referenced by any live block.
    unsafe fn merge_block(&mut self, v: Value) -> usize;

    /// Record the blue block at `hp` as the merge point
    fn set_merge_point(&mut self, hp: usize);

    /// Format `[start, start + wsz words)` as blue blocks and add them
    ///
    /// # Safety
    ///
    /// The range must be unused heap memory.
    unsafe fn make_free_blocks(&mut self, start: usize, wsz: usize);

    /// Remove a block of `wosize` fields; returns its header address
    ///
    /// The header of the returned block is left for the caller to write.
    fn allocate(&mut self, wosize: usize) -> Option<usize>;

    /// Total free words, headers included
    fn free_wsz(&self) -> usize;
}

/// Address-ordered first-fit free list
#[derive(Debug, Default)]
pub struct AddressOrderedFreeList {
    /// Header address -> size in words including header
    blocks: BTreeMap<usize, usize>,
    merge: Option<usize>,
    cur_wsz: usize,
}

impl AddressOrderedFreeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of free blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Largest free block in words including header
    pub fn largest_whsize(&self) -> usize {
        self.blocks.values().copied().max().unwrap_or(0)
    }

    unsafe fn write_blue(hp: usize, whsize: usize) {
        write_word(hp, Header::make(whsize - 1, tag::ABSTRACT, Color::Blue).raw());
    }
}

impl FreeList for AddressOrderedFreeList {
    fn init_merge(&mut self) {
        self.merge = None;
    }

    unsafe fn merge_block(&mut self, v: Value) -> usize {
        let hp = v.hp();
        let mut whsize = v.header().whsize();
        let mut next = hp + whsize * WORD_SIZE;
        self.cur_wsz += whsize;

        // Swallow an adjacent free block that follows.
        if let Some(&next_wh) = self.blocks.get(&next) {
            if whsize + next_wh - 1 <= MAX_WOSIZE {
                self.blocks.remove(&next);
                whsize += next_wh;
                next += next_wh * WORD_SIZE;
            }
        }

        if let Some(prev) = self.merge {
            if let Some(&prev_wh) = self.blocks.get(&prev) {
                if prev + prev_wh * WORD_SIZE == hp && prev_wh + whsize - 1 <= MAX_WOSIZE {
                    self.blocks.insert(prev, prev_wh + whsize);
                    Self::write_blue(prev, prev_wh + whsize);
                    return next;
                }
            }
        }

        Self::write_blue(hp, whsize);
        self.blocks.insert(hp, whsize);
        self.merge = Some(hp);
        next
    }

    fn set_merge_point(&mut self, hp: usize) {
        self.merge = Some(hp);
    }

    unsafe fn make_free_blocks(&mut self, start: usize, wsz: usize) {
        let mut hp = start;
        let mut remaining = wsz;
        while remaining > 0 {
            let whsize = remaining.min(MAX_WOSIZE + 1);
            Self::write_blue(hp, whsize);
            self.blocks.insert(hp, whsize);
            self.cur_wsz += whsize;
            hp += whsize * WORD_SIZE;
            remaining -= whsize;
        }
    }

    fn allocate(&mut self, wosize: usize) -> Option<usize> {
        let need = wosize + 1;
        let (hp, whsize) = self
            .blocks
            .iter()
            .find(|&(_, &whsize)| whsize >= need)
            .map(|(&hp, &whsize)| (hp, whsize))?;

        self.cur_wsz -= need;
        if whsize == need {
            self.blocks.remove(&hp);
            if self.merge == Some(hp) {
                self.merge = None;
            }
            return Some(hp);
        }

        // Carve from the end so the remainder keeps its address.
        let remainder = whsize - need;
        self.blocks.insert(hp, remainder);
        unsafe { Self::write_blue(hp, remainder) };
        Some(hp + remainder * WORD_SIZE)
    }

    fn free_wsz(&self) -> usize {
        self.cur_wsz
    }
}
