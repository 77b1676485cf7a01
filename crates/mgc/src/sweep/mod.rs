//! Sweep Module - returning white blocks to the free list
//!
//! The sweeper walks the chunks in list order from a saved position. Per
//! block:
//! - White: run the custom finalizer if any, then merge into the free list
//! - Blue: already free, becomes the merge point
//! - Black: repainted white for the next cycle
//!
//! Gray blocks cannot exist here: marking ends with an empty worklist and a
//! pure heap.

use crate::heap::{ChunkId, FreeList, MajorHeap, PageTable};
use crate::memory::read_word;
use crate::object::{tag, Color, CustomOpsTable, Header, Value};

/// Everything a sweep slice reads or updates outside the sweeper
pub struct SweepContext<'a> {
    pub heap: &'a mut MajorHeap,
    pub custom_ops: &'a CustomOpsTable,
    /// Called with the header of every reclaimed block
    pub on_reclaim: Option<&'a mut dyn FnMut(Header)>,
}

/// Result of one sweep slice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub work_done: isize,
    /// The last chunk was finished in this slice
    pub finished: bool,
    /// Budget left unused because sweeping finished
    pub work_left: isize,
    pub blocks_freed: usize,
    pub words_freed: usize,
}

/// Sweep position
#[derive(Debug, Clone, Copy, Default)]
pub struct Sweeper {
    chunk: ChunkId,
    hp: usize,
    limit: usize,
}

impl Sweeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind to the first block of the first chunk
    pub fn start(&mut self, heap: &MajorHeap) {
        self.chunk = 0;
        match heap.chunk(0) {
            Some(chunk) => {
                self.hp = chunk.start();
                self.limit = chunk.limit();
            },
            None => {
                self.hp = 0;
                self.limit = 0;
            },
        }
    }

    /// Header address of the next block to sweep
    pub fn sweep_hp(&self) -> usize {
        self.hp
    }

    pub fn chunk(&self) -> ChunkId {
        self.chunk
    }

    /// Whether the block at `hp` has been swept in the current sweep
    ///
    /// Chunks before the current one are done; inside the current one,
    /// everything below the sweep pointer is.
    pub fn is_swept(&self, page_table: &PageTable, hp: usize) -> bool {
        match page_table.chunk_of(hp) {
            Some(chunk) if chunk < self.chunk => true,
            Some(chunk) if chunk == self.chunk => hp < self.hp,
            _ => false,
        }
    }

    /// Sweep up to `work` words
    pub fn sweep_slice(&mut self, mut work: isize, mut ctx: SweepContext<'_>) -> SweepOutcome {
        let budget = work;
        let mut outcome = SweepOutcome::default();

        log::trace!("Sweeping {} words", work);

        while work > 0 {
            if self.hp < self.limit {
                let hp = self.hp;
                // The sweep pointer always sits on a header inside a chunk.
                let hd = Header::from_raw(unsafe { read_word(hp) });
                work -= hd.whsize() as isize;
                self.hp += hd.bhsize();

                match hd.color() {
                    Color::White => {
                        let v = Value::from_hp(hp);
                        if hd.tag() == tag::CUSTOM && hd.wosize() > 0 {
                            let finalize = unsafe { ctx.custom_ops.ops_of(v) }
                                .and_then(|ops| ops.finalize);
                            if let Some(finalize) = finalize {
                                finalize(v);
                            }
                        }
                        if let Some(on_reclaim) = ctx.on_reclaim.as_mut() {
                            on_reclaim(hd);
                        }
                        outcome.blocks_freed += 1;
                        outcome.words_freed += hd.whsize();
                        self.hp = unsafe { ctx.heap.free_list_mut().merge_block(v) };
                    },
                    Color::Blue => {
                        ctx.heap.free_list_mut().set_merge_point(hp);
                    },
                    Color::Gray | Color::Black => {
                        debug_assert_eq!(hd.color(), Color::Black, "gray block at sweep time");
                        let v = Value::from_hp(hp);
                        unsafe { v.set_header(hd.with_color(Color::White)) };
                    },
                }
                debug_assert!(self.hp <= self.limit);
            } else {
                self.chunk += 1;
                match ctx.heap.chunk(self.chunk) {
                    Some(chunk) => {
                        self.hp = chunk.start();
                        self.limit = chunk.limit();
                    },
                    None => {
                        outcome.finished = true;
                        outcome.work_left = work;
                        break;
                    },
                }
            }
        }

        outcome.work_done = budget - work;
        outcome
    }
}
