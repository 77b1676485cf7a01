//! Stats Module - Collector Counters
//!
//! Counters maintained by the collector as it runs:
//! - Cycle counts and words promoted to the major heap
//! - Slice counts and the work each slice performed
//! - Worklist overflow and heap-order rescans
//!
//! Heap size figures are owned by the heap and passed in when a summary is
//! taken.

pub mod histogram;
pub mod timer;

pub use histogram::{Histogram, HistogramSnapshot};
pub use timer::GcTimer;

use serde::Serialize;
use std::time::Duration;

/// Counters of one collector
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Completed major cycles
    pub major_collections: u64,
    /// Words allocated in (or promoted to) the major heap
    pub major_words: u64,
    pub mark_slices: u64,
    pub sweep_slices: u64,
    /// Words of marking work performed
    pub words_marked: u64,
    /// Words of sweeping work performed
    pub words_swept: u64,
    /// Times the gray worklist dropped entries
    pub gray_overflows: u64,
    /// Heap-order scans started to recover dropped gray blocks
    pub heap_rescans: u64,
    /// Work per slice in words
    pub slice_work: Histogram,
    /// Slice duration in microseconds
    pub slice_pause: Histogram,
}

impl GcStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one slice
    pub fn record_slice(&mut self, marking: bool, work_done: u64, duration: Duration) {
        if marking {
            self.mark_slices += 1;
            self.words_marked += work_done;
        } else {
            self.sweep_slices += 1;
            self.words_swept += work_done;
        }
        self.slice_work.record(work_done);
        self.slice_pause.record(duration.as_micros() as u64);
    }

    pub fn summary(&self, heap: HeapFigures) -> GcSummary {
        GcSummary {
            major_collections: self.major_collections,
            major_words: self.major_words,
            heap_wsz: heap.heap_wsz,
            top_heap_wsz: heap.top_heap_wsz,
            heap_chunks: heap.heap_chunks,
            free_wsz: heap.free_wsz,
            mark_slices: self.mark_slices,
            sweep_slices: self.sweep_slices,
            words_marked: self.words_marked,
            words_swept: self.words_swept,
            gray_overflows: self.gray_overflows,
            heap_rescans: self.heap_rescans,
            slice_work: self.slice_work.snapshot(),
            slice_pause_us: self.slice_pause.snapshot(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Heap-owned figures folded into a summary
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapFigures {
    pub heap_wsz: usize,
    pub top_heap_wsz: usize,
    pub heap_chunks: usize,
    pub free_wsz: usize,
}

/// Summary statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcSummary {
    pub major_collections: u64,
    pub major_words: u64,
    pub heap_wsz: usize,
    pub top_heap_wsz: usize,
    pub heap_chunks: usize,
    pub free_wsz: usize,
    pub mark_slices: u64,
    pub sweep_slices: u64,
    pub words_marked: u64,
    pub words_swept: u64,
    pub gray_overflows: u64,
    pub heap_rescans: u64,
    pub slice_work: HistogramSnapshot,
    pub slice_pause_us: HistogramSnapshot,
}
