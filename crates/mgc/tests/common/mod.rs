//! Test Utilities for the MGC test suite
//!
//! The fixture owns a collector with a small heap and helps build object
//! graphs. Liveness is checked against an independent reachability walk:
//! after a completed cycle the non-free blocks of the heap must be exactly
//! the blocks reachable from the roots.

#![allow(dead_code)]

use mgc::{GarbageCollector, GcConfig, Phase, SliceReport, SliceRequest, Value};
use std::collections::HashSet;

/// Heap size for most tests, in words
pub const SMALL_HEAP_WSZ: usize = 4096;

/// Upper bound on slices before a test declares the collector stuck
pub const MAX_SLICES: usize = 100_000;

/// Test fixture for collector operations
pub struct GcFixture {
    pub gc: GarbageCollector,
    /// Values registered as global roots through the fixture
    pub roots: Vec<Value>,
}

impl GcFixture {
    /// Collector with a single chunk of `SMALL_HEAP_WSZ` words
    pub fn new() -> Self {
        Self::with_heap_wsz(SMALL_HEAP_WSZ)
    }

    pub fn with_heap_wsz(wsz: usize) -> Self {
        Self::with_config(small_config(wsz))
    }

    pub fn with_config(config: GcConfig) -> Self {
        let gc = GarbageCollector::new(config)
            .expect("collector initialisation should succeed with a valid config");
        Self {
            gc,
            roots: Vec::new(),
        }
    }

    /// Allocate a scannable block of `wosize` fields
    pub fn alloc(&mut self, wosize: usize) -> Value {
        self.gc
            .alloc_shr(wosize, 0)
            .unwrap_or_else(|e| panic!("allocation of {} words failed: {}", wosize, e))
    }

    /// Allocate a block and make it a global root
    pub fn alloc_root(&mut self, wosize: usize) -> Value {
        let v = self.alloc(wosize);
        self.root(v);
        v
    }

    pub fn root(&mut self, v: Value) {
        self.gc.register_root(v);
        self.roots.push(v);
    }

    pub fn unroot(&mut self, v: Value) {
        assert!(self.gc.unregister_root(v), "{:?} was not a root", v);
        if let Some(i) = self.roots.iter().position(|&r| r == v) {
            self.roots.swap_remove(i);
        }
    }

    /// Store through the write barrier
    pub fn set(&mut self, obj: Value, field: usize, v: Value) {
        self.gc
            .modify(obj, field, v)
            .unwrap_or_else(|e| panic!("modify failed: {}", e));
    }

    /// Build a singly linked list of `len` two-field cells; returns the head
    pub fn alloc_list(&mut self, len: usize) -> Value {
        let mut head = Value::of_int(0);
        for i in 0..len {
            let cell = self.alloc(2);
            self.set(cell, 0, Value::of_int(i as isize));
            self.set(cell, 1, head);
            head = cell;
        }
        head
    }

    /// Build a complete binary tree of the given depth
    pub fn alloc_tree(&mut self, depth: usize) -> Value {
        let node = self.alloc(3);
        self.set(node, 0, Value::of_int(depth as isize));
        if depth > 0 {
            let left = self.alloc_tree(depth - 1);
            let right = self.alloc_tree(depth - 1);
            self.set(node, 1, left);
            self.set(node, 2, right);
        }
        node
    }

    /// Heap blocks reachable from `roots`, following scannable fields
    pub fn reachable_from(&self, roots: &[Value]) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut stack: Vec<Value> = roots.to_vec();
        while let Some(v) = stack.pop() {
            if !self.gc.heap().is_in_heap(v) || !seen.insert(v.raw()) {
                continue;
            }
            let hd = unsafe { v.header() };
            if hd.is_scannable() {
                for i in 0..hd.wosize() {
                    stack.push(unsafe { v.field(i) });
                }
            }
        }
        seen
    }

    pub fn reachable(&self) -> HashSet<usize> {
        self.reachable_from(&self.roots)
    }

    /// Values of every non-free block in the heap
    pub fn allocated_blocks(&self) -> HashSet<usize> {
        self.gc
            .heap()
            .blocks()
            .filter(|(_, hd)| !hd.is_blue())
            .map(|(hp, _)| Value::from_hp(hp).raw())
            .collect()
    }

    /// Free words according to the free list
    pub fn free_wsz(&self) -> usize {
        mgc::heap::FreeList::free_wsz(self.gc.heap().free_list())
    }

    /// Drive slices with `request` until the current cycle ends
    pub fn run_cycle_with(&mut self, request: SliceRequest) -> Vec<SliceReport> {
        let mut reports = Vec::new();
        if self.gc.phase() == Phase::Idle {
            reports.push(self.gc.major_slice(request));
        }
        while self.gc.phase() != Phase::Idle {
            reports.push(self.gc.major_slice(request));
            assert!(reports.len() < MAX_SLICES, "cycle did not finish");
        }
        reports
    }

    /// Drive a cycle in small manual slices
    pub fn run_cycle(&mut self) -> Vec<SliceReport> {
        self.run_cycle_with(SliceRequest::Manual(64))
    }

    /// Assert that the heap holds exactly the reachable blocks
    pub fn assert_only_reachable_survive(&self) {
        assert_eq!(self.gc.phase(), Phase::Idle);
        let reachable = self.reachable();
        let allocated = self.allocated_blocks();
        let leaked: Vec<_> = allocated.difference(&reachable).collect();
        let lost: Vec<_> = reachable.difference(&allocated).collect();
        assert!(lost.is_empty(), "reachable blocks were freed: {:x?}", lost);
        assert!(leaked.is_empty(), "unreachable blocks survived: {:x?}", leaked);
    }

    pub fn check(&self) -> mgc::HeapCheck {
        self.gc
            .check_heap()
            .unwrap_or_else(|e| panic!("heap check failed: {}", e))
    }
}

impl Default for GcFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration with one chunk of exactly `wsz` words
pub fn small_config(wsz: usize) -> GcConfig {
    GcConfig {
        initial_heap_wsz: wsz,
        heap_chunk_min_wsz: wsz,
        major_heap_increment: 100,
        ..Default::default()
    }
}

/// Assert two floats agree to a relative tolerance
pub fn assert_close(actual: f64, expected: f64, what: &str) {
    let scale = expected.abs().max(1e-12);
    assert!(
        ((actual - expected) / scale).abs() < 1e-9,
        "{}: expected {}, got {}",
        what,
        expected,
        actual
    );
}
