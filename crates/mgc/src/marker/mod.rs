//! Marker Module - Incremental Tri-Color Marking
//!
//! Marking is performed in slices. Each slice receives a budget in words
//! and stops when it is spent, possibly in the middle of a block: the
//! partially scanned block and the next field index come back as a
//! [`MarkCursor`] that the caller hands to the next slice.
//!
//! Tri-color invariant:
//! - White: not yet reached (garbage if still white at the end)
//! - Gray: reached, fields not yet scanned; on the worklist or found by a
//!   heap-order scan
//! - Black: reached and scanned
//!
//! Subphases of one mark phase:
//! ```text
//! Roots ──► Main ──► Weak1 ──► Weak2 ──► Final
//!  │         │         │         │         └─ hand over to the sweeper
//!  │         │         │         └─ unlink dead weak arrays
//!  │         │         └─ clear dead weak slots, then schedule finalisers
//!  │         └─ worklist drained
//!  └─ incremental roots darkened a slice at a time
//! ```
//!
//! Whatever the subphase, gray blocks are always drained first: a subphase
//! step only runs when the worklist is empty and the heap is pure.

pub mod gray;
pub mod roots;

pub use gray::{GrayResize, GrayVals};
pub use roots::{GlobalRoots, RootChain, RootId, RootSet};

use crate::gc::Subphase;
use crate::heap::{ChunkId, MajorHeap, PageTable, RefTable};
use crate::object::{tag, Color, Value, WeakCursor, WeakStats};
use crate::runtime::Finaliser;

/// Resumption point inside a partially scanned block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkCursor {
    /// The gray block being scanned
    pub value: Value,
    /// Next field to scan
    pub index: usize,
}

/// Everything a mark slice reads or updates outside the marker itself
pub struct MarkContext<'a> {
    pub heap: &'a MajorHeap,
    pub roots: &'a mut dyn RootSet,
    pub finaliser: &'a mut Finaliser,
    /// Head of the weak-array list
    pub weak_head: &'a mut Value,
    pub ref_table: &'a mut RefTable,
    pub weak_ref_table: &'a mut RefTable,
}

/// Result of one mark slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkOutcome {
    /// Where the next slice resumes, if a block was left half scanned
    pub cursor: Option<MarkCursor>,
    /// Work performed
    pub work_done: isize,
    /// Marking reached Final in this slice
    pub finished: bool,
    /// Budget left unused because marking finished
    pub work_left: isize,
}

#[derive(Debug, Clone, Copy)]
struct HeapScan {
    chunk: ChunkId,
    hp: usize,
}

/// The mark engine
#[derive(Debug)]
pub struct Marker {
    gray: GrayVals,
    subphase: Subphase,
    scan: Option<HeapScan>,
    weak_cursor: WeakCursor,
    weak_stats: WeakStats,
    heap_rescans: u64,
    transitions: Vec<(Subphase, Subphase)>,
}

/// Resolve a forward block
///
/// Returns the forwarded value and whether a field holding `child` may be
/// rewritten to it. Forwarding to something outside the value area, or to
/// another forward, lazy or float block, must stay indirect.
///
/// # Safety
///
/// `child` must be a heap block tagged `FORWARD`.
pub unsafe fn resolve_forward(page_table: &PageTable, child: Value) -> (Value, bool) {
    let f = child.field(0);
    if f.is_block()
        && (!page_table.is_in_value_area(f)
            || matches!(f.header().tag(), tag::FORWARD | tag::LAZY | tag::DOUBLE))
    {
        (f, false)
    } else {
        (f, true)
    }
}

/// Color a white heap block gray (or black if it has nothing to scan)
///
/// Non-heap values and immediates are ignored. Infix pointers darken their
/// enclosing block.
pub fn darken(gray: &mut GrayVals, heap: &MajorHeap, v: Value) {
    if !heap.is_in_heap(v) {
        return;
    }
    // Heap membership comes from the page table, so the header is mapped.
    unsafe {
        let mut v = v;
        let mut hd = v.header();
        if hd.tag() == tag::INFIX {
            v = v.sub_bytes(hd.infix_offset());
            hd = v.header();
        }
        debug_assert!(!hd.is_blue(), "darkening free block {:?}", v);
        if hd.is_white() {
            if hd.is_scannable() && hd.wosize() > 0 {
                v.set_header(hd.with_color(Color::Gray));
                gray.push(v, heap.heap_wsz());
            } else {
                v.set_header(hd.with_color(Color::Black));
            }
        }
    }
}

impl Marker {
    pub fn new(gray: GrayVals) -> Self {
        Self {
            gray,
            subphase: Subphase::Roots,
            scan: None,
            weak_cursor: WeakCursor::Head,
            weak_stats: WeakStats::default(),
            heap_rescans: 0,
            transitions: Vec::new(),
        }
    }

    /// Prepare for a new cycle; roots are darkened by the caller next
    pub fn begin_cycle(&mut self) {
        debug_assert!(self.gray.is_empty());
        self.subphase = Subphase::Roots;
        self.scan = None;
        self.weak_cursor = WeakCursor::Head;
        self.weak_stats = WeakStats::default();
    }

    pub fn darken(&mut self, heap: &MajorHeap, v: Value) {
        darken(&mut self.gray, heap, v);
    }

    pub fn subphase(&self) -> Subphase {
        self.subphase
    }

    pub fn gray(&self) -> &GrayVals {
        &self.gray
    }

    pub fn weak_stats(&self) -> WeakStats {
        self.weak_stats
    }

    pub fn heap_rescans(&self) -> u64 {
        self.heap_rescans
    }

    /// Subphase changes since the last call, oldest first
    pub fn take_transitions(&mut self) -> Vec<(Subphase, Subphase)> {
        std::mem::take(&mut self.transitions)
    }

    fn set_subphase(&mut self, next: Subphase) {
        self.transitions.push((self.subphase, next));
        self.subphase = next;
    }

    /// Perform up to `work` words of marking
    pub fn mark_slice(
        &mut self,
        mut work: isize,
        cursor: Option<MarkCursor>,
        ctx: MarkContext<'_>,
    ) -> MarkOutcome {
        let heap = ctx.heap;
        let page_table = heap.page_table();
        let heap_wsz = heap.heap_wsz();
        let budget = work;

        log::trace!("Marking {} words, subphase {:?}", work, self.subphase);

        let (mut v, mut start) = match cursor {
            Some(c) => (c.value, c.index),
            None => (Value::NULL, 0),
        };

        while work > 0 {
            if v == Value::NULL {
                if let Some(next) = self.gray.pop() {
                    debug_assert_eq!(start, 0);
                    v = next;
                }
            }

            if v != Value::NULL {
                // Gray values always come from the heap.
                unsafe {
                    let hd = v.header();
                    debug_assert!(hd.is_gray(), "scanning non-gray block {:?}", v);
                    let size = hd.wosize();
                    if hd.is_scannable() {
                        let first = start.min(size);
                        let end = first.saturating_add(work as usize).min(size);
                        for i in first..end {
                            self.mark_field(page_table, heap_wsz, ctx.ref_table, v, i);
                        }
                        if end < size {
                            work = 0;
                            start = end;
                        } else {
                            v.set_header(hd.with_color(Color::Black));
                            work -= (end - first + 1) as isize;
                            start = 0;
                            v = Value::NULL;
                        }
                    } else {
                        debug_assert_eq!(start, 0);
                        v.set_header(hd.with_color(Color::Black));
                        work -= hd.whsize() as isize;
                        v = Value::NULL;
                    }
                }
            } else if let Some(scan) = self.scan {
                self.scan = self.step_heap_scan(heap, scan, &mut v);
            } else if !self.gray.heap_is_pure() {
                self.gray.set_heap_is_pure(true);
                self.heap_rescans += 1;
                self.scan = heap.chunks().first().map(|chunk| HeapScan {
                    chunk: 0,
                    hp: chunk.start(),
                });
            } else {
                match self.subphase {
                    Subphase::Roots => {
                        let gray = &mut self.gray;
                        let done = ctx
                            .roots
                            .darken_slice(work, &mut |root| darken(gray, heap, root));
                        if done < work {
                            self.set_subphase(Subphase::Main);
                        }
                        work -= done;
                    },
                    Subphase::Main => {
                        self.set_subphase(Subphase::Weak1);
                        self.weak_cursor = WeakCursor::Head;
                    },
                    Subphase::Weak1 => {
                        let cur = unsafe { self.weak_cursor.load(*ctx.weak_head) };
                        if cur != Value::NULL {
                            unsafe {
                                let hd = cur.header();
                                for i in 1..hd.wosize() {
                                    self.clean_weak_slot(page_table, ctx.weak_ref_table, cur, i);
                                }
                                work -= hd.whsize() as isize;
                            }
                            self.weak_cursor = WeakCursor::Link(cur);
                        } else {
                            let gray = &mut self.gray;
                            unsafe {
                                ctx.finaliser.update(&mut |x| darken(gray, heap, x));
                            }
                            if let Some(next) = self.gray.pop() {
                                v = next;
                                start = 0;
                            }
                            self.set_subphase(Subphase::Weak2);
                            self.weak_cursor = WeakCursor::Head;
                        }
                    },
                    Subphase::Weak2 => {
                        let cur = unsafe { self.weak_cursor.load(*ctx.weak_head) };
                        if cur != Value::NULL {
                            unsafe {
                                if cur.header().is_white() {
                                    self.weak_cursor.store(ctx.weak_head, cur.field(0));
                                    self.weak_stats.arrays_unlinked += 1;
                                } else {
                                    self.weak_cursor = WeakCursor::Link(cur);
                                }
                            }
                            work -= 1;
                        } else {
                            self.set_subphase(Subphase::Final);
                        }
                    },
                    Subphase::Final => {
                        return MarkOutcome {
                            cursor: None,
                            work_done: budget - work,
                            finished: true,
                            work_left: work,
                        };
                    },
                }
            }
        }

        MarkOutcome {
            cursor: (v != Value::NULL).then_some(MarkCursor { value: v, index: start }),
            work_done: budget - work,
            finished: false,
            work_left: 0,
        }
    }

    /// Mark the referent of field `i` of the gray block `v`
    ///
    /// # Safety
    ///
    /// `v` must be a scannable heap block with more than `i` fields.
    unsafe fn mark_field(
        &mut self,
        page_table: &PageTable,
        heap_wsz: usize,
        ref_table: &mut RefTable,
        v: Value,
        i: usize,
    ) {
        let mut child = v.field(i);
        if !page_table.is_in_heap(child) {
            return;
        }

        let mut chd = child.header();
        if chd.tag() == tag::FORWARD {
            let (f, rewrite) = resolve_forward(page_table, child);
            if rewrite {
                v.set_field(i, f);
                if page_table.is_young(f) {
                    ref_table.add(v.field_addr(i));
                }
            }
        } else if chd.tag() == tag::INFIX {
            child = child.sub_bytes(chd.infix_offset());
            chd = child.header();
        }

        if chd.is_white() {
            if chd.wosize() == 0 {
                child.set_header(chd.with_color(Color::Black));
            } else {
                child.set_header(chd.with_color(Color::Gray));
                self.gray.push(child, heap_wsz);
            }
        }
    }

    /// Clear slot `i` of the weak array `array` if its referent is dead
    ///
    /// Forward blocks are short-circuited first, repeatedly.
    ///
    /// # Safety
    ///
    /// `array` must be a live weak array with more than `i` fields.
    unsafe fn clean_weak_slot(
        &mut self,
        page_table: &PageTable,
        weak_ref_table: &mut RefTable,
        array: Value,
        i: usize,
    ) {
        let mut field = array.field(i);
        loop {
            if field == Value::NULL || !page_table.is_in_heap_or_young(field) {
                return;
            }
            if field.header().tag() == tag::FORWARD {
                let (f, rewrite) = resolve_forward(page_table, field);
                if f.is_block() && rewrite {
                    array.set_field(i, f);
                    field = f;
                    if page_table.is_young(f) {
                        weak_ref_table.add(array.field_addr(i));
                    }
                    continue;
                }
            }
            if field.header().is_white() && !page_table.is_young(field) {
                array.set_field(i, Value::NULL);
                self.weak_stats.slots_cleared += 1;
            }
            return;
        }
    }

    /// Advance the heap-order scan by one block
    ///
    /// A gray block found on the way becomes the current value.
    fn step_heap_scan(&mut self, heap: &MajorHeap, scan: HeapScan, v: &mut Value) -> Option<HeapScan> {
        let chunk = heap.chunk(scan.chunk)?;
        if scan.hp >= chunk.limit() {
            let next = scan.chunk + 1;
            return heap.chunk(next).map(|chunk| HeapScan {
                chunk: next,
                hp: chunk.start(),
            });
        }

        let block = Value::from_hp(scan.hp);
        // Chunks are tiled with blocks, so `hp` is always a header.
        let hd = unsafe { block.header() };
        if hd.is_gray() {
            debug_assert!(self.gray.is_empty());
            *v = block;
        }
        Some(HeapScan {
            chunk: scan.chunk,
            hp: scan.hp + hd.bhsize(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::memory::write_word;
    use crate::object::Header;

    fn heap() -> MajorHeap {
        MajorHeap::new(&GcConfig {
            initial_heap_wsz: 4096,
            heap_chunk_min_wsz: 4096,
            ..Default::default()
        })
        .unwrap()
    }

    fn alloc(heap: &mut MajorHeap, wosize: usize, tag: u8) -> Value {
        let hp = heap.allocate(wosize).unwrap();
        let v = Value::from_hp(hp);
        unsafe {
            write_word(hp, Header::make(wosize, tag, Color::White).raw());
            for i in 0..wosize {
                v.set_field(i, Value::UNIT);
            }
        }
        v
    }

    struct Fixture {
        roots: GlobalRoots,
        finaliser: Finaliser,
        weak_head: Value,
        ref_table: RefTable,
        weak_ref_table: RefTable,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                roots: GlobalRoots::new(),
                finaliser: Finaliser::new(),
                weak_head: Value::NULL,
                ref_table: RefTable::new(),
                weak_ref_table: RefTable::new(),
            }
        }

        fn ctx<'a>(&'a mut self, heap: &'a MajorHeap) -> MarkContext<'a> {
            MarkContext {
                heap,
                roots: &mut self.roots,
                finaliser: &mut self.finaliser,
                weak_head: &mut self.weak_head,
                ref_table: &mut self.ref_table,
                weak_ref_table: &mut self.weak_ref_table,
            }
        }
    }

    fn marker() -> Marker {
        Marker::new(GrayVals::new(16, 32).unwrap())
    }

    fn run_to_final(marker: &mut Marker, fx: &mut Fixture, heap: &MajorHeap, budget: isize) -> usize {
        let mut cursor = None;
        let mut slices = 0;
        loop {
            slices += 1;
            let outcome = marker.mark_slice(budget, cursor, fx.ctx(heap));
            if outcome.finished {
                return slices;
            }
            cursor = outcome.cursor;
            assert!(slices < 100_000);
        }
    }

    #[test]
    fn test_marks_reachable_only() {
        let mut heap = heap();
        let a = alloc(&mut heap, 2, 0);
        let b = alloc(&mut heap, 1, 0);
        let dead = alloc(&mut heap, 3, 0);
        unsafe { a.set_field(1, b) };

        let mut fx = Fixture::new();
        fx.roots.register(a);
        let mut marker = marker();
        marker.begin_cycle();
        run_to_final(&mut marker, &mut fx, &heap, 1000);

        unsafe {
            assert!(a.header().is_black());
            assert!(b.header().is_black());
            assert!(dead.header().is_white());
        }
        assert_eq!(marker.subphase(), Subphase::Final);
        let subphases: Vec<_> = marker.take_transitions().into_iter().map(|(_, to)| to).collect();
        assert_eq!(
            subphases,
            vec![Subphase::Main, Subphase::Weak1, Subphase::Weak2, Subphase::Final]
        );
    }

    #[test]
    fn test_resumes_inside_large_block() {
        let mut heap = heap();
        let big = alloc(&mut heap, 100, 0);
        let leaf = alloc(&mut heap, 1, 0);
        unsafe { big.set_field(99, leaf) };

        let mut fx = Fixture::new();
        let mut marker = marker();
        marker.begin_cycle();
        marker.darken(&heap, big);

        let outcome = marker.mark_slice(30, None, fx.ctx(&heap));
        assert_eq!(outcome.cursor, Some(MarkCursor { value: big, index: 30 }));
        unsafe { assert!(big.header().is_gray()) };

        let outcome = marker.mark_slice(30, outcome.cursor, fx.ctx(&heap));
        assert_eq!(outcome.cursor, Some(MarkCursor { value: big, index: 60 }));

        let outcome = marker.mark_slice(50, outcome.cursor, fx.ctx(&heap));
        assert_eq!(outcome.cursor, None);
        unsafe {
            assert!(big.header().is_black());
            assert!(leaf.header().is_black());
        }
    }

    #[test]
    fn test_infix_darkens_enclosing_block() {
        let mut heap = heap();
        let closure = alloc(&mut heap, 4, tag::CLOSURE);
        let holder = alloc(&mut heap, 1, 0);
        let infix = Value::from_raw(closure.field_addr(2));
        unsafe {
            write_word(infix.hp(), Header::make(2, tag::INFIX, Color::White).raw());
            holder.set_field(0, infix);
        }

        let mut fx = Fixture::new();
        fx.roots.register(holder);
        let mut marker = marker();
        marker.begin_cycle();
        run_to_final(&mut marker, &mut fx, &heap, 1000);
        unsafe { assert!(closure.header().is_black()) };
    }

    #[test]
    fn test_forward_short_circuit() {
        let mut heap = heap();
        let target = alloc(&mut heap, 1, 0);
        let fwd = alloc(&mut heap, 1, tag::FORWARD);
        let holder = alloc(&mut heap, 1, 0);
        let double = alloc(&mut heap, 1, tag::DOUBLE);
        let fwd_to_double = alloc(&mut heap, 1, tag::FORWARD);
        let holder2 = alloc(&mut heap, 1, 0);
        unsafe {
            fwd.set_field(0, target);
            holder.set_field(0, fwd);
            fwd_to_double.set_field(0, double);
            holder2.set_field(0, fwd_to_double);
        }

        let mut fx = Fixture::new();
        fx.roots.register(holder);
        fx.roots.register(holder2);
        let mut marker = marker();
        marker.begin_cycle();
        run_to_final(&mut marker, &mut fx, &heap, 1000);
        unsafe {
            assert_eq!(holder.field(0), target);
            assert!(target.header().is_black());
            assert_eq!(holder2.field(0), fwd_to_double);
            assert!(double.header().is_black());
        }
    }

    #[test]
    fn test_overflow_recovered_by_heap_scan() {
        let mut heap = heap();
        // capacity 4 is never below 4096 / 2048
        let mut marker = Marker::new(GrayVals::new(4, 2048).unwrap());
        let root = alloc(&mut heap, 20, 0);
        let children: Vec<_> = (0..20).map(|_| alloc(&mut heap, 1, 0)).collect();
        for (i, &child) in children.iter().enumerate() {
            unsafe { root.set_field(i, child) };
        }

        let mut fx = Fixture::new();
        fx.roots.register(root);
        marker.begin_cycle();
        run_to_final(&mut marker, &mut fx, &heap, 10);

        assert!(marker.gray().overflows() > 0);
        assert!(marker.heap_rescans() > 0);
        for child in children {
            unsafe { assert!(child.header().is_black()) };
        }
    }

    #[test]
    fn test_weak_slots_and_arrays() {
        let mut heap = heap();
        let live = alloc(&mut heap, 1, 0);
        let dead = alloc(&mut heap, 1, 0);
        let weak = alloc(&mut heap, 3, tag::ABSTRACT);
        let dead_weak = alloc(&mut heap, 2, tag::ABSTRACT);
        unsafe {
            weak.set_field(0, dead_weak);
            weak.set_field(1, live);
            weak.set_field(2, dead);
            dead_weak.set_field(0, Value::NULL);
            dead_weak.set_field(1, live);
        }

        let mut fx = Fixture::new();
        fx.weak_head = weak;
        fx.roots.register(live);
        fx.roots.register(weak);
        let mut marker = marker();
        marker.begin_cycle();
        run_to_final(&mut marker, &mut fx, &heap, 1000);

        unsafe {
            assert_eq!(weak.field(1), live);
            assert_eq!(weak.field(2), Value::NULL);
            assert_eq!(weak.field(0), Value::NULL);
        }
        assert_eq!(fx.weak_head, weak);
        assert_eq!(marker.weak_stats().arrays_unlinked, 1);
        assert_eq!(marker.weak_stats().slots_cleared, 1);
    }

    #[test]
    fn test_finaliser_resurrects_for_one_cycle() {
        let mut heap = heap();
        let doomed = alloc(&mut heap, 2, 0);
        let inner = alloc(&mut heap, 1, 0);
        unsafe { doomed.set_field(0, inner) };

        let mut fx = Fixture::new();
        fx.finaliser.register(doomed, |_| {});
        let mut marker = marker();
        marker.begin_cycle();
        run_to_final(&mut marker, &mut fx, &heap, 1000);

        assert_eq!(fx.finaliser.pending_len(), 1);
        unsafe {
            assert!(doomed.header().is_black());
            assert!(inner.header().is_black());
        }
    }
}
