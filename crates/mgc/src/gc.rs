//! GC Core Module - Major Cycle Management
//!
//! [`GarbageCollector`] owns one major heap and everything that collects it.
//! All collector state lives in this one object; nothing is global, so
//! several heaps can coexist in one process.
//!
//! A cycle is driven by [`GarbageCollector::major_slice`]:
//!
//! ```text
//!   Idle ──start──► Mark(Roots ► Main ► Weak1 ► Weak2 ► Final) ──► Sweep ──► Idle
//!          │                  │                                   │
//!          └─ roots darkened  └─ mark_slice(budget)               └─ sweep_slice(budget)
//! ```
//!
//! Each slice converts the allocation since the previous slice into a
//! proportion of a cycle, smooths it through the [`Pacer`], and turns the
//! result into a word budget for the mark or sweep engine.

use crate::config::{GcConfig, ProfinfoSource};
use crate::error::{MgcError, Result};
use crate::heap::{FreeList, MajorHeap, PageClass, RefTable};
use crate::logging::{GcEvent, GcLogger};
use crate::marker::{GlobalRoots, GrayVals, MarkContext, MarkCursor, Marker, RootChain, RootId, RootSet};
use crate::memory::{fill_words, read_word, wsize_bsize, WORD_SIZE};
use crate::object::{tag, Color, CustomOps, CustomOpsTable, Header, Value, MAX_WOSIZE, NO_PROFINFO};
use crate::pacer::{manual_proportion, raw_proportion, Pacer, PacingInputs, SliceReport, SliceRequest};
use crate::profiling::{report, AllocProfiler, AllocSite, HeapCensus, HeapGraphCounts};
use crate::runtime::{FinaliseFn, Finaliser};
use crate::stats::{GcStats, GcSummary, GcTimer, HeapFigures};
use crate::sweep::{SweepContext, Sweeper};
use indexmap::IndexMap;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Collector phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// No cycle in progress
    #[default]
    Idle,
    /// Tracing from the roots
    Mark,
    /// Reclaiming white blocks
    Sweep,
}

/// Step of the mark phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Subphase {
    /// Incremental roots are being darkened
    Roots,
    /// Draining the gray worklist
    Main,
    /// Clearing dead weak slots
    Weak1,
    /// Unlinking dead weak arrays
    Weak2,
    /// Marking is complete
    Final,
}

/// Mutable state of the cycle in progress
#[derive(Debug, Clone, Default)]
pub struct CollectorState {
    pub phase: Phase,
    /// Cycles started so far
    pub cycle: u64,
    /// Block left half scanned by the last mark slice
    pub mark_cursor: Option<MarkCursor>,
    /// Words allocated in the major heap since the last slice
    pub allocated_words: usize,
    /// Words of memory held outside the heap by heap blocks
    pub dependent_size: usize,
    /// Dependent words allocated since the last slice
    pub dependent_allocated: usize,
    /// Extra proportion of a cycle requested through `adjust_gc_speed`
    pub extra_heap_resources: f64,
    /// Free words when the phase last changed
    pub fl_wsz_at_phase_change: usize,
    /// A slice should run at the next opportunity
    pub slice_requested: bool,
}

/// Callback run at a fixed point of the cycle
pub type GcHook = Box<dyn FnMut() + Send>;

#[derive(Default)]
struct Hooks {
    mark_end: Option<GcHook>,
    slice_begin: Option<GcHook>,
    slice_end: Option<GcHook>,
    cycle_end: Option<GcHook>,
}

fn run_hook(hook: &mut Option<GcHook>) {
    if let Some(hook) = hook.as_mut() {
        hook();
    }
}

/// Block counts found by [`GarbageCollector::check_heap`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapCheck {
    pub blocks: usize,
    pub blue_wsz: usize,
    pub white_wsz: usize,
    pub gray_wsz: usize,
    pub black_wsz: usize,
}

/// GarbageCollector - incremental mark and sweep of one major heap
///
/// Coordinates all GC components:
/// - MajorHeap for chunks, the page table and the free list
/// - Marker and Sweeper for the two phases
/// - Pacer for slice sizing
/// - AllocProfiler for allocation sites and lifetimes
/// - GcLogger and GcStats for observability
///
/// ## Thread Safety
///
/// The collector belongs to the single mutator thread. Every operation
/// takes `&mut self`; callers sharing a collector wrap it in a lock.
pub struct GarbageCollector {
    config: GcConfig,
    heap: MajorHeap,
    marker: Marker,
    sweeper: Sweeper,
    pacer: Pacer,
    state: CollectorState,

    global_roots: GlobalRoots,
    root_sets: Vec<Box<dyn RootSet + Send>>,
    finaliser: Finaliser,
    custom_ops: CustomOpsTable,
    /// Head of the weak-array list
    weak_head: Value,
    /// Heap fields pointing into the young area
    ref_table: RefTable,
    /// Weak slots pointing into the young area
    weak_ref_table: RefTable,

    profiler: AllocProfiler,
    logger: GcLogger,
    stats: GcStats,
    hooks: Hooks,

    seen_gray_growths: u64,
    seen_gray_overflows: u64,
}

impl GarbageCollector {
    /// Create a collector and map its initial heap
    ///
    /// # Examples
    /// ```rust
    /// use mgc::{GarbageCollector, GcConfig};
    ///
    /// let gc = GarbageCollector::new(GcConfig::default()).unwrap();
    /// assert_eq!(gc.phase(), mgc::Phase::Idle);
    /// ```
    pub fn new(config: GcConfig) -> Result<Self> {
        config.validate()?;

        let heap = MajorHeap::new(&config)?;
        let gray = GrayVals::new(config.gray_vals_initial, config.gray_vals_heap_ratio)?;
        let pacer = Pacer::new(config.major_window)?;
        let profiler = AllocProfiler::new(&config.profiling)?;
        let logger = GcLogger::new(config.logger.clone());

        let state = CollectorState {
            fl_wsz_at_phase_change: heap.free_list().free_wsz(),
            ..Default::default()
        };

        log::info!(
            "Major heap initialised: {} words, percent_free {}, window {}",
            heap.heap_wsz(),
            config.percent_free,
            config.major_window
        );

        Ok(Self {
            config,
            heap,
            marker: Marker::new(gray),
            sweeper: Sweeper::new(),
            pacer,
            state,
            global_roots: GlobalRoots::new(),
            root_sets: Vec::new(),
            finaliser: Finaliser::new(),
            custom_ops: CustomOpsTable::new(),
            weak_head: Value::NULL,
            ref_table: RefTable::new(),
            weak_ref_table: RefTable::new(),
            profiler,
            logger,
            stats: GcStats::new(),
            hooks: Hooks::default(),
            seen_gray_growths: 0,
            seen_gray_overflows: 0,
        })
    }

    /// Create a collector whose initial heap holds `bytes` bytes
    pub fn with_heap_bytes(bytes: usize) -> Result<Self> {
        Self::new(GcConfig {
            initial_heap_wsz: wsize_bsize(bytes).max(1),
            ..GcConfig::from_env()
        })
    }

    // ---------------------------------------------------------------------
    // Allocation
    // ---------------------------------------------------------------------

    /// Allocate a block of `wosize` fields in the major heap
    ///
    /// Scannable blocks are filled with `()`; others are zeroed.
    pub fn alloc_shr(&mut self, wosize: usize, tag: u8) -> Result<Value> {
        self.alloc_shr_at(wosize, tag, AllocSite::Unknown)
    }

    /// Allocate a block attributed to `site`
    pub fn alloc_shr_at(&mut self, wosize: usize, tag: u8, site: AllocSite) -> Result<Value> {
        if wosize == 0 || wosize > MAX_WOSIZE {
            return Err(MgcError::InvalidArgument(format!(
                "block size must be between 1 and {} words, got {}",
                MAX_WOSIZE, wosize
            )));
        }

        let hp = match self.heap.allocate(wosize) {
            Some(hp) => hp,
            None => {
                let added_wsz = self.heap.expand(wosize)?;
                self.logger.log(GcEvent::HeapGrown {
                    added_wsz,
                    heap_wsz: self.heap.heap_wsz(),
                });
                self.heap.allocate(wosize).ok_or(MgcError::OutOfMemory {
                    requested_words: wosize + 1,
                })?
            },
        };

        let color = match self.state.phase {
            Phase::Mark => Color::Black,
            Phase::Sweep if !self.sweeper.is_swept(self.heap.page_table(), hp) => Color::Black,
            _ => Color::White,
        };
        let whsize = wosize + 1;
        let profinfo = self
            .profiler
            .assign_profinfo(site, (whsize * WORD_SIZE) as u64);
        let header = Header::make_with_profinfo(wosize, tag, color, profinfo);

        let v = Value::from_hp(hp);
        let filler = if header.is_scannable() {
            Value::UNIT.raw()
        } else {
            0
        };
        // The free list handed out `whsize` words at `hp`.
        unsafe {
            v.set_header(header);
            fill_words(v.raw(), wosize, filler);
        }

        self.state.allocated_words += whsize;
        Ok(v)
    }

    /// Register a family of custom blocks; returns its id
    pub fn register_custom_ops(&mut self, ops: CustomOps) -> usize {
        self.custom_ops.register(ops)
    }

    /// Allocate a custom block with `payload_words` words after its ops id
    pub fn alloc_custom(&mut self, ops: usize, payload_words: usize) -> Result<Value> {
        if self.custom_ops.get(ops).is_none() {
            return Err(MgcError::InvalidArgument(format!(
                "no custom operations registered with id {}",
                ops
            )));
        }
        let v = self.alloc_shr(payload_words + 1, tag::CUSTOM)?;
        unsafe { v.set_field(0, Value::of_int(ops as isize)) };
        Ok(v)
    }

    // ---------------------------------------------------------------------
    // Barriers and roots
    // ---------------------------------------------------------------------

    fn checked_block(&self, v: Value, field: usize) -> Result<Header> {
        if !self.heap.page_table().is_in_value_area(v) {
            return Err(MgcError::InvalidArgument(format!(
                "{:?} is not a block in a known area",
                v
            )));
        }
        let hd = unsafe { v.header() };
        if field >= hd.wosize() {
            return Err(MgcError::InvalidArgument(format!(
                "field {} out of bounds for a block of {} words",
                field,
                hd.wosize()
            )));
        }
        Ok(hd)
    }

    /// Store `value` into field `field` of `obj` with the write barrier
    ///
    /// During Mark the overwritten value is darkened, so nothing reachable
    /// at the start of the cycle is lost. Pointers from outside the young
    /// area into it are recorded in the ref table.
    pub fn modify(&mut self, obj: Value, field: usize, value: Value) -> Result<()> {
        self.checked_block(obj, field)?;
        let page_table = self.heap.page_table();

        if page_table.is_young(obj) {
            unsafe { obj.set_field(field, value) };
            return Ok(());
        }

        let old = unsafe { obj.field(field) };
        unsafe { obj.set_field(field, value) };
        if old.is_block() && !page_table.is_young(old) && self.state.phase == Phase::Mark {
            self.marker.darken(&self.heap, old);
        }
        if page_table.is_young(value) {
            self.ref_table.add(obj.field_addr(field));
        }
        Ok(())
    }

    /// Grey `v` if marking is in progress
    pub fn darken(&mut self, v: Value) {
        if self.state.phase == Phase::Mark {
            self.marker.darken(&self.heap, v);
        }
    }

    /// Register a global root
    pub fn register_root(&mut self, v: Value) -> RootId {
        if self.state.phase == Phase::Mark {
            self.marker.darken(&self.heap, v);
        }
        self.global_roots.register(v)
    }

    /// Remove one registration of `v`
    pub fn unregister_root(&mut self, v: Value) -> bool {
        self.global_roots.unregister(v)
    }

    pub fn unregister_root_id(&mut self, id: RootId) -> bool {
        self.global_roots.unregister_id(id)
    }

    /// Add a root set scanned at every cycle after the global roots
    pub fn add_root_set(&mut self, roots: Box<dyn RootSet + Send>) {
        self.root_sets.push(roots);
    }

    fn incremental_roots_count(&self) -> usize {
        self.global_roots.incremental_roots_count()
            + self.finaliser.incremental_roots_count()
            + self
                .root_sets
                .iter()
                .map(|set| set.incremental_roots_count())
                .sum::<usize>()
    }

    /// Run `action` once `v` is found unreachable
    pub fn register_finaliser<F>(&mut self, v: Value, action: F) -> Result<()>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        if !self.heap.is_in_heap(v) {
            return Err(MgcError::InvalidArgument(format!(
                "finalised value {:?} is not in the major heap",
                v
            )));
        }
        self.finaliser.register(v, action);
        Ok(())
    }

    /// Hand over the finalisers scheduled by past cycles without running them
    ///
    /// For callers that must release a lock on the collector before the
    /// actions run. The values are no longer rooted once taken; they stay
    /// valid until the collector runs again.
    pub fn take_pending_finalisers(&mut self) -> Vec<(Value, FinaliseFn)> {
        self.finaliser.take_pending()
    }

    /// Run the finalisers scheduled by past cycles; returns how many ran
    pub fn run_pending_finalisers(&mut self) -> usize {
        let pending = self.take_pending_finalisers();
        let count = pending.len();
        for (v, action) in pending {
            action(v);
        }
        count
    }

    // ---------------------------------------------------------------------
    // Weak arrays
    // ---------------------------------------------------------------------

    /// Allocate a weak array of `len` empty slots and link it into the weak list
    pub fn alloc_weak(&mut self, len: usize) -> Result<Value> {
        let array = self.alloc_shr(len + 1, tag::ABSTRACT)?;
        unsafe { array.set_field(0, self.weak_head) };
        self.weak_head = array;
        Ok(array)
    }

    fn checked_weak(&self, array: Value, slot: usize) -> Result<()> {
        let hd = self.checked_block(array, slot + 1)?;
        if hd.tag() != tag::ABSTRACT || !self.heap.is_in_heap(array) {
            return Err(MgcError::InvalidArgument(format!(
                "{:?} is not a weak array",
                array
            )));
        }
        Ok(())
    }

    /// Read a weak slot
    ///
    /// During Mark the referent is darkened, so the mutator never holds a
    /// value the collector is about to clear.
    pub fn weak_get(&mut self, array: Value, slot: usize) -> Result<Option<Value>> {
        self.checked_weak(array, slot)?;
        let v = unsafe { array.field(slot + 1) };
        if v == Value::NULL {
            return Ok(None);
        }
        if self.state.phase == Phase::Mark && self.heap.is_in_heap(v) {
            self.marker.darken(&self.heap, v);
        }
        Ok(Some(v))
    }

    /// Write a weak slot; `None` empties it
    pub fn weak_set(&mut self, array: Value, slot: usize, v: Option<Value>) -> Result<()> {
        self.checked_weak(array, slot)?;
        let v = v.unwrap_or(Value::NULL);
        unsafe { array.set_field(slot + 1, v) };
        if self.heap.page_table().is_young(v) {
            self.weak_ref_table.add(array.field_addr(slot + 1));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Cycle driving
    // ---------------------------------------------------------------------

    fn set_phase(&mut self, to: Phase) {
        let from = self.state.phase;
        self.state.phase = to;
        self.state.fl_wsz_at_phase_change = self.heap.free_list().free_wsz();
        log::debug!("Cycle {}: phase {:?} -> {:?}", self.state.cycle, from, to);
        self.logger.log(GcEvent::PhaseChange {
            cycle: self.state.cycle,
            from,
            to,
        });
    }

    fn start_cycle(&mut self) {
        debug_assert_eq!(self.state.phase, Phase::Idle);
        self.state.cycle += 1;
        self.state.mark_cursor = None;
        self.marker.begin_cycle();

        log::info!(
            "Starting major cycle {} (heap {} words)",
            self.state.cycle,
            self.heap.heap_wsz()
        );
        self.logger.log(GcEvent::CycleStart {
            cycle: self.state.cycle,
            heap_wsz: self.heap.heap_wsz(),
        });

        let heap = &self.heap;
        let marker = &mut self.marker;
        let mut darken = |v: Value| marker.darken(heap, v);
        self.global_roots.start(&mut darken);
        for set in self.root_sets.iter_mut() {
            set.start(&mut darken);
        }
        self.finaliser.start(&mut darken);

        self.set_phase(Phase::Mark);
        self.note_gray_resizes();
    }

    /// Report worklist growth and overflow since the last check
    fn note_gray_resizes(&mut self) {
        let gray = self.marker.gray();
        let (growths, overflows, capacity) = (gray.growths(), gray.overflows(), gray.capacity());

        if growths > self.seen_gray_growths {
            self.seen_gray_growths = growths;
            self.logger.log(GcEvent::GrayStackGrown { capacity });
        }
        if overflows > self.seen_gray_overflows {
            log::warn!(
                "Gray worklist overflow at {} entries, heap rescan scheduled",
                capacity
            );
            self.stats.gray_overflows += overflows - self.seen_gray_overflows;
            self.seen_gray_overflows = overflows;
            self.logger.log(GcEvent::GrayStackOverflow {
                capacity,
                heap_wsz: self.heap.heap_wsz(),
            });
        }
        self.stats.heap_rescans = self.marker.heap_rescans();
    }

    /// Run the mark engine for `work` words; returns work done and left
    fn mark_step(&mut self, work: isize) -> (isize, isize) {
        let mut sets: Vec<&mut dyn RootSet> = Vec::with_capacity(self.root_sets.len() + 1);
        sets.push(&mut self.global_roots);
        for set in self.root_sets.iter_mut() {
            sets.push(set.as_mut());
        }
        let mut roots = RootChain::new(sets);

        let outcome = self.marker.mark_slice(
            work,
            self.state.mark_cursor,
            MarkContext {
                heap: &self.heap,
                roots: &mut roots,
                finaliser: &mut self.finaliser,
                weak_head: &mut self.weak_head,
                ref_table: &mut self.ref_table,
                weak_ref_table: &mut self.weak_ref_table,
            },
        );
        self.state.mark_cursor = outcome.cursor;

        for (from, to) in self.marker.take_transitions() {
            log::debug!("Cycle {}: subphase {:?} -> {:?}", self.state.cycle, from, to);
            self.logger.log(GcEvent::SubphaseChange {
                cycle: self.state.cycle,
                from,
                to,
            });
        }
        self.note_gray_resizes();

        if outcome.finished {
            run_hook(&mut self.hooks.mark_end);
            self.heap.free_list_mut().init_merge();
            self.sweeper.start(&self.heap);
            self.set_phase(Phase::Sweep);
        }
        (outcome.work_done, outcome.work_left)
    }

    /// Run the sweep engine for `work` words; returns work done and left
    fn sweep_step(&mut self, work: isize) -> (isize, isize) {
        let profiler = &mut self.profiler;
        let mut sample = |hd: Header| profiler.sample_reclaimed(hd);
        let on_reclaim: Option<&mut dyn FnMut(Header)> =
            if profiler_samples_lifetimes(&self.config) {
                Some(&mut sample)
            } else {
                None
            };

        let outcome = self.sweeper.sweep_slice(
            work,
            SweepContext {
                heap: &mut self.heap,
                custom_ops: &self.custom_ops,
                on_reclaim,
            },
        );

        if outcome.finished {
            self.stats.major_collections += 1;
            self.set_phase(Phase::Idle);
            let free_wsz = self.heap.free_list().free_wsz();
            log::info!(
                "Major cycle {} completed: {} of {} words free",
                self.state.cycle,
                free_wsz,
                self.heap.heap_wsz()
            );
            self.logger.log(GcEvent::CycleEnd {
                cycle: self.state.cycle,
                heap_wsz: self.heap.heap_wsz(),
                free_wsz,
            });
        }
        (outcome.work_done, outcome.work_left)
    }

    /// Perform one slice of major work
    ///
    /// `request` selects the amount: `Auto` spends what recent allocation
    /// earned, `Compute` forces a bucket's worth, `Manual(n)` enough to free
    /// about `n` words. An idle collector only starts a cycle.
    pub fn major_slice(&mut self, request: SliceRequest) -> SliceReport {
        let timer = GcTimer::start();
        let phase_before = self.state.phase;
        run_hook(&mut self.hooks.slice_begin);
        self.state.slice_requested = false;

        let heap_wsz = self.heap.heap_wsz();
        let raw_p = raw_proportion(&PacingInputs {
            allocated_words: self.state.allocated_words,
            heap_wsz,
            percent_free: self.config.percent_free,
            dependent_allocated: self.state.dependent_allocated,
            dependent_size: self.state.dependent_size,
            extra_heap_resources: self.state.extra_heap_resources,
            max_slice_proportion: self.config.max_slice_proportion,
        });
        self.pacer.distribute(raw_p);

        let manual_p = match request {
            SliceRequest::Manual(words) => {
                manual_proportion(words, heap_wsz, self.config.percent_free)
            },
            _ => 0.0,
        };
        let filtered_p = self.pacer.filter(request, manual_p);

        log::trace!(
            "Slice {:?}: allocated {} words, raw p = {:.6}, filtered p = {:.6}",
            request,
            self.state.allocated_words,
            raw_p,
            filtered_p
        );

        let mut computed_work: i64 = 0;
        let mut work_done: i64 = 0;
        let p_done = if phase_before == Phase::Idle {
            self.start_cycle();
            0.0
        } else if filtered_p < 0.0 {
            0.0
        } else {
            let p = filtered_p;
            let (done, left) = match phase_before {
                Phase::Mark => {
                    let factor = self.config.mark_work_factor(heap_wsz)
                        + self.incremental_roots_count() as f64;
                    computed_work = (p * factor) as i64;
                    self.mark_step(computed_work as isize)
                },
                Phase::Sweep => {
                    computed_work = (p * self.config.sweep_work_factor(heap_wsz)) as i64;
                    self.sweep_step(computed_work as isize)
                },
                Phase::Idle => (0, 0),
            };
            work_done = done as i64;
            if computed_work > 0 {
                p * (computed_work - left as i64) as f64 / computed_work as f64
            } else {
                p
            }
        };

        self.pacer.give_back(filtered_p - p_done);

        self.stats.major_words += self.state.allocated_words as u64;
        self.state.allocated_words = 0;
        self.state.dependent_allocated = 0;
        self.state.extra_heap_resources = 0.0;

        let duration = timer.elapsed();
        if phase_before != Phase::Idle {
            self.stats
                .record_slice(phase_before == Phase::Mark, work_done.max(0) as u64, duration);
        }
        log::debug!(
            "{:?} slice: computed {} words, did {} (p done {:.6})",
            phase_before,
            computed_work,
            work_done,
            p_done
        );
        if self.config.verbose {
            println!(
                "[GC] {:?} slice: {} words ordered, {} done",
                phase_before, computed_work, work_done
            );
        }
        self.logger.log(GcEvent::Slice {
            cycle: self.state.cycle,
            phase: phase_before,
            computed_work,
            filtered_p,
            duration_us: duration.as_micros() as u64,
        });

        run_hook(&mut self.hooks.slice_end);
        if self.state.phase == Phase::Idle {
            run_hook(&mut self.hooks.cycle_end);
        }

        SliceReport {
            request,
            raw_p,
            filtered_p,
            computed_work,
            p_done,
            work_done,
            phase_before,
            phase_after: self.state.phase,
        }
    }

    /// Complete the current cycle, starting one if idle
    pub fn finish_major_cycle(&mut self) {
        if self.state.phase == Phase::Idle {
            self.start_cycle();
        }
        while self.state.phase == Phase::Mark {
            let (done, _) = self.mark_step(isize::MAX);
            self.stats.words_marked += done.max(0) as u64;
        }
        while self.state.phase == Phase::Sweep {
            let (done, _) = self.sweep_step(isize::MAX);
            self.stats.words_swept += done.max(0) as u64;
        }
        self.stats.major_words += self.state.allocated_words as u64;
        self.state.allocated_words = 0;
    }

    /// Finish the current cycle, run finalisers, then run a whole new cycle
    pub fn full_major(&mut self) {
        self.finish_major_cycle();
        let ran = self.run_pending_finalisers();
        if ran > 0 {
            log::debug!("{} finalisers ran between cycles", ran);
        }
        self.finish_major_cycle();
    }

    // ---------------------------------------------------------------------
    // Pacing inputs
    // ---------------------------------------------------------------------

    /// Resize the pacing window, keeping the work owed
    pub fn set_major_window(&mut self, window: usize) -> Result<()> {
        let old = self.pacer.window();
        self.pacer.set_window(window)?;
        self.config.major_window = window;
        if old != window {
            self.logger.log(GcEvent::WindowChanged { old, new: window });
        }
        Ok(())
    }

    pub fn major_window(&self) -> usize {
        self.pacer.window()
    }

    /// Advance the pacing clock by the fraction of the minor heap used
    pub fn advance_clock(&mut self, fraction: f64) {
        self.pacer.advance_clock(fraction);
    }

    /// Account for `res` units out of `max` of an external resource
    ///
    /// When the extra proportion exceeds one cycle, a slice is requested.
    pub fn adjust_gc_speed(&mut self, res: usize, max: usize) {
        let max = max.max(1);
        let res = res.min(max);
        self.state.extra_heap_resources += res as f64 / max as f64;
        if self.state.extra_heap_resources > 1.0 {
            self.state.extra_heap_resources = 1.0;
            self.request_major_slice();
        }
    }

    pub fn request_major_slice(&mut self) {
        self.state.slice_requested = true;
    }

    pub fn slice_requested(&self) -> bool {
        self.state.slice_requested
    }

    /// A heap block took hold of `bytes` bytes of outside memory
    pub fn alloc_dependent(&mut self, bytes: usize) {
        let words = wsize_bsize(bytes);
        self.state.dependent_size += words;
        self.state.dependent_allocated += words;
    }

    /// Outside memory held by a heap block was released
    pub fn free_dependent(&mut self, bytes: usize) {
        let words = wsize_bsize(bytes);
        self.state.dependent_size = self.state.dependent_size.saturating_sub(words);
    }

    // ---------------------------------------------------------------------
    // Profiling
    // ---------------------------------------------------------------------

    /// Allocation site recorded in the header of `v`
    pub fn where_was_allocated(&self, v: Value) -> Option<u64> {
        if !self.heap.page_table().is_in_value_area(v) {
            return None;
        }
        let profinfo = unsafe { v.header() }.profinfo();
        (profinfo != NO_PROFINFO).then_some(profinfo)
    }

    /// Run a full major cycle, then erase the profinfo of every block
    pub fn forget_where_values_were_allocated(&mut self) {
        self.full_major();
        let mut cleared = 0usize;
        for (hp, hd) in self.heap.blocks() {
            if !hd.is_blue() && hd.profinfo() != NO_PROFINFO {
                // The walk only yields block headers of mapped chunks.
                unsafe { Value::from_hp(hp).set_header(hd.with_profinfo(NO_PROFINFO)) };
                cleared += 1;
            }
        }
        log::debug!("Forgot the allocation site of {} blocks", cleared);
    }

    /// Clamp assigned profinfo values into `[min, max]`
    pub fn set_profinfo_override(&mut self, min: u64, max: u64) -> Result<()> {
        self.profiler.set_profinfo_override(min, max)
    }

    /// Profinfo for a foreign allocation at `return_address`
    pub fn my_profinfo(&mut self, return_address: Option<usize>) -> u64 {
        self.profiler.my_profinfo(return_address)
    }

    /// Sample the death of a block; used by the minor heap
    pub fn record_lifetime_sample(&mut self, hd: Header, in_major_heap: bool, now: u64) -> Option<usize> {
        self.profiler.record_lifetime_sample(hd, in_major_heap, now)
    }

    // ---------------------------------------------------------------------
    // Reports
    // ---------------------------------------------------------------------

    /// Write the allocators report of the current heap to `out`
    pub fn write_allocators<W: Write>(&self, out: &mut W, sample_strings: usize) -> io::Result<HeapCensus> {
        report::write_allocators(&self.heap, out, sample_strings)
    }

    /// Write the allocators report to a file
    pub fn dump_allocators_of_major_heap_blocks(
        &self,
        path: impl AsRef<Path>,
        sample_strings: usize,
    ) -> Result<HeapCensus> {
        let path = path.as_ref();
        let mut out = create_report(path)?;
        let census = report::write_allocators(&self.heap, &mut out, sample_strings)
            .and_then(|census| out.flush().map(|_| census))
            .map_err(|source| report_error(path, source))?;
        self.report_written("allocators", path);
        Ok(census)
    }

    /// Run a full major cycle, then write the heap graph to two files
    ///
    /// Nothing is collected when either file cannot be created.
    pub fn dump_heapgraph(
        &mut self,
        node_path: impl AsRef<Path>,
        edge_path: impl AsRef<Path>,
    ) -> Result<HeapGraphCounts> {
        let (node_path, edge_path) = (node_path.as_ref(), edge_path.as_ref());
        let mut nodes = create_report(node_path)?;
        let mut edges = create_report(edge_path)?;

        self.full_major();

        let counts = report::write_heap_graph(&self.heap, &mut nodes, &mut edges)
            .and_then(|counts| nodes.flush().map(|_| counts))
            .map_err(|source| report_error(node_path, source))?;
        edges.flush().map_err(|source| report_error(edge_path, source))?;
        self.report_written("heapgraph", node_path);
        Ok(counts)
    }

    /// Write the lifetime histogram to `out`; returns the number of lines
    pub fn write_lifetimes<W: Write>(&self, out: &mut W) -> io::Result<usize> {
        self.profiler.lifetimes().write_report(out)
    }

    /// Write the lifetime histogram to a file
    pub fn dump_lifetimes(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let mut out = create_report(path)?;
        let lines = self
            .profiler
            .lifetimes()
            .write_report(&mut out)
            .and_then(|lines| out.flush().map(|_| lines))
            .map_err(|source| report_error(path, source))?;
        self.report_written("lifetimes", path);
        Ok(lines)
    }

    fn report_written(&self, kind: &str, path: &Path) {
        self.logger.log(GcEvent::ReportWritten {
            kind: kind.to_string(),
            path: path.display().to_string(),
        });
    }

    // ---------------------------------------------------------------------
    // Address areas
    // ---------------------------------------------------------------------

    /// Declare `[start, end)` as the young area
    pub fn add_young_range(&mut self, start: usize, end: usize) -> Result<()> {
        self.heap
            .page_table_mut()
            .add(PageClass::IN_YOUNG, start, end, None)
    }

    pub fn remove_young_range(&mut self, start: usize, end: usize) {
        self.heap
            .page_table_mut()
            .remove(PageClass::IN_YOUNG, start, end);
    }

    /// Declare `[start, end)` as static data
    pub fn add_static_data(&mut self, start: usize, end: usize) -> Result<()> {
        self.heap
            .page_table_mut()
            .add(PageClass::IN_STATIC_DATA, start, end, None)
    }

    // ---------------------------------------------------------------------
    // Checks and introspection
    // ---------------------------------------------------------------------

    /// Verify the heap
    ///
    /// Checks that blocks tile every chunk, that the free list matches the
    /// blue blocks, that no block references a free block, and outside Mark
    /// that no gray block is left. During Sweep, no unswept black block may
    /// reference an unswept white block, and the fields of unswept white
    /// blocks are not checked.
    pub fn check_heap(&self) -> Result<HeapCheck> {
        let page_table = self.heap.page_table();
        let mut check = HeapCheck::default();

        for (id, chunk) in self.heap.chunks().iter().enumerate() {
            let mut hp = chunk.start();
            while hp < chunk.limit() {
                // `hp` always lands on a header while the tiling holds.
                let hd = Header::from_raw(unsafe { read_word(hp) });
                check.blocks += 1;
                match hd.color() {
                    Color::Blue => check.blue_wsz += hd.whsize(),
                    Color::White => check.white_wsz += hd.whsize(),
                    Color::Gray => {
                        if self.state.phase != Phase::Mark {
                            return Err(corruption(format!(
                                "gray block at {:#x} during {:?}",
                                hp, self.state.phase
                            )));
                        }
                        check.gray_wsz += hd.whsize();
                    },
                    Color::Black => check.black_wsz += hd.whsize(),
                }
                // An unswept white block is dead; its fields may already
                // point at blocks this sweep freed.
                let dead = self.state.phase == Phase::Sweep
                    && hd.is_white()
                    && !self.sweeper.is_swept(page_table, hp);
                if !hd.is_blue() && hd.is_scannable() && !dead {
                    self.check_fields(Value::from_hp(hp), hd)?;
                }
                hp += hd.bhsize();
            }
            if hp != chunk.limit() {
                return Err(corruption(format!(
                    "chunk {} overruns its limit: last block ends at {:#x}, limit {:#x}",
                    id,
                    hp,
                    chunk.limit()
                )));
            }
        }

        let free_wsz = self.heap.free_list().free_wsz();
        if check.blue_wsz != free_wsz {
            return Err(corruption(format!(
                "{} blue words in the heap but {} in the free list",
                check.blue_wsz, free_wsz
            )));
        }
        debug_assert!(page_table.len() > 0);
        Ok(check)
    }

    fn check_fields(&self, v: Value, hd: Header) -> Result<()> {
        let page_table = self.heap.page_table();
        let sweeping = self.state.phase == Phase::Sweep;
        let parent_unswept = sweeping && !self.sweeper.is_swept(page_table, v.hp());

        for i in 0..hd.wosize() {
            let mut child = unsafe { v.field(i) };
            if !page_table.is_in_heap(child) {
                continue;
            }
            let mut chd = unsafe { child.header() };
            if chd.tag() == tag::INFIX {
                child = child.sub_bytes(chd.infix_offset());
                chd = unsafe { child.header() };
            }
            if chd.is_blue() {
                return Err(corruption(format!(
                    "field {} of {:?} points to free block {:?}",
                    i, v, child
                )));
            }
            if parent_unswept
                && hd.is_black()
                && chd.is_white()
                && !self.sweeper.is_swept(page_table, child.hp())
            {
                return Err(corruption(format!(
                    "black block {:?} references white block {:?} in field {}",
                    v, child, i
                )));
            }
        }
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Marking subphase, while marking
    pub fn subphase(&self) -> Option<Subphase> {
        (self.state.phase == Phase::Mark).then(|| self.marker.subphase())
    }

    pub fn state(&self) -> &CollectorState {
        &self.state
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn heap(&self) -> &MajorHeap {
        &self.heap
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    pub fn profiler(&self) -> &AllocProfiler {
        &self.profiler
    }

    pub fn profiler_mut(&mut self) -> &mut AllocProfiler {
        &mut self.profiler
    }

    pub fn logger(&self) -> &GcLogger {
        &self.logger
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn ref_table(&self) -> &RefTable {
        &self.ref_table
    }

    pub fn weak_ref_table(&self) -> &RefTable {
        &self.weak_ref_table
    }

    pub fn global_roots(&self) -> &GlobalRoots {
        &self.global_roots
    }

    pub fn pending_finalisers(&self) -> usize {
        self.finaliser.pending_len()
    }

    /// Total cycles completed
    pub fn cycle_count(&self) -> u64 {
        self.stats.major_collections
    }

    /// Serializable summary of counters and heap figures
    pub fn summary(&self) -> GcSummary {
        self.stats.summary(HeapFigures {
            heap_wsz: self.heap.heap_wsz(),
            top_heap_wsz: self.heap.top_heap_wsz(),
            heap_chunks: self.heap.heap_chunks(),
            free_wsz: self.heap.free_list().free_wsz(),
        })
    }

    /// Get detailed diagnostic information
    ///
    /// # Returns
    /// A map of labelled values, in a stable order
    pub fn diagnostics(&self) -> IndexMap<String, String> {
        let mut diagnostics = IndexMap::new();

        diagnostics.insert("phase".to_string(), format!("{:?}", self.state.phase));
        if let Some(subphase) = self.subphase() {
            diagnostics.insert("subphase".to_string(), format!("{:?}", subphase));
        }
        diagnostics.insert("cycle".to_string(), self.state.cycle.to_string());
        diagnostics.insert(
            "major_collections".to_string(),
            self.stats.major_collections.to_string(),
        );
        diagnostics.insert("heap_wsz".to_string(), self.heap.heap_wsz().to_string());
        diagnostics.insert(
            "top_heap_wsz".to_string(),
            self.heap.top_heap_wsz().to_string(),
        );
        diagnostics.insert("heap_chunks".to_string(), self.heap.heap_chunks().to_string());
        diagnostics.insert(
            "free_wsz".to_string(),
            self.heap.free_list().free_wsz().to_string(),
        );
        diagnostics.insert(
            "allocated_words".to_string(),
            self.state.allocated_words.to_string(),
        );
        diagnostics.insert("major_window".to_string(), self.pacer.window().to_string());
        diagnostics.insert(
            "work_credit".to_string(),
            format!("{:.6}", self.pacer.work_credit()),
        );
        diagnostics.insert(
            "outstanding_work".to_string(),
            format!("{:.6}", self.pacer.outstanding()),
        );
        diagnostics.insert(
            "gray_capacity".to_string(),
            self.marker.gray().capacity().to_string(),
        );
        diagnostics.insert("roots".to_string(), self.global_roots.len().to_string());
        diagnostics.insert(
            "pending_finalisers".to_string(),
            self.finaliser.pending_len().to_string(),
        );
        diagnostics.insert(
            "slice_requested".to_string(),
            self.state.slice_requested.to_string(),
        );

        diagnostics
    }

    // ---------------------------------------------------------------------
    // Hooks
    // ---------------------------------------------------------------------

    /// Run `hook` when marking completes
    pub fn set_mark_end_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.hooks.mark_end = Some(Box::new(hook));
    }

    pub fn set_slice_begin_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.hooks.slice_begin = Some(Box::new(hook));
    }

    pub fn set_slice_end_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.hooks.slice_end = Some(Box::new(hook));
    }

    /// Run `hook` after a slice that completes a cycle
    pub fn set_cycle_end_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.hooks.cycle_end = Some(Box::new(hook));
    }
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("phase", &self.state.phase)
            .field("cycle", &self.state.cycle)
            .field("heap_wsz", &self.heap.heap_wsz())
            .field("pacer", &self.pacer)
            .finish()
    }
}

fn profiler_samples_lifetimes(config: &GcConfig) -> bool {
    config.profiling.profinfo_source == ProfinfoSource::AllocationTime
}

fn corruption(message: String) -> MgcError {
    log::error!("Heap check failed: {}", message);
    MgcError::HeapCorruption(message)
}

fn report_error(path: &Path, source: io::Error) -> MgcError {
    log::error!("Cannot write report '{}': {}", path.display(), source);
    MgcError::Report {
        path: path.display().to_string(),
        source,
    }
}

fn create_report(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| report_error(path, source))
}
