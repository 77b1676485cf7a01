//! Allocation Profiler - allocation sites and lifetimes in header bits
//!
//! Every header has a profinfo field. Depending on
//! [`ProfinfoSource`], a new block gets either
//! - the identifier of its allocation site, taken from the call-graph
//!   [`Trie`], or
//! - the allocation clock at the time it was made, so that its lifetime can
//!   be sampled when it dies.
//!
//! Zero always means "no information". Small fixed identifiers mark blocks
//! whose site is known not to be attributable; real sites start at
//! [`PROFINFO_LOWEST`].

pub mod lifetime;
pub mod report;
pub mod trie;

pub use lifetime::{LifetimeBucket, LifetimeHistogram, MAX_LOG2_OBJECT_SIZE};
pub use report::{HeapCensus, HeapGraphCounts};
pub use trie::{AllocationPoint, DynamicKind, EntryKind, Hole, NodeId, Trie, TrieNode};

use crate::config::{ConfigError, ProfilingConfig, ProfinfoSource};
use crate::error::{MgcError, Result};
use crate::object::{Header, NO_PROFINFO, PROFINFO_MASK};

/// The return address of an allocating foreign call could not be read
pub const BUILTIN_RETURN_ADDRESS_FAILURE: u64 = 1 << 4;
/// Closure emitted as static data
pub const CONSTANT_CLOSURE: u64 = 2 << 4;
/// Structured constant emitted as static data
pub const STRUCTURED_CONSTANT: u64 = 3 << 4;
/// Block of a compilation unit
pub const COMPILATION_UNIT: u64 = 4 << 4;

/// First identifier handed out for a real allocation site
pub const PROFINFO_LOWEST: u64 = 0x100;

static_assertions::const_assert!(COMPILATION_UNIT < PROFINFO_LOWEST);

/// Where a block is being allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocSite {
    /// Nothing known; the block gets no profinfo
    Unknown,
    /// Allocation point `index` of a static node
    Point { node: NodeId, index: usize },
    /// Foreign code, identified by the return address of its allocation
    Foreign { return_address: Option<usize> },
    ConstantClosure,
    StructuredConstant,
    CompilationUnit,
    /// An identifier computed by the caller
    Explicit(u64),
}

/// Profiler state of one collector
#[derive(Debug)]
pub struct AllocProfiler {
    source: ProfinfoSource,
    lifetime_shift: u32,
    trie: Trie,
    current: Hole,
    overrides: Option<(u64, u64)>,
    lifetimes: LifetimeHistogram,
    /// Bytes allocated so far, the lifetime clock
    clock: u64,
}

impl AllocProfiler {
    pub fn new(config: &ProfilingConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            source: config.profinfo_source,
            lifetime_shift: config.lifetime_shift,
            trie: Trie::new(),
            current: Hole::Root,
            overrides: None,
            lifetimes: LifetimeHistogram::new(&config.lifetime)?,
            clock: 0,
        })
    }

    pub fn source(&self) -> ProfinfoSource {
        self.source
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    pub fn trie_mut(&mut self) -> &mut Trie {
        &mut self.trie
    }

    /// Hole the mutator is currently running in
    pub fn current_hole(&self) -> Hole {
        self.current
    }

    pub fn set_current_hole(&mut self, hole: Hole) {
        self.current = hole;
    }

    /// Clamp every identifier returned from now on into `[min, max]`
    pub fn set_profinfo_override(&mut self, min: u64, max: u64) -> Result<()> {
        if min == NO_PROFINFO || min > max || max > PROFINFO_MASK {
            return Err(MgcError::InvalidArgument(format!(
                "profinfo override [{:#x}, {:#x}] must be a non-empty range inside [1, {:#x}]",
                min, max, PROFINFO_MASK
            )));
        }
        self.overrides = Some((min, max));
        Ok(())
    }

    pub fn clear_profinfo_override(&mut self) {
        self.overrides = None;
    }

    /// Lower override bound, 0 when there is none
    pub fn min_override_profinfo(&self) -> u64 {
        self.overrides.map(|(min, _)| min).unwrap_or(0)
    }

    /// Upper override bound, 0 when there is none
    pub fn max_override_profinfo(&self) -> u64 {
        self.overrides.map(|(_, max)| max).unwrap_or(0)
    }

    fn clamp(&self, profinfo: u64) -> u64 {
        match self.overrides {
            Some((min, max)) if profinfo != NO_PROFINFO => profinfo.clamp(min, max),
            _ => profinfo,
        }
    }

    /// Profinfo for foreign code allocating at `return_address`, relative to
    /// the current hole
    pub fn my_profinfo(&mut self, return_address: Option<usize>) -> u64 {
        let profinfo = match return_address {
            None => BUILTIN_RETURN_ADDRESS_FAILURE,
            Some(pc) => self
                .trie
                .foreign_allocation_point(self.current, pc)
                .unwrap_or_else(|e| {
                    log::debug!("No trie node for foreign allocation at {:#x}: {}", pc, e);
                    BUILTIN_RETURN_ADDRESS_FAILURE
                }),
        };
        self.clamp(profinfo)
    }

    /// Allocation clock in header units
    pub fn now(&self) -> u64 {
        (self.clock >> self.lifetime_shift) & PROFINFO_MASK
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Advance the clock by `bytes` allocated outside the major heap
    pub fn advance(&mut self, bytes: u64) {
        self.clock = self.clock.wrapping_add(bytes);
    }

    /// Profinfo for a new block of `bytes` bytes allocated at `site`
    pub fn assign_profinfo(&mut self, site: AllocSite, bytes: u64) -> u64 {
        self.advance(bytes);
        match self.source {
            ProfinfoSource::AllocationTime => self.now(),
            ProfinfoSource::AllocationSite => {
                let profinfo = match site {
                    AllocSite::Unknown => NO_PROFINFO,
                    AllocSite::Point { node, index } => self
                        .trie
                        .allocation_point_profinfo(node, index)
                        .unwrap_or(BUILTIN_RETURN_ADDRESS_FAILURE),
                    AllocSite::Foreign { return_address } => return self.my_profinfo(return_address),
                    AllocSite::ConstantClosure => CONSTANT_CLOSURE,
                    AllocSite::StructuredConstant => STRUCTURED_CONSTANT,
                    AllocSite::CompilationUnit => COMPILATION_UNIT,
                    AllocSite::Explicit(profinfo) => profinfo & PROFINFO_MASK,
                };
                self.clamp(profinfo)
            },
        }
    }

    /// Sample the death of a block
    pub fn record_lifetime_sample(&mut self, hd: Header, in_major_heap: bool, now: u64) -> Option<usize> {
        self.lifetimes.record(hd, in_major_heap, now)
    }

    /// Sample a block reclaimed by the sweeper, if headers hold times
    pub fn sample_reclaimed(&mut self, hd: Header) {
        if self.source == ProfinfoSource::AllocationTime {
            let now = self.now();
            self.lifetimes.record(hd, true, now);
        }
    }

    pub fn lifetimes(&self) -> &LifetimeHistogram {
        &self.lifetimes
    }
}
