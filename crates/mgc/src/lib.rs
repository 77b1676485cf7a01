//! # MGC - Incremental Major Heap Collector
//!
//! MGC manages the major heap of a runtime whose values are tagged words:
//! odd words are immediate integers, even words point to blocks that carry
//! a one-word header. The heap is collected by an incremental tri-color
//! mark and sweep, interleaved with the mutator in small slices.
//!
//! ## Quick Start
//!
//! ```rust
//! use mgc::{GarbageCollector, GcConfig, SliceRequest, Value};
//!
//! fn main() -> Result<(), mgc::MgcError> {
//!     let mut gc = GarbageCollector::new(GcConfig::default())?;
//!
//!     // A two-field block, kept alive by a global root
//!     let pair = gc.alloc_shr(2, 0)?;
//!     gc.register_root(pair);
//!     gc.modify(pair, 0, Value::of_int(42))?;
//!
//!     // Let the collector do a share of work proportional to allocation
//!     gc.major_slice(SliceRequest::Auto);
//!
//!     // Or finish everything at once
//!     gc.full_major();
//!     assert_eq!(unsafe { pair.field(0) }.to_int(), 42);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Mutator                           │
//! │   alloc_shr      modify / darken      weak_get / set     │
//! └──────┬──────────────────┬──────────────────┬─────────────┘
//!        │                  │                  │
//! ┌──────▼──────────────────▼──────────────────▼─────────────┐
//! │                   GarbageCollector                       │
//! │  Pacer ──► major_slice ──► Marker (gray worklist, roots) │
//! │                       └──► Sweeper (free list merging)   │
//! │  AllocProfiler: profinfo in headers, lifetime histogram  │
//! └──────┬───────────────────────────────────────────────────┘
//!        │
//! ┌──────▼───────────────────────────────────────────────────┐
//! │   MajorHeap: chunks, page table, address-ordered free list│
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Header Layout
//!
//! ```text
//! ┌──────────────────┬───────────────────────┬───────┬─────────┐
//! │ profinfo (26)    │ wosize                │ color │ tag (8) │
//! │ 63-38            │ 37-10                 │ 9-8   │ 7-0     │
//! └──────────────────┴───────────────────────┴───────┴─────────┘
//! ```
//!
//! ## Safety
//!
//! Blocks are raw memory. A [`Value`] stays valid only while it is reachable
//! from a root; the collector never moves blocks, but it does reuse the
//! memory of unreachable ones. Field stores into heap blocks must go through
//! [`GarbageCollector::modify`] so that marking sees them.
//!
//! ## Modules
//!
//! - [`config`]: Collector configuration and validation
//! - [`error`]: Error types
//! - [`gc`]: Cycle driver, barriers, roots and reports
//! - [`heap`]: Chunks, page table, free list and remembered sets
//! - [`logging`]: Structured event log
//! - [`marker`]: Gray worklist, root sets and the mark engine
//! - [`memory`]: Word-level memory helpers
//! - [`object`]: Headers, values, custom blocks and weak arrays
//! - [`pacer`]: Slice sizing and work smoothing
//! - [`profiling`]: Allocation-site identifiers and lifetime sampling
//! - [`runtime`]: Finalisation
//! - [`stats`]: Counters and slice histograms
//! - [`sweep`]: The sweep engine

// Core
pub mod config;
pub mod error;
pub mod gc;

// Memory layout
pub mod heap;
pub mod memory;
pub mod object;

// Collection
pub mod marker;
pub mod pacer;
pub mod sweep;

// Services and monitoring
pub mod logging;
pub mod profiling;
pub mod runtime;
pub mod stats;

pub use config::{GcConfig, ProfilingConfig, ProfinfoSource};
pub use error::{MgcError, Result};
pub use gc::{CollectorState, GarbageCollector, HeapCheck, Phase, Subphase};
pub use logging::{GcEvent, GcLogger, GcLoggerConfig};
pub use marker::{RootId, RootSet};
pub use object::{tag, Color, CustomOps, Header, Value};
pub use pacer::{SliceReport, SliceRequest};
pub use profiling::{AllocSite, HeapCensus, HeapGraphCounts};
pub use stats::{GcStats, GcSummary};

/// MGC version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a collector with the configuration found in the environment
///
/// # Examples
///
/// ```rust
/// let mut gc = mgc::init()?;
/// gc.full_major();
/// # Ok::<(), mgc::MgcError>(())
/// ```
pub fn init() -> Result<GarbageCollector> {
    GarbageCollector::new(GcConfig::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_default() {
        assert!(init().is_ok());
    }

    #[test]
    fn test_default_config_valid() {
        assert!(GcConfig::default().validate().is_ok());
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
