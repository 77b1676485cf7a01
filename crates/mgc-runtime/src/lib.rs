//! MGC Runtime Library
//!
//! C entry points over a process-wide MGC collector, for code emitted by a
//! compiler:
//! - initialisation and allocation
//! - slices and full major cycles
//! - profiler queries and report dumps

mod gc;

pub use gc::*;
