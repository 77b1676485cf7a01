//! Profiler Reports - read-only walks of the major heap
//!
//! Both reports are line oriented. Addresses and identifiers are printed
//! in hex.

use super::{
    BUILTIN_RETURN_ADDRESS_FAILURE, COMPILATION_UNIT, CONSTANT_CLOSURE, STRUCTURED_CONSTANT,
};
use crate::heap::MajorHeap;
use crate::object::{tag, Color, Value, NO_PROFINFO};
use indexmap::IndexSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Word totals of the allocators report
///
/// Sentinel categories are part of `accounted_wsz`, so
/// `blue_wsz + accounted_wsz + unaccounted_wsz == all_wsz == heap_wsz`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapCensus {
    pub accounted_wsz: u64,
    pub unaccounted_wsz: u64,
    /// Blocks (not words) with no profiling info, per tag
    pub unaccounted_blocks_by_tag: BTreeMap<u8, u64>,
    pub builtin_return_address_failures_wsz: u64,
    pub constant_closures_wsz: u64,
    pub structured_constants_wsz: u64,
    pub compilation_units_wsz: u64,
    pub blue_wsz: u64,
    pub all_wsz: u64,
    pub heap_wsz: u64,
}

/// Write the allocation site of every block of the heap
///
/// One `<site> <whsize> <b|g|w>` line per block with a real site, up to
/// `sample_strings` example lines for blocks without one, then the totals.
pub fn write_allocators<W: Write>(
    heap: &MajorHeap,
    out: &mut W,
    mut sample_strings: usize,
) -> io::Result<HeapCensus> {
    let mut census = HeapCensus::default();

    for (hp, hd) in heap.blocks() {
        let whsize = hd.whsize() as u64;
        if hd.is_blue() {
            census.blue_wsz += whsize;
            continue;
        }

        match hd.profinfo() {
            NO_PROFINFO => {
                census.unaccounted_wsz += whsize;
                *census.unaccounted_blocks_by_tag.entry(hd.tag()).or_insert(0) += 1;
                if sample_strings > 0 {
                    let v = Value::from_hp(hp);
                    // A block without fields has no first field to show.
                    let first = if hd.wosize() > 0 {
                        unsafe { v.field(0) }.raw()
                    } else {
                        0
                    };
                    writeln!(
                        out,
                        "example value (tag {}) with no profiling info: {:#x} (first field {:#x})",
                        hd.tag(),
                        v.raw(),
                        first
                    )?;
                    sample_strings -= 1;
                }
            },
            BUILTIN_RETURN_ADDRESS_FAILURE => {
                census.builtin_return_address_failures_wsz += whsize;
                census.accounted_wsz += whsize;
            },
            CONSTANT_CLOSURE => {
                census.constant_closures_wsz += whsize;
                census.accounted_wsz += whsize;
            },
            STRUCTURED_CONSTANT => {
                census.structured_constants_wsz += whsize;
                census.accounted_wsz += whsize;
            },
            COMPILATION_UNIT => {
                census.compilation_units_wsz += whsize;
                census.accounted_wsz += whsize;
            },
            site => {
                census.accounted_wsz += whsize;
                writeln!(out, "{:#x} {} {}", site, whsize, hd.color().code())?;
            },
        }
    }

    census.all_wsz = census.blue_wsz + census.accounted_wsz + census.unaccounted_wsz;
    census.heap_wsz = heap.heap_wsz() as u64;

    writeln!(
        out,
        "word size (incl headers) of non-blue blocks with profiling info: {}",
        census.accounted_wsz
    )?;
    write!(
        out,
        "word size (incl headers) of non-blue blocks with no profiling info: {}\n  by tag: ",
        census.unaccounted_wsz
    )?;
    for (tag, blocks) in &census.unaccounted_blocks_by_tag {
        write!(out, "tag({})={} ", tag, blocks)?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "word size (incl headers) with __builtin_return_address failures: {}",
        census.builtin_return_address_failures_wsz
    )?;
    writeln!(
        out,
        "word size (incl headers) of constant closures: {}",
        census.constant_closures_wsz
    )?;
    writeln!(
        out,
        "word size (incl headers) of structured constants: {}",
        census.structured_constants_wsz
    )?;
    writeln!(
        out,
        "word size (incl headers) of compilation unit blocks: {}",
        census.compilation_units_wsz
    )?;
    writeln!(out, "word size (incl headers) of blue blocks: {}", census.blue_wsz)?;
    writeln!(out, "word size (incl headers) of all blocks: {}", census.all_wsz)?;
    writeln!(out, "heap size in words: {}", census.heap_wsz)?;

    Ok(census)
}

/// Line counts of a heap graph dump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapGraphCounts {
    pub nodes: usize,
    pub edges: usize,
}

/// Write the reference graph between allocation sites
///
/// For every field of a scannable block with a site that points at another
/// block with a site, both blocks become `B <site>,<tag>,<wosize>` node
/// lines (each written once) and the pair an `E <parent>,<child>` edge
/// line.
pub fn write_heap_graph<N: Write, E: Write>(
    heap: &MajorHeap,
    nodes: &mut N,
    edges: &mut E,
) -> io::Result<HeapGraphCounts> {
    let page_table = heap.page_table();
    let mut seen: IndexSet<(u64, u8, usize)> = IndexSet::new();
    let mut counts = HeapGraphCounts::default();

    for (hp, hd) in heap.blocks() {
        let parent_site = hd.profinfo();
        if hd.color() == Color::Blue || parent_site == NO_PROFINFO || hd.tag() >= tag::NO_SCAN {
            continue;
        }
        let parent = Value::from_hp(hp);
        for i in 0..hd.wosize() {
            // Scannable heap blocks hold valid values in every field.
            let child = unsafe { parent.field(i) };
            if !page_table.is_in_value_area(child) {
                continue;
            }
            let child_hd = unsafe { child.header() };
            let child_site = child_hd.profinfo();
            if child_site == NO_PROFINFO {
                continue;
            }

            for node in [
                (parent_site, hd.tag(), hd.wosize()),
                (child_site, child_hd.tag(), child_hd.wosize()),
            ] {
                if seen.insert(node) {
                    writeln!(nodes, "B {:#x},{},{}", node.0, node.1, node.2)?;
                    counts.nodes += 1;
                }
            }
            writeln!(edges, "E {:#x},{:#x}", parent_site, child_site)?;
            counts.edges += 1;
        }
    }

    Ok(counts)
}
