//! Pacer - turning allocation into collector work
//!
//! Work is measured as a proportion of one full cycle. Every slice adds the
//! proportion earned by recent allocation to a ring of `window` buckets,
//! spread evenly, and then takes one bucket's worth out to perform. A
//! larger window smooths bursts of allocation over more slices.
//!
//! ```text
//!            p / window to every bucket
//!   ┌──────┬──────┬──────┬──────┐
//!   │ b0   │ b1   │ b2 ◄─┼─ index (advances once per clock tick)
//!   └──────┴──────┴──────┴──────┘
//!   Auto slice:   spend credit, then the current bucket
//!   Forced slice: work now, bank it as credit
//! ```
//!
//! With `O = sum(ring) - credit`, a slice that adds `p` and performs
//! `p_done` leaves `O + p - p_done`. Unperformed work goes back to the credit
//! or the ring, so nothing is lost.

use crate::config::MAX_MAJOR_WINDOW;
use crate::error::{MgcError, Result};
use crate::gc::Phase;
use serde::Serialize;

/// How much work a slice should do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SliceRequest {
    /// Triggered by the minor heap: spend the current bucket
    Auto,
    /// Forced, sized like the next bucket
    Compute,
    /// Forced, enough work to free about this many words
    Manual(usize),
}

impl SliceRequest {
    /// Decode the integer convention: -1 auto, 0 compute, n manual
    pub fn from_howmuch(howmuch: isize) -> Self {
        match howmuch {
            h if h < 0 => SliceRequest::Auto,
            0 => SliceRequest::Compute,
            n => SliceRequest::Manual(n as usize),
        }
    }

    pub fn howmuch(self) -> isize {
        match self {
            SliceRequest::Auto => -1,
            SliceRequest::Compute => 0,
            SliceRequest::Manual(n) => n as isize,
        }
    }
}

/// Inputs of the raw work proportion
#[derive(Debug, Clone, Copy, Default)]
pub struct PacingInputs {
    pub allocated_words: usize,
    pub heap_wsz: usize,
    pub percent_free: usize,
    pub dependent_allocated: usize,
    pub dependent_size: usize,
    pub extra_heap_resources: f64,
    pub max_slice_proportion: f64,
}

/// Proportion of a cycle earned since the last slice, clamped
///
/// Free memory at cycle start is `heap * pf / (100 + pf)`, two thirds of
/// it garbage; allocating that much garbage earns one whole cycle.
pub fn raw_proportion(inputs: &PacingInputs) -> f64 {
    let pf = inputs.percent_free.max(1) as f64;
    let heap = inputs.heap_wsz.max(1) as f64;

    let mut p = inputs.allocated_words as f64 * 3.0 * (100.0 + pf) / heap / pf / 2.0;
    let dp = if inputs.dependent_size > 0 {
        inputs.dependent_allocated as f64 * (100.0 + pf) / inputs.dependent_size as f64 / pf
    } else {
        0.0
    };
    p = p.max(dp).max(inputs.extra_heap_resources);
    p.min(inputs.max_slice_proportion)
}

/// Proportion of a cycle needed to free about `words` words
pub fn manual_proportion(words: usize, heap_wsz: usize, percent_free: usize) -> f64 {
    let pf = percent_free.max(1) as f64;
    words as f64 * 3.0 * (100.0 + pf) / heap_wsz.max(1) as f64 / pf / 2.0
}

/// Pacing ring, credit and clock
#[derive(Debug, Clone)]
pub struct Pacer {
    ring: [f64; MAX_MAJOR_WINDOW],
    window: usize,
    index: usize,
    work_credit: f64,
    gc_clock: f64,
}

impl Pacer {
    pub fn new(window: usize) -> Result<Self> {
        Self::check_window(window)?;
        Ok(Self {
            ring: [0.0; MAX_MAJOR_WINDOW],
            window,
            index: 0,
            work_credit: 0.0,
            gc_clock: 0.0,
        })
    }

    fn check_window(window: usize) -> Result<()> {
        if window == 0 || window > MAX_MAJOR_WINDOW {
            return Err(MgcError::InvalidArgument(format!(
                "major window must be between 1 and {}, got {}",
                MAX_MAJOR_WINDOW, window
            )));
        }
        Ok(())
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn work_credit(&self) -> f64 {
        self.work_credit
    }

    pub fn gc_clock(&self) -> f64 {
        self.gc_clock
    }

    /// Buckets of the active window
    pub fn buckets(&self) -> &[f64] {
        &self.ring[..self.window]
    }

    /// Work owed, net of credit already performed
    pub fn outstanding(&self) -> f64 {
        self.buckets().iter().sum::<f64>() - self.work_credit
    }

    /// Add `fraction` of a clock tick
    pub fn advance_clock(&mut self, fraction: f64) {
        self.gc_clock += fraction;
    }

    /// Spread `p` over the window, then move to the next bucket if a tick
    /// has elapsed
    pub fn distribute(&mut self, p: f64) {
        let share = p / self.window as f64;
        for bucket in &mut self.ring[..self.window] {
            *bucket += share;
        }

        if self.gc_clock >= 1.0 {
            self.gc_clock -= 1.0;
            self.index += 1;
            if self.index >= self.window {
                self.index = 0;
            }
        }
    }

    /// Smoothed proportion to perform for `request`
    ///
    /// `manual_p` is the proportion a `Manual` request stands for.
    pub fn filter(&mut self, request: SliceRequest, manual_p: f64) -> f64 {
        match request {
            SliceRequest::Auto => {
                let current = self.ring[self.index];
                let spend = self.work_credit.min(current);
                self.work_credit -= spend;
                self.ring[self.index] = 0.0;
                current - spend
            },
            SliceRequest::Compute | SliceRequest::Manual(_) => {
                let filt_p = match request {
                    SliceRequest::Compute => self.ring[(self.index + 1) % self.window],
                    _ => manual_p,
                };
                self.work_credit += filt_p;
                filt_p
            },
        }
    }

    /// Return work that was scheduled but not performed
    ///
    /// Taken back from the credit first; any remainder is spread over the
    /// window.
    pub fn give_back(&mut self, undone: f64) {
        let spend = undone.min(self.work_credit);
        self.work_credit -= spend;
        if undone > spend {
            let share = (undone - spend) / self.window as f64;
            for bucket in &mut self.ring[..self.window] {
                *bucket += share;
            }
        }
    }

    /// Resize the window, keeping the total in the ring
    pub fn set_window(&mut self, window: usize) -> Result<()> {
        Self::check_window(window)?;
        if window == self.window {
            return Ok(());
        }

        let total: f64 = self.buckets().iter().sum();
        let share = total / window as f64;
        for (i, bucket) in self.ring.iter_mut().enumerate() {
            *bucket = if i < window { share } else { 0.0 };
        }
        self.window = window;
        if self.index >= window {
            self.index = 0;
        }
        Ok(())
    }
}

/// What one call to `major_slice` did
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliceReport {
    pub request: SliceRequest,
    /// Proportion earned since the last slice, after clamping
    pub raw_p: f64,
    /// Proportion scheduled after smoothing
    pub filtered_p: f64,
    /// Word budget handed to the mark or sweep engine
    pub computed_work: i64,
    /// Proportion actually performed
    pub p_done: f64,
    /// Words of work performed
    pub work_done: i64,
    pub phase_before: Phase,
    pub phase_after: Phase,
}
