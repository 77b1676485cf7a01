//! Gray Worklist - blocks colored gray and waiting to be scanned
//!
//! A stack with an explicit capacity. When a push fills it, the stack either
//! doubles (while small relative to the heap) or drops its upper half and
//! marks the heap impure. Dropped entries stay gray in the heap, so a later
//! heap-order scan finds them again.
//!
//! ```text
//! push ──► [ v0 v1 v2 ... v(cap-1) ] full?
//!                │
//!                ├─ cap < heap_wsz / ratio ──► double capacity
//!                └─ otherwise ─────────────► keep cap/2 entries, heap impure
//! ```

use crate::error::{MgcError, Result};
use crate::object::Value;

/// What happened to the worklist on the last push that filled it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrayResize {
    Grown { capacity: usize },
    /// Growth was refused; the whole stack was dropped
    GrowthFailed,
    /// Upper half dropped
    Halved { capacity: usize },
}

/// The gray worklist
#[derive(Debug)]
pub struct GrayVals {
    vals: Vec<Value>,
    capacity: usize,
    heap_ratio: usize,
    /// No gray block exists outside this stack
    heap_is_pure: bool,
    growths: u64,
    overflows: u64,
}

impl GrayVals {
    /// Reserve the initial stack
    ///
    /// Failure here is fatal for the collector.
    pub fn new(capacity: usize, heap_ratio: usize) -> Result<Self> {
        let capacity = capacity.max(2);
        let mut vals = Vec::new();
        vals.try_reserve_exact(capacity)
            .map_err(|_| MgcError::GrayStackAllocation { entries: capacity })?;
        Ok(Self {
            vals,
            capacity,
            heap_ratio: heap_ratio.max(1),
            heap_is_pure: true,
            growths: 0,
            overflows: 0,
        })
    }

    /// Push a block just colored gray
    ///
    /// Returns how the stack was resized if this push filled it.
    #[inline]
    pub fn push(&mut self, v: Value, heap_wsz: usize) -> Option<GrayResize> {
        self.vals.push(v);
        if self.vals.len() >= self.capacity {
            Some(self.grow_or_degrade(heap_wsz))
        } else {
            None
        }
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Value> {
        self.vals.pop()
    }

    /// Make room after the stack filled up
    pub fn grow_or_degrade(&mut self, heap_wsz: usize) -> GrayResize {
        if self.capacity < heap_wsz / self.heap_ratio {
            let additional = 2 * self.capacity - self.vals.len();
            match self.vals.try_reserve_exact(additional) {
                Ok(()) => {
                    self.capacity *= 2;
                    self.growths += 1;
                    log::debug!("Growing gray_vals to {} entries", self.capacity);
                    GrayResize::Grown {
                        capacity: self.capacity,
                    }
                },
                Err(_) => {
                    log::warn!("No room for growing gray_vals");
                    self.vals.clear();
                    self.heap_is_pure = false;
                    self.overflows += 1;
                    GrayResize::GrowthFailed
                },
            }
        } else {
            self.vals.truncate(self.capacity / 2);
            self.heap_is_pure = false;
            self.overflows += 1;
            log::warn!(
                "gray_vals overflow at {} entries, heap of {} words will be rescanned",
                self.capacity,
                heap_wsz
            );
            GrayResize::Halved {
                capacity: self.capacity,
            }
        }
    }

    /// Times the stack doubled
    pub fn growths(&self) -> u64 {
        self.growths
    }

    /// Times the stack dropped entries
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vals.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn heap_is_pure(&self) -> bool {
        self.heap_is_pure
    }

    pub fn set_heap_is_pure(&mut self, pure: bool) {
        self.heap_is_pure = pure;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.vals.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(i: usize) -> Value {
        Value::from_raw(0x1000 + i * 16)
    }

    #[test]
    fn test_lifo() {
        let mut gray = GrayVals::new(8, 32).unwrap();
        gray.push(v(1), 1 << 20);
        gray.push(v(2), 1 << 20);
        assert_eq!(gray.pop(), Some(v(2)));
        assert_eq!(gray.pop(), Some(v(1)));
        assert_eq!(gray.pop(), None);
        assert!(gray.heap_is_pure());
    }

    #[test]
    fn test_doubles_while_small() {
        let mut gray = GrayVals::new(4, 32).unwrap();
        let heap_wsz = 32 * 64;
        for i in 0..3 {
            assert_eq!(gray.push(v(i), heap_wsz), None);
        }
        assert_eq!(
            gray.push(v(3), heap_wsz),
            Some(GrayResize::Grown { capacity: 8 })
        );
        assert_eq!(gray.len(), 4);
        assert!(gray.heap_is_pure());
    }

    #[test]
    fn test_halves_when_large() {
        let mut gray = GrayVals::new(4, 32).unwrap();
        // capacity 4 is not below 100 / 32
        for i in 0..3 {
            gray.push(v(i), 100);
        }
        assert_eq!(
            gray.push(v(3), 100),
            Some(GrayResize::Halved { capacity: 4 })
        );
        assert_eq!(gray.len(), 2);
        assert!(!gray.heap_is_pure());
        assert_eq!(gray.overflows(), 1);
        assert_eq!(gray.growths(), 0);
    }
}
