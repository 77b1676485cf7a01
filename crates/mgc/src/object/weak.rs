//! Weak Arrays
//!
//! A weak array is an ordinary heap block tagged `ABSTRACT`, so marking never
//! traces through it. Field 0 links it into the collector's weak list and
//! fields 1.. are the weak slots. An empty slot holds [`Value::NULL`].
//!
//! The mark engine walks the list twice per cycle:
//! - Weak1 clears slots whose referent is white (and not young)
//! - Weak2 unlinks arrays that are themselves white

use super::value::Value;

/// Position in the weak list: the slot holding the next array pointer
///
/// Either the list head owned by the collector, or field 0 of an array
/// already visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakCursor {
    Head,
    Link(Value),
}

impl WeakCursor {
    /// The array the cursor designates, or `NULL` at the end of the list
    ///
    /// # Safety
    ///
    /// For `Link(v)`, `v` must be a live weak array.
    #[inline]
    pub unsafe fn load(self, head: Value) -> Value {
        match self {
            WeakCursor::Head => head,
            WeakCursor::Link(array) => array.field(0),
        }
    }

    /// Overwrite the slot the cursor designates
    ///
    /// # Safety
    ///
    /// For `Link(v)`, `v` must be a live weak array.
    #[inline]
    pub unsafe fn store(self, head: &mut Value, next: Value) {
        match self {
            WeakCursor::Head => *head = next,
            WeakCursor::Link(array) => array.set_field(0, next),
        }
    }
}

/// Per-cycle weak processing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeakStats {
    pub slots_cleared: u64,
    pub arrays_unlinked: u64,
}
