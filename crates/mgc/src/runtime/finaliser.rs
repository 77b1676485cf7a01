//! Finaliser - closures run once their value becomes unreachable
//!
//! Registered values are not roots. At the end of the Weak1 subphase,
//! [`Finaliser::update`] moves every registered value that is still white to
//! the to-do list and darkens it, so it survives this cycle. To-do values are
//! roots until their closure has run. Closures never run inside a slice;
//! the mutator calls [`Finaliser::take_pending`] and runs them afterwards.

use crate::marker::RootSet;
use crate::object::Value;

/// Closure attached to a value
pub type FinaliseFn = Box<dyn FnOnce(Value) + Send>;

struct Entry {
    value: Value,
    action: FinaliseFn,
}

/// Finalisation tables of one collector
#[derive(Default)]
pub struct Finaliser {
    registered: Vec<Entry>,
    todo: Vec<Entry>,
}

impl Finaliser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `action` to the heap block `value`
    pub fn register<F>(&mut self, value: Value, action: F)
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.registered.push(Entry {
            value,
            action: Box::new(action),
        });
    }

    /// Move white registered values to the to-do list
    ///
    /// # Safety
    ///
    /// Every registered value must still be a readable heap block.
    pub unsafe fn update(&mut self, darken: &mut dyn FnMut(Value)) -> usize {
        let mut kept = Vec::with_capacity(self.registered.len());
        let mut moved = 0;
        for entry in self.registered.drain(..) {
            if entry.value.header().is_white() {
                self.todo.push(entry);
                moved += 1;
            } else {
                kept.push(entry);
            }
        }
        self.registered = kept;

        for entry in &self.todo {
            darken(entry.value);
        }
        if moved > 0 {
            log::debug!("{} finalisers scheduled", moved);
        }
        moved
    }

    /// Remove the closures ready to run
    pub fn take_pending(&mut self) -> Vec<(Value, FinaliseFn)> {
        self.todo
            .drain(..)
            .map(|entry| (entry.value, entry.action))
            .collect()
    }

    pub fn registered_len(&self) -> usize {
        self.registered.len()
    }

    pub fn pending_len(&self) -> usize {
        self.todo.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.todo.is_empty()
    }
}

impl RootSet for Finaliser {
    fn start(&mut self, darken: &mut dyn FnMut(Value)) {
        for entry in &self.todo {
            darken(entry.value);
        }
    }

    fn darken_slice(&mut self, _budget: isize, _darken: &mut dyn FnMut(Value)) -> isize {
        0
    }

    fn incremental_roots_count(&self) -> usize {
        0
    }
}

impl std::fmt::Debug for Finaliser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finaliser")
            .field("registered", &self.registered.len())
            .field("todo", &self.todo.len())
            .finish()
    }
}
