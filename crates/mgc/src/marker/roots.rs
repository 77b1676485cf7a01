//! Root Scanning - starting points of marking
//!
//! A cycle begins with [`RootSet::start`] on every root set, which darkens
//! the roots that must be handled at once. Incremental roots are then
//! darkened a few at a time by [`RootSet::darken_slice`] during the Roots
//! subphase, which ends when a slice reports less work than it was offered.

use crate::object::Value;

/// A source of roots
pub trait RootSet {
    /// Begin a cycle: darken non-incremental roots and rewind the cursor
    fn start(&mut self, darken: &mut dyn FnMut(Value));

    /// Darken up to `budget` incremental roots; returns the work done
    fn darken_slice(&mut self, budget: isize, darken: &mut dyn FnMut(Value)) -> isize;

    /// Roots handled incrementally, for pacing
    fn incremental_roots_count(&self) -> usize;
}

/// Handle returned by [`GlobalRoots::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(usize);

/// Registered global roots, darkened incrementally
#[derive(Debug, Default)]
pub struct GlobalRoots {
    roots: Vec<(RootId, Value)>,
    next_id: usize,
    cursor: usize,
}

impl GlobalRoots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, v: Value) -> RootId {
        let id = RootId(self.next_id);
        self.next_id += 1;
        self.roots.push((id, v));
        id
    }

    /// Remove one registration of `v`; returns whether one existed
    pub fn unregister(&mut self, v: Value) -> bool {
        match self.roots.iter().position(|&(_, root)| root == v) {
            Some(index) => {
                self.remove_at(index);
                true
            },
            None => false,
        }
    }

    pub fn unregister_id(&mut self, id: RootId) -> bool {
        match self.roots.iter().position(|&(root_id, _)| root_id == id) {
            Some(index) => {
                self.remove_at(index);
                true
            },
            None => false,
        }
    }

    fn remove_at(&mut self, index: usize) {
        self.roots.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
    }

    pub fn contains(&self, v: Value) -> bool {
        self.roots.iter().any(|&(_, root)| root == v)
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.roots.iter().map(|&(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl RootSet for GlobalRoots {
    fn start(&mut self, _darken: &mut dyn FnMut(Value)) {
        self.cursor = 0;
    }

    fn darken_slice(&mut self, budget: isize, darken: &mut dyn FnMut(Value)) -> isize {
        let mut done = 0;
        while done < budget && self.cursor < self.roots.len() {
            darken(self.roots[self.cursor].1);
            self.cursor += 1;
            done += 1;
        }
        done
    }

    fn incremental_roots_count(&self) -> usize {
        self.roots.len()
    }
}

/// Several root sets seen as one, slices visiting them in order
pub struct RootChain<'a> {
    sets: Vec<&'a mut dyn RootSet>,
    current: usize,
}

impl<'a> RootChain<'a> {
    pub fn new(sets: Vec<&'a mut dyn RootSet>) -> Self {
        Self { sets, current: 0 }
    }
}

impl RootSet for RootChain<'_> {
    fn start(&mut self, darken: &mut dyn FnMut(Value)) {
        self.current = 0;
        for set in self.sets.iter_mut() {
            set.start(darken);
        }
    }

    fn darken_slice(&mut self, budget: isize, darken: &mut dyn FnMut(Value)) -> isize {
        let mut done = 0;
        while done < budget {
            let Some(set) = self.sets.get_mut(self.current) else {
                break;
            };
            let remaining = budget - done;
            let work = set.darken_slice(remaining, darken);
            done += work;
            if work < remaining {
                self.current += 1;
            }
        }
        done
    }

    fn incremental_roots_count(&self) -> usize {
        self.sets.iter().map(|set| set.incremental_roots_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(i: usize) -> Value {
        Value::from_raw(0x1000 + i * 16)
    }

    #[test]
    fn test_incremental_slices() {
        let mut roots = GlobalRoots::new();
        for i in 0..5 {
            roots.register(v(i));
        }
        let mut seen = Vec::new();
        roots.start(&mut |r| seen.push(r));
        assert!(seen.is_empty());

        assert_eq!(roots.darken_slice(3, &mut |r| seen.push(r)), 3);
        assert_eq!(roots.darken_slice(3, &mut |r| seen.push(r)), 2);
        assert_eq!(seen, (0..5).map(v).collect::<Vec<_>>());
        assert_eq!(roots.incremental_roots_count(), 5);
    }

    #[test]
    fn test_unregister_keeps_cursor_consistent() {
        let mut roots = GlobalRoots::new();
        let first = roots.register(v(0));
        roots.register(v(1));
        roots.register(v(2));
        roots.start(&mut |_| {});
        roots.darken_slice(2, &mut |_| {});
        assert!(roots.unregister_id(first));
        let mut seen = Vec::new();
        roots.darken_slice(10, &mut |r| seen.push(r));
        assert_eq!(seen, vec![v(2)]);
        assert!(!roots.unregister(v(7)));
    }

    #[test]
    fn test_chain_spans_sets() {
        let mut a = GlobalRoots::new();
        let mut b = GlobalRoots::new();
        a.register(v(0));
        b.register(v(1));
        b.register(v(2));
        let mut chain = RootChain::new(vec![&mut a as &mut dyn RootSet, &mut b]);
        chain.start(&mut |_| {});
        let mut seen = Vec::new();
        assert_eq!(chain.darken_slice(2, &mut |r| seen.push(r)), 2);
        assert_eq!(chain.darken_slice(5, &mut |r| seen.push(r)), 1);
        assert_eq!(seen, vec![v(0), v(1), v(2)]);
        assert_eq!(chain.incremental_roots_count(), 3);
    }
}
