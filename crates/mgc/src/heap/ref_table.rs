//! Ref Table - major-heap fields that point into the young area
//!
//! The minor collector treats every recorded field as a root. The major
//! collector only adds to it: when a write barrier stores a young pointer
//! into the heap, or when marking short-circuits a forward block and the
//! target turns out to be young.

/// Addresses of fields holding young pointers
#[derive(Debug, Default, Clone)]
pub struct RefTable {
    fields: Vec<usize>,
}

impl RefTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, field_addr: usize) {
        self.fields.push(field_addr);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field_addr: usize) -> bool {
        self.fields.contains(&field_addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.fields.iter().copied()
    }

    /// Empty the table, as the minor collector does after promotion
    pub fn clear(&mut self) {
        self.fields.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_clear() {
        let mut table = RefTable::new();
        table.add(0x1008);
        table.add(0x2010);
        assert!(table.contains(0x2010));
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![0x1008, 0x2010]);
        table.clear();
        assert!(table.is_empty());
    }
}
