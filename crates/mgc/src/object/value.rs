//! Value - the tagged machine word manipulated by the mutator
//!
//! Odd words are immediate integers. Even non-null words point at the first
//! field of a block; the header sits one word below.

use super::header::Header;
use crate::memory::{read_word, write_word, WORD_SIZE};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Value(usize);

impl Value {
    /// End of a weak list, and the contents of an empty weak slot
    pub const NULL: Value = Value(0);
    pub const UNIT: Value = Value::of_int(0);

    #[inline]
    pub const fn from_raw(word: usize) -> Self {
        Value(word)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn of_int(n: isize) -> Self {
        Value(((n as usize) << 1) | 1)
    }

    #[inline]
    pub const fn to_int(self) -> isize {
        (self.0 as isize) >> 1
    }

    #[inline]
    pub const fn is_int(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline]
    pub const fn is_block(self) -> bool {
        self.0 & 1 == 0 && self.0 != 0
    }

    /// The value whose header lives at `hp`
    #[inline]
    pub const fn from_hp(hp: usize) -> Self {
        Value(hp + WORD_SIZE)
    }

    /// Address of this block's header
    #[inline]
    pub const fn hp(self) -> usize {
        self.0 - WORD_SIZE
    }

    /// Address of field `i`
    #[inline]
    pub const fn field_addr(self, i: usize) -> usize {
        self.0 + i * WORD_SIZE
    }

    /// Move back by `bytes` (infix pointer to enclosing block)
    #[inline]
    pub const fn sub_bytes(self, bytes: usize) -> Self {
        Value(self.0 - bytes)
    }

    /// # Safety
    ///
    /// `self` must be a block whose header is readable.
    #[inline]
    pub unsafe fn header(self) -> Header {
        Header::from_raw(read_word(self.hp()))
    }

    /// # Safety
    ///
    /// `self` must be a block whose header is writable.
    #[inline]
    pub unsafe fn set_header(self, header: Header) {
        write_word(self.hp(), header.raw())
    }

    /// # Safety
    ///
    /// `self` must be a block with more than `i` fields.
    #[inline]
    pub unsafe fn field(self, i: usize) -> Value {
        Value(read_word(self.field_addr(i)))
    }

    /// # Safety
    ///
    /// `self` must be a block with more than `i` fields.
    #[inline]
    pub unsafe fn set_field(self, i: usize, v: Value) {
        write_word(self.field_addr(i), v.0)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_int() {
            write!(f, "Int({})", self.to_int())
        } else {
            write!(f, "Block({:#x})", self.0)
        }
    }
}
