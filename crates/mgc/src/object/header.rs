//! Object Header - the word preceding every heap block
//!
//! Header Layout (64-bit):
//! ┌──────────────────────┬───────────────────────┬───────┬─────────┐
//! │   Profinfo (26 bits) │   Size in words (28)  │ Color │   Tag   │
//! │        63-38         │         37-10         │  9-8  │   7-0   │
//! └──────────────────────┴───────────────────────┴───────┴─────────┘
//!
//! Colors:
//! - White (00): not yet reached in this cycle, or garbage during sweep
//! - Gray  (01): reached, fields still to be scanned
//! - Blue  (10): free-list block
//! - Black (11): reached and scanned
//!
//! The raw layout never leaves this module; everything else goes through
//! [`Header`] accessors.

use crate::memory::WORD_SIZE;
use serde::Serialize;

/// Tag bits
pub const TAG_BITS: u32 = 8;
/// Color bits
pub const COLOR_SHIFT: u32 = 8;
pub const COLOR_BITS: u32 = 2;
/// Size bits start above the color
pub const WOSIZE_SHIFT: u32 = COLOR_SHIFT + COLOR_BITS;
/// Profinfo bits occupy the top of the word
pub const PROFINFO_WIDTH: u32 = 26;
pub const PROFINFO_SHIFT: u32 = usize::BITS - PROFINFO_WIDTH;
pub const WOSIZE_BITS: u32 = PROFINFO_SHIFT - WOSIZE_SHIFT;

const TAG_MASK: usize = (1 << TAG_BITS) - 1;
const COLOR_MASK: usize = ((1 << COLOR_BITS) - 1) << COLOR_SHIFT;
const WOSIZE_MASK: usize = ((1 << WOSIZE_BITS) - 1) << WOSIZE_SHIFT;

/// Largest profinfo value a header can hold
pub const PROFINFO_MASK: u64 = (1 << PROFINFO_WIDTH) - 1;

/// Largest block size in words
pub const MAX_WOSIZE: usize = (1 << WOSIZE_BITS) - 1;

/// Decoded profinfo of a header without profiling information
pub const NO_PROFINFO: u64 = 0;

/// Tags with special meaning to the collector
pub mod tag {
    pub const LAZY: u8 = 246;
    pub const CLOSURE: u8 = 247;
    pub const OBJECT: u8 = 248;
    pub const INFIX: u8 = 249;
    pub const FORWARD: u8 = 250;
    /// Tags at or above this value have no scannable fields
    pub const NO_SCAN: u8 = 251;
    pub const ABSTRACT: u8 = 251;
    pub const STRING: u8 = 252;
    pub const DOUBLE: u8 = 253;
    pub const DOUBLE_ARRAY: u8 = 254;
    pub const CUSTOM: u8 = 255;
}

/// Tri-color marking state, plus Blue for free blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Color {
    White = 0,
    Gray = 1,
    Blue = 2,
    Black = 3,
}

impl Color {
    const ALL: [Color; 4] = [Color::White, Color::Gray, Color::Blue, Color::Black];

    /// One-letter code used in heap dumps
    pub fn code(self) -> &'static str {
        match self {
            Color::White => "w",
            Color::Gray => "g",
            Color::Blue => "u",
            Color::Black => "b",
        }
    }
}

/// A block header
///
/// One machine word encoding tag, color, size and profinfo.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Header(usize);

static_assertions::assert_eq_size!(Header, usize);

/// The fields of a header, decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFields {
    pub tag: u8,
    pub color: Color,
    pub wosize: usize,
    /// `None` when the block carries no profiling information
    pub profinfo: Option<u64>,
}

impl Header {
    /// Build a header without profiling information
    #[inline]
    pub const fn make(wosize: usize, tag: u8, color: Color) -> Self {
        Header(
            ((wosize << WOSIZE_SHIFT) & WOSIZE_MASK)
                | ((color as usize) << COLOR_SHIFT)
                | tag as usize,
        )
    }

    /// Build a header carrying `profinfo`
    #[inline]
    pub const fn make_with_profinfo(wosize: usize, tag: u8, color: Color, profinfo: u64) -> Self {
        Self::make(wosize, tag, color).with_profinfo(profinfo)
    }

    #[inline]
    pub const fn from_raw(word: usize) -> Self {
        Header(word)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn tag(self) -> u8 {
        (self.0 & TAG_MASK) as u8
    }

    #[inline]
    pub fn color(self) -> Color {
        Color::ALL[(self.0 & COLOR_MASK) >> COLOR_SHIFT]
    }

    /// Size in words, excluding the header
    #[inline]
    pub const fn wosize(self) -> usize {
        (self.0 & WOSIZE_MASK) >> WOSIZE_SHIFT
    }

    /// Size in words, including the header
    #[inline]
    pub const fn whsize(self) -> usize {
        self.wosize() + 1
    }

    /// Size in bytes, including the header
    #[inline]
    pub const fn bhsize(self) -> usize {
        self.whsize() * WORD_SIZE
    }

    /// Raw profinfo bits; `NO_PROFINFO` when none was recorded
    #[inline]
    pub const fn profinfo(self) -> u64 {
        (self.0 >> PROFINFO_SHIFT) as u64
    }

    #[inline]
    pub const fn with_color(self, color: Color) -> Self {
        Header((self.0 & !COLOR_MASK) | ((color as usize) << COLOR_SHIFT))
    }

    /// Replace the profinfo bits, truncating `profinfo` to the field width
    #[inline]
    pub const fn with_profinfo(self, profinfo: u64) -> Self {
        let keep = self.0 & !((PROFINFO_MASK as usize) << PROFINFO_SHIFT);
        Header(keep | (((profinfo & PROFINFO_MASK) as usize) << PROFINFO_SHIFT))
    }

    #[inline]
    pub fn is_white(self) -> bool {
        self.color() == Color::White
    }

    #[inline]
    pub fn is_gray(self) -> bool {
        self.color() == Color::Gray
    }

    #[inline]
    pub fn is_black(self) -> bool {
        self.color() == Color::Black
    }

    #[inline]
    pub fn is_blue(self) -> bool {
        self.color() == Color::Blue
    }

    /// Whether the fields of the block hold values to trace
    #[inline]
    pub const fn is_scannable(self) -> bool {
        self.tag() < tag::NO_SCAN
    }

    /// For an infix header, the distance in bytes back to the enclosing block
    #[inline]
    pub const fn infix_offset(self) -> usize {
        self.wosize() * WORD_SIZE
    }

    pub fn decode(self) -> HeaderFields {
        let profinfo = self.profinfo();
        HeaderFields {
            tag: self.tag(),
            color: self.color(),
            wosize: self.wosize(),
            profinfo: (profinfo != NO_PROFINFO).then_some(profinfo),
        }
    }
}

impl HeaderFields {
    pub fn encode(&self) -> Header {
        Header::make_with_profinfo(
            self.wosize,
            self.tag,
            self.color,
            self.profinfo.unwrap_or(NO_PROFINFO),
        )
    }
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("tag", &self.tag())
            .field("color", &self.color())
            .field("wosize", &self.wosize())
            .field("profinfo", &format_args!("{:#x}", self.profinfo()))
            .finish()
    }
}
