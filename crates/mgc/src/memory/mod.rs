//! Memory Operations - raw word access into heap memory
//!
//! The collector addresses memory as machine words. Everything that
//! dereferences an address funnels through this module.
//!
//! # Safety
//!
//! The functions here are `unsafe` because they operate on raw memory
//! addresses. The caller must ensure that:
//! - Addresses are word aligned
//! - Addresses lie inside a live chunk, a registered young area or static data
//! - Ranges do not extend past the end of the mapping they start in

use std::ptr;

/// Size of a machine word in bytes
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

static_assertions::const_assert_eq!(WORD_SIZE, 8);

/// Words to bytes
#[inline]
pub const fn bsize_wsize(words: usize) -> usize {
    words * WORD_SIZE
}

/// Bytes to words (rounding down)
#[inline]
pub const fn wsize_bsize(bytes: usize) -> usize {
    bytes / WORD_SIZE
}

/// Read one word
///
/// # Safety
///
/// `addr` must be aligned and valid for reads of one word.
#[inline]
pub unsafe fn read_word(addr: usize) -> usize {
    debug_assert!(addr % WORD_SIZE == 0, "misaligned read at {:#x}", addr);
    ptr::read(addr as *const usize)
}

/// Write one word
///
/// # Safety
///
/// `addr` must be aligned and valid for writes of one word.
#[inline]
pub unsafe fn write_word(addr: usize, word: usize) {
    debug_assert!(addr % WORD_SIZE == 0, "misaligned write at {:#x}", addr);
    ptr::write(addr as *mut usize, word);
}

/// Fill `words` words starting at `addr` with `word`
///
/// # Safety
///
/// The whole range must be valid for writes.
#[inline]
pub unsafe fn fill_words(addr: usize, words: usize, word: usize) {
    let base = addr as *mut usize;
    for i in 0..words {
        ptr::write(base.add(i), word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_roundtrip() {
        let mut buffer = [0usize; 4];
        let base = buffer.as_mut_ptr() as usize;
        unsafe {
            write_word(base + WORD_SIZE, 0xdead_beef);
            assert_eq!(read_word(base + WORD_SIZE), 0xdead_beef);
            fill_words(base, 4, 7);
        }
        assert_eq!(buffer, [7, 7, 7, 7]);
    }

    #[test]
    fn test_size_conversions() {
        assert_eq!(bsize_wsize(3), 24);
        assert_eq!(wsize_bsize(25), 3);
    }
}
