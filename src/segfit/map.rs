//! Size-class mapper. The core implementation of `SegFit::acquire`'s size
//! rounding and the free list selection.
use super::block::{ALIGNMENT, MIN_BLOCK_SIZE, TAGS};

/// The number of free lists.
pub const LIST_COUNT: usize = 25;

/// Calculate the size of the block needed to hold a payload of `request`
/// bytes. Returns `None` if the result isn't representable.
#[inline]
pub fn adjusted_size(request: usize) -> Option<usize> {
    // The space between the tags of a minimum-size block
    if request <= MIN_BLOCK_SIZE - TAGS {
        Some(MIN_BLOCK_SIZE)
    } else {
        let size = request.checked_add(TAGS)?;
        Some(size.checked_add(ALIGNMENT - 1)? & !(ALIGNMENT - 1))
    }
}

/// Find the free list to store a free block of the specified size.
///
/// List `i` holds sizes in `2^i..2^(i + 1)`. The last list holds everything
/// larger.
#[inline]
pub fn list_index(size: usize) -> usize {
    if size == 0 {
        return 0;
    }

    // `floor(log2(size))`, the number of halvings until `size` collapses into
    // a single bit
    let log2 = (usize::BITS - 1 - size.leading_zeros()) as usize;
    log2.min(LIST_COUNT - 1)
}
