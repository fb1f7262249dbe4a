//! Boundary tags. Everything that reads or writes heap metadata goes through
//! [`Block`].
use core::{mem, ptr::NonNull};

/// The size of a boundary tag (and of a free list link).
pub(super) const WORD: usize = mem::size_of::<usize>();

/// The size of a header and a footer together.
pub(super) const TAGS: usize = WORD * 2;

/// The alignment of every payload address and every block size.
pub const ALIGNMENT: usize = 8;

/// The smallest block: a header, a footer, and the two free list links.
pub const MIN_BLOCK_SIZE: usize = WORD * 4;

/// The bit of a tag indicating whether the block is allocated.
const TAG_ALLOCATED: usize = 1;
/// The bits of a tag representing the block size.
const TAG_SIZE_MASK: usize = !(ALIGNMENT - 1);

const _: () = assert!(TAGS % ALIGNMENT == 0);
const _: () = assert!(MIN_BLOCK_SIZE % ALIGNMENT == 0);

/// Encode a boundary tag.
#[inline]
pub(super) const fn pack(size: usize, allocated: bool) -> usize {
    debug_assert!(size & !TAG_SIZE_MASK == 0);
    size | allocated as usize
}

/// A block, identified by its payload address.
///
/// ```text
///            payload
///               v
///   +--------+--------+--------+-- ... --+--------+
///   | header |  pred  |  succ  |         | footer |
///   +--------+--------+--------+-- ... --+--------+
///   |<----------------- size ---------------------->|
/// ```
///
/// `pred` and `succ` are only meaningful while the block is free.
///
/// All methods are `unsafe`: the caller must ensure the payload address
/// denotes a block of the heap (or a sentinel) whose tags are up to date,
/// and that no reference to the accessed words is alive.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Block(NonNull<u8>);

impl Block {
    #[inline]
    pub fn from_payload(payload: NonNull<u8>) -> Self {
        Self(payload)
    }

    #[inline]
    pub fn payload(self) -> NonNull<u8> {
        self.0
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    fn hdr(self) -> *mut usize {
        self.0.as_ptr().wrapping_sub(WORD).cast()
    }

    #[inline]
    unsafe fn ftr(self) -> *mut usize {
        self.0.as_ptr().add(self.size()).sub(TAGS).cast()
    }

    /// The raw header word.
    #[inline]
    pub unsafe fn header(self) -> usize {
        self.hdr().read()
    }

    /// The raw footer word.
    #[inline]
    pub unsafe fn footer(self) -> usize {
        self.ftr().read()
    }

    #[inline]
    pub unsafe fn size(self) -> usize {
        self.header() & TAG_SIZE_MASK
    }

    #[inline]
    pub unsafe fn is_allocated(self) -> bool {
        (self.header() & TAG_ALLOCATED) != 0
    }

    /// Write both tags. The footer is placed according to `size`, not the
    /// current header.
    #[inline]
    pub unsafe fn set_tags(self, size: usize, allocated: bool) {
        let tag = pack(size, allocated);
        self.hdr().write(tag);
        self.0.as_ptr().add(size).sub(TAGS).cast::<usize>().write(tag);
    }

    /// Write the header only. Used for the epilogue, which has no footer.
    #[inline]
    pub unsafe fn set_header(self, size: usize, allocated: bool) {
        self.hdr().write(pack(size, allocated));
    }

    /// The block immediately following this one.
    #[inline]
    pub unsafe fn next(self) -> Block {
        Block(NonNull::new_unchecked(self.0.as_ptr().add(self.size())))
    }

    /// Whether the block immediately preceding this one is allocated,
    /// according to its footer.
    #[inline]
    pub unsafe fn is_prev_allocated(self) -> bool {
        (self.prev_footer() & TAG_ALLOCATED) != 0
    }

    /// The block immediately preceding this one.
    #[inline]
    pub unsafe fn prev(self) -> Block {
        let prev_size = self.prev_footer() & TAG_SIZE_MASK;
        Block(NonNull::new_unchecked(self.0.as_ptr().sub(prev_size)))
    }

    #[inline]
    unsafe fn prev_footer(self) -> usize {
        self.0.as_ptr().sub(TAGS).cast::<usize>().read()
    }

    #[inline]
    fn link(self, i: usize) -> *mut Option<Block> {
        self.0.as_ptr().wrapping_add(WORD * i).cast()
    }

    /// The previous (smaller) block in the same free list.
    #[inline]
    pub unsafe fn pred(self) -> Option<Block> {
        self.link(0).read()
    }

    /// The next (larger) block in the same free list.
    #[inline]
    pub unsafe fn succ(self) -> Option<Block> {
        self.link(1).read()
    }

    #[inline]
    pub unsafe fn set_pred(self, pred: Option<Block>) {
        self.link(0).write(pred);
    }

    #[inline]
    pub unsafe fn set_succ(self, succ: Option<Block>) {
        self.link(1).write(succ);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(64))]
    struct Align<T>(T);

    #[test]
    fn tags_and_neighbors() {
        let mut buf = Align([0usize; 32]);
        let base = buf.0.as_mut_ptr() as *mut u8;

        unsafe {
            // Two adjacent blocks starting at the second word
            let first = Block::from_payload(NonNull::new(base.add(WORD * 2)).unwrap());
            first.set_tags(MIN_BLOCK_SIZE, true);
            let second = first.next();
            second.set_tags(MIN_BLOCK_SIZE * 2, false);

            assert_eq!(first.size(), MIN_BLOCK_SIZE);
            assert!(first.is_allocated());
            assert_eq!(first.header(), first.footer());
            assert_eq!(second.addr(), first.addr() + MIN_BLOCK_SIZE);
            assert_eq!(second.size(), MIN_BLOCK_SIZE * 2);
            assert!(!second.is_allocated());
            assert!(second.is_prev_allocated());
            assert_eq!(second.prev(), first);

            second.set_pred(Some(first));
            second.set_succ(None);
            assert_eq!(second.pred(), Some(first));
            assert_eq!(second.succ(), None);
            // The links don't touch the tags
            assert_eq!(second.header(), pack(MIN_BLOCK_SIZE * 2, false));
            assert_eq!(second.footer(), pack(MIN_BLOCK_SIZE * 2, false));
        }
    }
}
