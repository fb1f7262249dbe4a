//! The growable memory primitive backing a heap
use core::{marker::PhantomData, mem::MaybeUninit, ptr::NonNull};

use crate::ALIGNMENT;

/// A contiguous memory region that can only grow at its upper end, in the
/// manner of `sbrk`.
///
/// # Safety
///
/// An implementation must uphold the following:
///
///  - [`Self::low`] is aligned to [`ALIGNMENT`] bytes and never changes.
///
///  - A successful [`Self::extend`] call returns the old value of
///    [`Self::high`], and advances [`Self::high`] by exactly the requested
///    length. The newly covered bytes are readable, writable, and exclusively
///    owned by the caller until `self` is dropped.
///
///  - Memory handed out by `self` never moves.
///
pub unsafe trait MemorySource {
    /// Grow the region by exactly `len` bytes, where `len` is a multiple of
    /// [`ALIGNMENT`]. Returns the first newly covered address, or `None` if
    /// there is no more memory.
    fn extend(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// The first address of the region.
    fn low(&self) -> *mut u8;

    /// The address one past the last byte of the region. Equal to
    /// [`Self::low`] while the region is empty.
    fn high(&self) -> *mut u8;
}

unsafe impl<T: MemorySource + ?Sized> MemorySource for &mut T {
    #[inline]
    fn extend(&mut self, len: usize) -> Option<NonNull<u8>> {
        (**self).extend(len)
    }

    #[inline]
    fn low(&self) -> *mut u8 {
        (**self).low()
    }

    #[inline]
    fn high(&self) -> *mut u8 {
        (**self).high()
    }
}

/// A [`MemorySource`] carving a region out of a caller-provided buffer.
///
/// The region starts at the first [`ALIGNMENT`]-aligned address of the buffer
/// and can grow until it reaches the buffer's end.
///
/// # Examples
///
/// ```
/// use segfit::{MemorySource, SliceSource};
/// use std::mem::MaybeUninit;
///
/// let mut pool = [MaybeUninit::uninit(); 256];
/// let mut source = SliceSource::new(&mut pool);
/// assert!(source.capacity() >= 256 - 8);
///
/// let start = source.extend(64).unwrap();
/// assert_eq!(start.as_ptr(), source.low());
/// assert_eq!(source.high() as usize - source.low() as usize, 64);
///
/// // The buffer can't grow past its end
/// assert!(source.extend(1 << 20).is_none());
/// ```
#[derive(Debug)]
pub struct SliceSource<'pool> {
    start: NonNull<u8>,
    brk: usize,
    capacity: usize,
    _phantom: PhantomData<&'pool mut ()>,
}

// Safety: `SliceSource` exclusively borrows its buffer.
unsafe impl Send for SliceSource<'_> {}

impl<'pool> SliceSource<'pool> {
    /// Construct a `SliceSource` over `pool`. The whole buffer is initially
    /// unused.
    pub fn new(pool: &'pool mut [MaybeUninit<u8>]) -> Self {
        let len = pool.len();
        let unaligned_start = pool.as_mut_ptr() as *mut u8;

        // Round up the starting address
        let padding = (unaligned_start as usize).wrapping_neg() & (ALIGNMENT - 1);
        let (padding, capacity) = match len.checked_sub(padding) {
            Some(capacity) => (padding, capacity & !(ALIGNMENT - 1)),
            // The buffer is too small to contain an aligned address
            None => (0, 0),
        };

        Self {
            // Safety: `padding <= len`, so this is within (or one past the end
            //         of) `pool`, and can't be null
            start: unsafe { NonNull::new_unchecked(unaligned_start.add(padding)) },
            brk: 0,
            capacity,
            _phantom: PhantomData,
        }
    }

    /// The number of bytes this source can hand out in total.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of bytes not handed out yet.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.brk
    }
}

unsafe impl MemorySource for SliceSource<'_> {
    fn extend(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len > self.remaining() {
            log::trace!(
                "SliceSource::extend({}): only {} bytes left",
                len,
                self.remaining()
            );
            return None;
        }

        // Safety: `brk <= capacity`, which is within the buffer
        let ptr = unsafe { NonNull::new_unchecked(self.start.as_ptr().add(self.brk)) };
        self.brk += len;
        Some(ptr)
    }

    #[inline]
    fn low(&self) -> *mut u8 {
        self.start.as_ptr()
    }

    #[inline]
    fn high(&self) -> *mut u8 {
        self.start.as_ptr().wrapping_add(self.brk)
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use self::unix::MmapSource;
    }
}
