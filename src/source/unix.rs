use core::ptr::NonNull;

use super::MemorySource;

/// The default capacity of [`MmapSource`].
const DEFAULT_CAPACITY: usize = 20 << 20;

/// A [`MemorySource`] backed by a private anonymous mapping.
///
/// The whole capacity is mapped up front, so the region never moves. Pages
/// are only committed by the OS when they are first touched. The mapping is
/// released when `self` is dropped.
#[cfg_attr(feature = "doc_cfg", doc(cfg(unix)))]
#[derive(Debug)]
pub struct MmapSource {
    start: NonNull<u8>,
    brk: usize,
    capacity: usize,
}

// Safety: The mapping is exclusively owned by `MmapSource`.
unsafe impl Send for MmapSource {}

#[inline]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

impl MmapSource {
    /// Map a region of 20 MiB.
    pub fn new() -> Option<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Map a region of at least `capacity` bytes. Returns `None` if the
    /// mapping fails.
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        let page_size_m1 = page_size() - 1;
        let capacity = capacity.checked_add(page_size_m1)? & !page_size_m1;

        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                capacity,
                libc::PROT_WRITE | libc::PROT_READ,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            log::debug!("MmapSource: mmap of {} bytes failed", capacity);
            return None;
        }

        Some(Self {
            start: NonNull::new(ptr as *mut u8)?,
            brk: 0,
            capacity,
        })
    }

    /// The number of bytes this source can hand out in total.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

unsafe impl MemorySource for MmapSource {
    fn extend(&mut self, len: usize) -> Option<NonNull<u8>> {
        if len > self.capacity - self.brk {
            return None;
        }

        // Safety: `brk <= capacity`, which is within the mapping
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

impl Drop for MmapSource {
    fn drop(&mut self) {
        // Safety: `start..start + capacity` is the mapping we created
        unsafe { libc::munmap(self.start.as_ptr() as *mut _, self.capacity) };
    }
}
