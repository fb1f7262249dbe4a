//! Exposes one process-wide [`::segfit`] heap through the classic `mm_init`,
//! `mm_malloc`, and `mm_free` C entry points.
//!
//! The heap lives in an [`MmapSource`] region. The caller may pass a
//! `range_t` list to [`mm_init`]; every node whose `lo` matches a released
//! payload is unlinked and `free`d by [`mm_free`].
#![allow(non_camel_case_types)]
use segfit::{Config, HeapError, MmapSource, RangeTracker, SegFit};
use std::{
    cell::UnsafeCell,
    os::raw::{c_char, c_int, c_void},
    ptr::{addr_of_mut, null_mut, NonNull},
};

/// A node of the caller's live range list.
#[repr(C)]
#[derive(Debug)]
pub struct range_t {
    pub lo: *mut c_char,
    pub hi: *mut c_char,
    pub next: *mut range_t,
}

/// A [`RangeTracker`] over the head pointer of a `range_t` list.
#[derive(Debug)]
pub struct RangeList(NonNull<*mut range_t>);

impl RangeTracker for RangeList {
    fn remove(&mut self, lo: NonNull<u8>) {
        let lo = lo.as_ptr() as *mut c_char;
        // Safety: `mm_init`'s caller guarantees the list stays valid, and its
        //         nodes are allocated by `malloc`
        unsafe {
            let mut link = self.0.as_ptr();
            while let Some(node) = NonNull::new(*link) {
                if (*node.as_ptr()).lo == lo {
                    *link = (*node.as_ptr()).next;
                    libc::free(node.as_ptr().cast());
                    return;
                }
                link = addr_of_mut!((*node.as_ptr()).next);
            }
        }
    }
}

type Heap = SegFit<MmapSource, Option<RangeList>>;

struct Global {
    /// `pthread_mutex_t` might be unsafe to move, so it stays in the static.
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    heap: UnsafeCell<Option<Heap>>,
}

// Safety: `heap` is only accessed with `mutex` held
unsafe impl Sync for Global {}

static GLOBAL: Global = Global {
    mutex: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
    heap: UnsafeCell::new(None),
};

fn with_heap<R>(f: impl FnOnce(&mut Option<Heap>) -> R) -> R {
    struct Unlock;

    impl Drop for Unlock {
        #[inline]
        fn drop(&mut self) {
            unsafe { libc::pthread_mutex_unlock(GLOBAL.mutex.get()) };
        }
    }

    unsafe { libc::pthread_mutex_lock(GLOBAL.mutex.get()) };
    let _unlock = Unlock;
    // Safety: We hold the mutex
    f(unsafe { &mut *GLOBAL.heap.get() })
}

/// Create the heap, discarding any existing one. Returns `0` on success and
/// `-1` if memory couldn't be reserved.
///
/// # Safety
///
/// `ranges` must be null or point to a list head that stays valid, and whose
/// nodes are allocated by `malloc`, until the heap is discarded.
#[no_mangle]
pub unsafe extern "C" fn mm_init(ranges: *mut *mut range_t) -> c_int {
    let Some(source) = MmapSource::new() else {
        log::warn!("mm_init: couldn't reserve the heap region");
        return -1;
    };
    let tracker = NonNull::new(ranges).map(RangeList);

    match SegFit::initialize(source, tracker, Config::DEFAULT) {
        Ok(heap) => {
            let old = with_heap(|slot| slot.replace(heap));
            drop(old);
            0
        }
        Err(e) => {
            log::warn!("mm_init: {}", e);
            -1
        }
    }
}

/// Allocate `size` bytes. Returns null if `size` is zero, the heap is
/// exhausted, or [`mm_init`] hasn't been called.
#[no_mangle]
pub extern "C" fn mm_malloc(size: usize) -> *mut c_void {
    with_heap(|heap| heap.as_mut()?.acquire(size))
        .map(|ptr| ptr.as_ptr().cast())
        .unwrap_or(null_mut())
}

/// Release a block returned by [`mm_malloc`]. Null is ignored.
///
/// Releasing a block that isn't allocated prints a diagnostic and terminates
/// the process with status `-1`.
///
/// # Safety
///
/// `ptr` must be null or an address returned by `mm_malloc` since the last
/// call to `mm_init`.
#[no_mangle]
pub unsafe extern "C" fn mm_free(ptr: *mut c_void) {
    let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
        return;
    };

    let result = with_heap(|heap| match heap {
        Some(heap) => heap.try_release(ptr),
        None => Err(HeapError::ForeignAddress {
            addr: ptr.as_ptr() as usize,
        }),
    });

    if let Err(e) = result {
        log::error!("{}", e);
        println!("ERROR : {}", e);
        std::process::exit(-1);
    }
}

/// Reallocation isn't supported. Always returns null.
#[no_mangle]
pub extern "C" fn mm_realloc(_ptr: *mut c_void, _size: usize) -> *mut c_void {
    null_mut()
}

/// Discard the heap. Every block returned by [`mm_malloc`] becomes invalid.
#[no_mangle]
pub extern "C" fn mm_exit() {
    if let Some(heap) = with_heap(Option::take) {
        let (source, _ranges) = heap.shutdown();
        drop(source);
    }
}

/// Check the heap for consistency. Returns `0` if it's consistent, `1` if it
/// isn't (a diagnostic is printed), and `-1` if there's no heap.
#[no_mangle]
pub extern "C" fn mm_check() -> c_int {
    match with_heap(|heap| heap.as_ref().map(Heap::check)) {
        Some(Ok(_)) => 0,
        Some(Err(violation)) => {
            println!("ERROR, {}", violation);
            1
        }
        None => -1,
    }
}
