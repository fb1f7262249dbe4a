//! The allocator core
use core::ptr::NonNull;

use crate::{Config, HeapError, MemorySource, RangeTracker};

mod block;
mod check;
mod lists;
mod map;

use self::{
    block::{Block, TAGS, WORD},
    lists::FreeLists,
};
pub use self::{
    block::{ALIGNMENT, MIN_BLOCK_SIZE},
    check::{HeapStats, Violation},
    map::LIST_COUNT,
};

/// The padding placed before the prologue so that the prologue's payload (and
/// therefore every payload after it) is aligned to [`ALIGNMENT`] bytes.
const PADDING: usize = (ALIGNMENT - WORD % ALIGNMENT) % ALIGNMENT;

#[doc = svgbobdoc::transform!(
/// A heap managing one growable contiguous region.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///   Managed region
///
///      prologue            free                 allocated          epilogue
///   ,---+---+---+-----+---+---+--------+---,---+----------+---,---,
///   |pad|hdr|ftr| hdr |"pred"|"succ"|  | ftr|hdr| payload  |ftr|hdr|
///   '---+---+---+-----+-+-+---+--------+---'---+----------+---'---'
///    low()                |                                     high()
///                         |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Free lists            |
///                         v
///        ,-----+-----+-----+-----+-- ... --+-----,
///  heads |  0  |  1  |  6  |  7  |         | 24  |
///        '-----+-----+--+--+-----+-- ... --+-----'
///           size 2⁶..2⁷ |
///                       v
///                 ,---+---,    ,---+---,    ,---+---,
///                 | O-+---+--->| O-+---+--->|   |   |
///                 |   |<--+----+-O |<--+----+-O |   |
///                 '---+---'    '---+---'    '---+---'
///                  72 bytes     96 bytes     120 bytes
/// ```
/// </center>
///
/// # Properties
///
/// Every payload address is aligned to [`ALIGNMENT`] bytes. Every block is at
/// least [`MIN_BLOCK_SIZE`] bytes long. When any method returns:
///
///  - The header and the footer of every block agree.
///  - No two adjacent blocks are free.
///  - Every free block is in exactly one free list (the one its size maps
///    to), and no allocated block is in any.
///
/// `S` supplies the memory. `T` is notified of every released block.
)]
#[derive(Debug)]
pub struct SegFit<S, T = ()> {
    source: S,
    tracker: T,
    lists: FreeLists,
    config: Config,
    prologue: Block,
}

// Safety: All blocks referenced by `lists` and `prologue` are in the region
//         owned by `source`, which moves along with `self`.
unsafe impl<S: Send, T: Send> Send for SegFit<S, T> {}

impl<S: MemorySource> SegFit<S, ()> {
    /// Initialize a heap on `source` with the default configuration and no
    /// range tracker.
    pub fn new(source: S) -> Result<Self, HeapError> {
        Self::initialize(source, (), Config::DEFAULT)
    }

    /// Initialize a heap on `source` with no range tracker.
    pub fn with_config(source: S, config: Config) -> Result<Self, HeapError> {
        Self::initialize(source, (), config)
    }
}

impl<S: MemorySource, T: RangeTracker> SegFit<S, T> {
    /// Write the sentinels at the start of `source`'s region and create the
    /// initial free block of [`Config::initial_size`] bytes.
    ///
    /// `source`'s region must be empty.
    pub fn initialize(mut source: S, tracker: T, config: Config) -> Result<Self, HeapError> {
        debug_assert_eq!(source.low(), source.high());

        let len = PADDING + WORD * 3;
        let base = source
            .extend(len)
            .ok_or(HeapError::Exhausted { requested: len })?;
        debug_assert_eq!(base.as_ptr() as usize % ALIGNMENT, 0);

        // Safety: `base..base + len` was just handed to us
        let prologue = unsafe {
            base.as_ptr().write_bytes(0, PADDING);
            let prologue = Block::from_payload(NonNull::new_unchecked(
                base.as_ptr().add(PADDING + WORD),
            ));
            prologue.set_tags(TAGS, true);
            prologue.next().set_header(0, true);
            prologue
        };

        let mut this = Self {
            source,
            tracker,
            lists: FreeLists::INIT,
            config,
            prologue,
        };

        this.extend_heap(config.initial_size)?;

        log::debug!(
            "initialized a heap at {:p} with {} bytes",
            base,
            this.source.high() as usize - base.as_ptr() as usize
        );

        Ok(this)
    }

    /// Tear down the heap, returning the memory source and the range tracker.
    ///
    /// The memory handed out by the heap stays owned by the memory source and
    /// is released together with it.
    pub fn shutdown(self) -> (S, T) {
        log::debug!(
            "shutting down a heap of {} bytes",
            self.source.high() as usize - self.source.low() as usize
        );
        (self.source, self.tracker)
    }

    /// Attempt to allocate a block with a payload of at least `size` bytes.
    ///
    /// Returns the payload address on success; `None` if `size` is zero or
    /// the memory source is exhausted. A zero-size request doesn't modify
    /// anything.
    pub fn acquire(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        let block_size = map::adjusted_size(size)?;

        // Safety: The free lists are consistent between method calls
        let block = match unsafe { self.lists.find_fit(block_size) } {
            Some(block) => block,
            None => {
                if let Err(e) = self.extend_heap(block_size.max(self.config.chunk_size)) {
                    log::trace!("acquire({}): {}", size, e);
                    return None;
                }

                // The new free block is at least `block_size` bytes long, so
                // this should succeed
                unsafe { self.lists.find_fit(block_size) }?
            }
        };

        // Safety: `block` was found in a free list
        let block = unsafe { self.place(block, block_size) };
        log::trace!("acquire({}) = {:p}", size, block.payload());

        Some(block.payload())
    }

    /// Release a block previously returned by [`Self::acquire`]. `None` is
    /// ignored.
    ///
    /// # Panics
    ///
    /// Panics if the block isn't allocated (e.g., it was already released) or
    /// `ptr` is recognizably not a payload address of this heap. The heap is
    /// left untouched in that case, but continuing is unlikely to be safe.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or an address returned by `self.acquire`. It may
    /// have been released already; that is detected as long as the block
    /// hasn't been handed out again since.
    pub unsafe fn release(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else { return };
        if let Err(e) = self.try_release(ptr) {
            invalid_release(e);
        }
    }

    /// Like [`Self::release`], but reports an invalid release as an error
    /// instead of panicking. Nothing is modified if an error is returned.
    ///
    /// # Safety
    ///
    /// See [`Self::release`].
    pub unsafe fn try_release(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let addr = ptr.as_ptr() as usize;
        let high = self.source.high() as usize;
        if addr % ALIGNMENT != 0 || addr <= self.prologue.addr() || addr >= high {
            return Err(HeapError::ForeignAddress { addr });
        }

        let block = Block::from_payload(ptr);
        let size = block.size();
        if size < MIN_BLOCK_SIZE || size > high - addr {
            return Err(HeapError::ForeignAddress { addr });
        }

        if !block.is_allocated() {
            return Err(HeapError::DoubleRelease { addr });
        }

        block.set_tags(size, false);
        self.lists.insert(block);
        self.coalesce(block);
        log::trace!("release({:p}): {} bytes", ptr, size);

        self.tracker.remove(ptr);
        Ok(())
    }

    /// Get the number of payload bytes available in an allocated block.
    ///
    /// # Safety
    ///
    /// `ptr` must be an address returned by `self.acquire` and not released
    /// since.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        Block::from_payload(ptr).size() - TAGS
    }

    /// Get a reference to the memory source.
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a mutable reference to the memory source.
    ///
    /// # Safety
    ///
    /// The caller must not extend the region through the returned reference.
    #[inline]
    pub unsafe fn source_mut_unchecked(&mut self) -> &mut S {
        &mut self.source
    }

    /// Get a reference to the range tracker.
    #[inline]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Get a mutable reference to the range tracker.
    #[inline]
    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Grow the region by at least `size` bytes, turn the new space into a
    /// free block, and coalesce it with the last block if that one is free.
    fn extend_heap(&mut self, size: usize) -> Result<Block, HeapError> {
        let size = size
            .max(MIN_BLOCK_SIZE)
            .checked_add(ALIGNMENT - 1)
            .ok_or(HeapError::Exhausted { requested: size })?
            & !(ALIGNMENT - 1);

        let old_high = self.source.high();
        let ptr = self
            .source
            .extend(size)
            .ok_or(HeapError::Exhausted { requested: size })?;
        debug_assert_eq!(ptr.as_ptr(), old_high);
        log::trace!("extended the heap by {} bytes at {:p}", size, ptr);

        // Safety: The new block's header overwrites the old epilogue, and
        //         `ptr..ptr + size` was just handed to us, so the whole block
        //         and the new epilogue's header are ours
        unsafe {
            let block = Block::from_payload(ptr);
            block.set_tags(size, false);
            block.next().set_header(0, true);

            self.lists.insert(block);
            Ok(self.coalesce(block))
        }
    }

    /// Carve a `size`-byte allocated block out of the free block `block`.
    /// Returns the allocated block.
    ///
    /// # Safety
    ///
    /// `block` must be in a free list and at least `size` bytes long. `size`
    /// must be a valid block size.
    unsafe fn place(&mut self, block: Block, size: usize) -> Block {
        let block_size = block.size();
        debug_assert!(!block.is_allocated());
        debug_assert!(block_size >= size);

        self.lists.delete(block);

        let remainder = block_size - size;
        if remainder < MIN_BLOCK_SIZE {
            // Not worth splitting
            block.set_tags(block_size, true);
            block
        } else if self.config.placement.allocates_high(size) {
            block.set_tags(remainder, false);
            let used = block.next();
            used.set_tags(size, true);
            self.lists.insert(block);
            log::trace!("split {:p}: free {} + used {}", block.payload(), remainder, size);
            used
        } else {
            block.set_tags(size, true);
            let rest = block.next();
            rest.set_tags(remainder, false);
            self.lists.insert(rest);
            log::trace!("split {:p}: used {} + free {}", block.payload(), size, remainder);
            block
        }
    }

    /// Merge a newly freed block with its free neighbors. Returns the merged
    /// block.
    ///
    /// The remainder of a split never needs this: it's only adjacent to the
    /// allocated part and to a neighbor of a block that used to be free.
    ///
    /// # Safety
    ///
    /// `block` must be a free block in a free list.
    unsafe fn coalesce(&mut self, block: Block) -> Block {
        let prev_allocated = block.is_prev_allocated();
        let next = block.next();
        let next_allocated = next.is_allocated();
        let mut size = block.size();

        match (prev_allocated, next_allocated) {
            (true, true) => block,
            (true, false) => {
                self.lists.delete(block);
                self.lists.delete(next);
                size += next.size();
                block.set_tags(size, false);
                self.lists.insert(block);
                block
            }
            (false, true) => {
                let prev = block.prev();
                self.lists.delete(block);
                self.lists.delete(prev);
                size += prev.size();
                prev.set_tags(size, false);
                self.lists.insert(prev);
                prev
            }
            (false, false) => {
                let prev = block.prev();
                self.lists.delete(block);
                self.lists.delete(prev);
                self.lists.delete(next);
                size += prev.size() + next.size();
                prev.set_tags(size, false);
                self.lists.insert(prev);
                prev
            }
        }
    }
}

#[cold]
#[track_caller]
fn invalid_release(e: HeapError) -> ! {
    log::error!("{}", e);
    panic!("{}", e);
}
