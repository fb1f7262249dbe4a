//! Diagnostic heap walker
use core::ptr::NonNull;

use super::{
    block::{Block, TAGS},
    map::{list_index, LIST_COUNT},
    SegFit, ALIGNMENT, MIN_BLOCK_SIZE,
};
use crate::{MemorySource, RangeTracker};

/// Block counts gathered by [`SegFit::check`]. The sentinels are not counted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// The number of free blocks.
    pub free_blocks: usize,
    /// The total size of the free blocks, including their tags.
    pub free_bytes: usize,
    /// The number of allocated blocks.
    pub used_blocks: usize,
    /// The total size of the allocated blocks, including their tags.
    pub used_bytes: usize,
}

/// A broken heap invariant found by [`SegFit::check`]. Addresses are payload
/// addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    /// A block's payload address is not a multiple of [`ALIGNMENT`].
    #[error("block {addr:#x} is not aligned correctly")]
    Misaligned {
        /// The payload address of the block.
        addr: usize,
    },
    /// A block's header and footer disagree.
    #[error("block {addr:#x} has inconsistent header and footer")]
    TagMismatch {
        /// The payload address of the block.
        addr: usize,
    },
    /// A block's size is impossible or reaches past the epilogue.
    #[error("block {addr:#x} of size {size} does not fit in the heap")]
    OutOfBounds {
        /// The payload address of the block.
        addr: usize,
        /// The size read from the block's header.
        size: usize,
    },
    /// Two adjacent blocks are both free.
    #[error("contiguous free blocks {addr:#x} and {next:#x} were not coalesced")]
    Uncoalesced {
        /// The payload address of the lower block.
        addr: usize,
        /// The payload address of the upper block.
        next: usize,
    },
    /// A free list links something that isn't a free block of the heap.
    #[error("free list {list} contains {addr:#x}, which is not a free block")]
    NotFree {
        /// The index of the free list.
        list: usize,
        /// The linked payload address.
        addr: usize,
    },
    /// A free block is linked into a list its size doesn't map to.
    #[error("free list {list} contains {addr:#x}, which belongs to list {expected}")]
    WrongList {
        /// The index of the free list.
        list: usize,
        /// The payload address of the block.
        addr: usize,
        /// The index of the list the block's size maps to.
        expected: usize,
    },
    /// A free block is smaller than its predecessor in the list.
    #[error("free list {list} is not sorted at {addr:#x}")]
    Unsorted {
        /// The index of the free list.
        list: usize,
        /// The payload address of the out-of-order block.
        addr: usize,
    },
    /// A free block's `pred` link doesn't point at the block before it.
    #[error("free list {list} has a broken back link at {addr:#x}")]
    BrokenLink {
        /// The index of the free list.
        list: usize,
        /// The payload address of the block.
        addr: usize,
    },
    /// The free lists and the heap disagree on the number of free blocks, or
    /// a list has a cycle.
    #[error("{walked} free blocks in the heap, but {linked} in the free lists")]
    FreeCountMismatch {
        /// The number of free blocks found by walking the heap.
        walked: usize,
        /// The number of blocks reached through the free lists.
        linked: usize,
    },
}

impl<S: MemorySource, T: RangeTracker> SegFit<S, T> {
    /// Walk the whole heap and the free lists and check the invariants.
    ///
    /// Returns the statistics of the heap, or the first violation found (which
    /// is also logged). This never modifies the heap and never reads outside
    /// the managed region, so it's safe to call on a corrupted heap.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in linear time (`O(number of blocks)`).
    pub fn check(&self) -> Result<HeapStats, Violation> {
        let result = self.check_inner();
        if let Err(violation) = &result {
            log::warn!("heap check failed: {}", violation);
        }
        result
    }

    fn check_inner(&self) -> Result<HeapStats, Violation> {
        let mut stats = HeapStats::default();
        let (first, high) = self.block_range();

        // Walk the blocks from the one after the prologue to the epilogue
        let mut addr = first;
        let mut prev_free = None;
        loop {
            if addr % ALIGNMENT != 0 {
                return Err(Violation::Misaligned { addr });
            }

            // Safety: `first <= addr <= high`, so the header is in the region
            let block = Block::from_payload(unsafe { NonNull::new_unchecked(addr as *mut u8) });
            let size = unsafe { block.size() };
            let allocated = unsafe { block.is_allocated() };

            if addr == high {
                // This should be the epilogue
                if size != 0 || !allocated {
                    return Err(Violation::OutOfBounds { addr, size });
                }
                break;
            }

            if size < MIN_BLOCK_SIZE || size > high - addr {
                return Err(Violation::OutOfBounds { addr, size });
            }

            // Safety: The block fits in the region
            if unsafe { block.header() != block.footer() } {
                return Err(Violation::TagMismatch { addr });
            }

            if allocated {
                stats.used_blocks += 1;
                stats.used_bytes += size;
                prev_free = None;
            } else {
                if let Some(prev) = prev_free {
                    return Err(Violation::Uncoalesced { addr: prev, next: addr });
                }
                stats.free_blocks += 1;
                stats.free_bytes += size;
                prev_free = Some(addr);
            }

            addr += size;
        }

        // Walk the free lists
        let mut linked = 0;
        for list in 0..LIST_COUNT {
            let mut pred = None;
            let mut cursor = self.lists.head(list);
            while let Some(block) = cursor {
                let addr = block.addr();
                if addr % ALIGNMENT != 0 || addr < first || addr >= high {
                    return Err(Violation::NotFree { list, addr });
                }

                // Safety: The header is in the region
                let (size, allocated) = unsafe { (block.size(), block.is_allocated()) };
                if allocated || size < MIN_BLOCK_SIZE || size > high - addr {
                    return Err(Violation::NotFree { list, addr });
                }

                let expected = list_index(size);
                if expected != list {
                    return Err(Violation::WrongList {
                        list,
                        addr,
                        expected,
                    });
                }

                // Safety: The block fits in the region, so do its links
                if unsafe { block.pred() } != pred {
                    return Err(Violation::BrokenLink { list, addr });
                }

                if let Some(pred) = pred {
                    // Safety: `pred` was checked in the previous iteration
                    if unsafe { pred.size() } > size {
                        return Err(Violation::Unsorted { list, addr });
                    }
                }

                linked += 1;
                if linked > stats.free_blocks {
                    // Also stops a cycle
                    return Err(Violation::FreeCountMismatch {
                        walked: stats.free_blocks,
                        linked,
                    });
                }

                pred = Some(block);
                cursor = unsafe { block.succ() };
            }
        }

        if linked != stats.free_blocks {
            return Err(Violation::FreeCountMismatch {
                walked: stats.free_blocks,
                linked,
            });
        }

        Ok(stats)
    }

    /// The payload address of the first block and of the epilogue.
    fn block_range(&self) -> (usize, usize) {
        (self.prologue.addr() + TAGS, self.source.high() as usize)
    }
}
