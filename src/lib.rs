//! This crate implements a classic explicit free list allocator with boundary
//! tags and segregated size classes.
//!
//!  - **Every block carries a boundary tag at both ends.** The size and the
//!    allocation flag of a block are stored in a header word immediately
//!    before the payload and in a footer word at the end of the block, so
//!    either neighbor of a block can be inspected in constant time.
//!
//!  - **Free blocks are kept in 25 size-class buckets.** Each bucket is an
//!    intrusive doubly linked list, sorted by ascending size, whose links
//!    live inside the payload of the free blocks themselves.
//!
//!  - **Freed blocks are coalesced immediately.** No two address-adjacent
//!    blocks are ever free at the same time when a public method returns.
//!
//!  - **The managed region grows on demand.** Memory comes from a
//!    [`MemorySource`], which extends a single contiguous region in the
//!    manner of `sbrk`. This crate supports `#![no_std]`.
//!
//! # Examples
//!
//! ```rust
//! use segfit::{SegFit, SliceSource};
//! use std::mem::MaybeUninit;
//!
//! let mut pool = [MaybeUninit::uninit(); 65536];
//! let mut heap = SegFit::new(SliceSource::new(&mut pool)).unwrap();
//!
//! let ptr1 = heap.acquire(100).unwrap();
//! let ptr2 = heap.acquire(200).unwrap();
//! assert_eq!(ptr1.as_ptr() as usize % segfit::ALIGNMENT, 0);
//!
//! unsafe {
//!     ptr1.as_ptr().write_bytes(0x5a, 100);
//!     heap.release(Some(ptr1));
//!     heap.release(Some(ptr2));
//! }
//!
//! // A request for zero bytes is ignored
//! assert_eq!(heap.acquire(0), None);
//! heap.check().unwrap();
//! ```
//!
//! # Details
//!
//! ## Differences from the Textbook Design
//!
//!  - The heap is an explicit context object rather than module-level state.
//!    Any number of independent heaps may exist at the same time.
//!
//!  - Releasing a block that is already free is detected from its boundary
//!    tag and reported before anything is modified. [`SegFit::release`]
//!    treats it as fatal; [`SegFit::try_release`] hands the error back.
//!
//!  - Which end of a split block becomes the allocation is configurable
//!    through [`Placement`].
//!
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

mod config;
mod error;
mod segfit;
mod source;
mod tracker;
pub use self::{
    config::*,
    error::*,
    segfit::{HeapStats, SegFit, Violation, ALIGNMENT, LIST_COUNT, MIN_BLOCK_SIZE},
    source::*,
    tracker::*,
};

#[cfg(test)]
extern crate std;
