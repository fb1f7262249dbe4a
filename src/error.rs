/// Errors reported by [`SegFit`](crate::SegFit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    /// The memory source could not extend the managed region.
    #[error("memory source exhausted while extending the heap by {requested} bytes")]
    Exhausted {
        /// The number of bytes requested from the memory source.
        requested: usize,
    },
    /// The block being released is not allocated. This usually means it was
    /// released twice.
    #[error("tried to release the block at {addr:#x}, which is not allocated")]
    DoubleRelease {
        /// The payload address passed to the release call.
        addr: usize,
    },
    /// The address being released cannot be a payload address of this heap.
    #[error("tried to release {addr:#x}, which is not a payload address of this heap")]
    ForeignAddress {
        /// The payload address passed to the release call.
        addr: usize,
    },
}
