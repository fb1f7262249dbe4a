use core::ptr::NonNull;

/// Out-of-band bookkeeping of live address ranges, owned by whoever drives
/// the heap.
///
/// The heap never inserts anything into a tracker. It only notifies it
/// through [`Self::remove`] after a block has been released and coalesced.
pub trait RangeTracker {
    /// Forget the range starting at the payload address `lo`.
    fn remove(&mut self, lo: NonNull<u8>);
}

/// No tracking.
impl RangeTracker for () {
    #[inline]
    fn remove(&mut self, _lo: NonNull<u8>) {}
}

impl<T: RangeTracker + ?Sized> RangeTracker for &mut T {
    #[inline]
    fn remove(&mut self, lo: NonNull<u8>) {
        (**self).remove(lo)
    }
}

impl<T: RangeTracker> RangeTracker for Option<T> {
    #[inline]
    fn remove(&mut self, lo: NonNull<u8>) {
        if let Some(inner) = self {
            inner.remove(lo);
        }
    }
}
