//! Segregated free lists
use super::{
    block::Block,
    map::{list_index, LIST_COUNT},
};

/// The heads of the free lists. Each list is doubly linked through the
/// payloads of its blocks and sorted by ascending block size.
#[derive(Debug)]
pub(super) struct FreeLists {
    heads: [Option<Block>; LIST_COUNT],
}

impl FreeLists {
    pub const INIT: Self = Self {
        heads: [None; LIST_COUNT],
    };

    #[inline]
    pub fn head(&self, i: usize) -> Option<Block> {
        self.heads[i]
    }

    /// Link `block` into the list chosen by its current size, before the
    /// first entry that is at least as large.
    ///
    /// # Safety
    ///
    ///  - `block` must be a free block owned by the heap, with up-to-date tags.
    ///  - `block` must not currently be in any list.
    ///
    pub unsafe fn insert(&mut self, block: Block) {
        let size = block.size();
        let i = list_index(size);

        let mut pred = None;
        let mut succ = self.heads[i];
        while let Some(entry) = succ {
            if entry.size() >= size {
                break;
            }
            pred = Some(entry);
            succ = entry.succ();
        }

        block.set_pred(pred);
        block.set_succ(succ);

        if let Some(succ) = succ {
            succ.set_pred(Some(block));
        }

        if let Some(pred) = pred {
            pred.set_succ(Some(block));
        } else {
            self.heads[i] = Some(block);
        }
    }

    /// Unlink `block` from the list chosen by its current size.
    ///
    /// # Safety
    ///
    ///  - `block`'s size must not have changed since it was inserted.
    ///  - `block` must currently be in a list.
    ///
    pub unsafe fn delete(&mut self, block: Block) {
        let pred = block.pred();
        let succ = block.succ();

        if let Some(succ) = succ {
            succ.set_pred(pred);
        }

        if let Some(pred) = pred {
            pred.set_succ(succ);
        } else {
            let head = &mut self.heads[list_index(block.size())];
            debug_assert_eq!(*head, Some(block));
            *head = succ;
        }
    }

    /// Find the first block at least `size` bytes large, scanning the lists
    /// upward from the one `size` belongs to.
    ///
    /// # Safety
    ///
    /// Every list must be consistent.
    pub unsafe fn find_fit(&self, size: usize) -> Option<Block> {
        for &head in &self.heads[list_index(size)..] {
            let mut cursor = head;
            while let Some(block) = cursor {
                if block.size() >= size {
                    return Some(block);
                }
                cursor = block.succ();
            }
        }
        None
    }
}
