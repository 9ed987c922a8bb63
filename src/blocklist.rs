//! Defines the [`BlockList`] struct, the allocation-ordered list of every block on the heap.

use core::marker::PhantomData;
use core::ptr::null_mut;

use super::header::{BlockPtr, Header};

/// A singly linked list threaded through the block headers.
///
/// Blocks are only ever appended at the tail when the heap grows and only ever
/// removed from the tail when the heap shrinks, so the list order is both the
/// creation order and the address order of the blocks.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct BlockList {
    head: *mut Header,
    tail: *mut Header,
}

impl BlockList {
    /// Creates an empty BlockList.
    #[inline]
    pub const fn new() -> Self {
        BlockList {
            head: null_mut(),
            tail: null_mut(),
        }
    }

    /// Returns the first block or `None` if the list is empty.
    #[inline]
    pub fn head(&self) -> Option<BlockPtr> {
        BlockPtr::from_raw(self.head)
    }

    /// Returns the most recently appended block or `None` if the list is empty.
    #[inline]
    pub fn tail(&self) -> Option<BlockPtr> {
        BlockPtr::from_raw(self.tail)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Appends `block` after the current tail.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// `block` must be a freshly created block with no successor which
    /// is not already part of the list.
    pub unsafe fn push_back(&mut self, block: BlockPtr) {
        debug_assert!(block.next().is_none());
        match self.tail() {
            Some(tail) => tail.set_next(Some(block)),
            None => self.head = block.as_ptr(),
        }
        self.tail = block.as_ptr();
    }

    /// Returns the first free block whose payload size is exactly `size`.
    /// This operation has a time complexity of *O*(n).
    ///
    /// # Safety
    /// Every block in the list must still exist.
    pub unsafe fn find_exact(&self, size: usize) -> Option<BlockPtr> {
        self.iter()
            .find(|&block| block.is_free() && block.size() == size)
    }

    /// Unlinks the tail and returns it, the predecessor of the old tail becomes the new tail.
    /// This operation has a time complexity of *O*(n) since the predecessor
    /// is found by walking from the head.
    ///
    /// # Safety
    /// Every block in the list must still exist.
    pub unsafe fn pop_back(&mut self) -> Option<BlockPtr> {
        let tail = self.tail()?;
        let head = self.head()?;

        if head == tail {
            self.head = null_mut();
            self.tail = null_mut();
            return Some(tail);
        }

        let mut prev = head;
        loop {
            match prev.next() {
                Some(next) if next == tail => break,
                Some(next) => prev = next,
                None => {
                    debug_assert!(false, "The tail should be reachable from the head.");
                    return None;
                }
            }
        }

        prev.set_next(None);
        self.tail = prev.as_ptr();
        Some(tail)
    }

    /// Returns an iterator over the blocks from head to tail.
    ///
    /// # Safety
    /// Every block in the list must outlive the iterator.
    #[inline]
    pub unsafe fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.head(),
            _list: PhantomData,
        }
    }
}

pub(crate) struct Iter<'a> {
    next: Option<BlockPtr>,
    _list: PhantomData<&'a BlockList>,
}

impl Iterator for Iter<'_> {
    type Item = BlockPtr;

    fn next(&mut self) -> Option<BlockPtr> {
        let block = self.next?;
        self.next = unsafe { block.next() };
        Some(block)
    }
}
