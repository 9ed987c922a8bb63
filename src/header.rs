//! Defines the [`Header`] struct, the [`BlockPtr`] wrapper and associated constants and functions.
//!
//! Every block on the heap is laid out as
//! ```text
//!   ┌──────────────┬─────────────────────────┬─────────┐
//!   │    Header    │     payload (size)      │ padding │
//!   └──────────────┴─────────────────────────┴─────────┘
//!   ^ header       ^ header + HEADER_SIZE              ^ header + block_extent(size)
//! ```
//! The payload always starts exactly [`HEADER_SIZE`] bytes after its header and the
//! padding only rounds the block up so that the next header is [`HEADER_ALIGN`]-aligned.

use core::mem::{align_of, size_of};
use core::ptr::{null_mut, NonNull};

use static_assertions::const_assert;

use crate::util::find_divisible;

pub const HEADER_SIZE: usize = size_of::<Header>();
pub const HEADER_ALIGN: usize = align_of::<Header>();

// Payloads start right after a header, so the header size fixes their alignment.
const_assert!(HEADER_ALIGN >= 16);
const_assert!(HEADER_SIZE % HEADER_ALIGN == 0);

/// Stores information about a block:
/// the payload size requested when the block was created,
/// whether the block is free and the next block in allocation order.
#[derive(Debug)]
#[repr(C, align(16))]
pub struct Header {
    pub(crate) size: usize,
    pub(crate) is_free: bool,
    pub(crate) next: *mut Header,
}

/// Returns the number of bytes occupied by a block with a `size`-byte payload
/// (header included) or `None` if the block can not exist in the address space.
#[inline]
pub fn block_extent(size: usize) -> Option<usize> {
    // Objects should never exceed isize::MAX.
    // https://doc.rust-lang.org/std/ptr/index.html#allocated-object
    match find_divisible(size, HEADER_ALIGN)?.checked_add(HEADER_SIZE) {
        Some(extent) if extent <= isize::MAX as usize => Some(extent),
        _ => None,
    }
}

/// A pointer to a live block header.
///
/// The wrapper is the only place where the header/payload offset is computed,
/// every conversion goes through [`BlockPtr::payload`] and [`BlockPtr::from_payload`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct BlockPtr(NonNull<Header>);

impl BlockPtr {
    /// Writes a new occupied header with no successor at `start`.
    ///
    /// # Safety
    /// `start` must be [`HEADER_ALIGN`]-aligned and valid for writes of
    /// `block_extent(size)` bytes that are not part of any other block.
    #[inline]
    pub unsafe fn create(start: NonNull<u8>, size: usize) -> BlockPtr {
        debug_assert_eq!(start.as_ptr() as usize % HEADER_ALIGN, 0);
        debug_assert!(block_extent(size).is_some());
        let header = start.cast::<Header>();
        header.as_ptr().write(Header {
            size,
            is_free: false,
            next: null_mut(),
        });
        BlockPtr(header)
    }

    /// Recovers the block owning the payload at `payload`.
    ///
    /// # Safety
    /// `payload` must have been returned by [`BlockPtr::payload`] for a block that still exists.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> BlockPtr {
        BlockPtr(NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE)).cast())
    }

    #[inline]
    pub fn from_raw(header: *mut Header) -> Option<BlockPtr> {
        NonNull::new(header).map(BlockPtr)
    }

    #[inline(always)]
    pub fn as_ptr(self) -> *mut Header {
        self.0.as_ptr()
    }

    #[inline(always)]
    pub fn payload(self) -> NonNull<u8> {
        // A block never wraps around the address space, so its payload isn't null.
        unsafe { NonNull::new_unchecked(self.0.as_ptr().cast::<u8>().wrapping_add(HEADER_SIZE)) }
    }

    /// # Safety
    /// The block must still exist.
    #[inline(always)]
    pub unsafe fn size(self) -> usize {
        (*self.as_ptr()).size
    }

    /// # Safety
    /// The block must still exist.
    #[inline(always)]
    pub unsafe fn is_free(self) -> bool {
        (*self.as_ptr()).is_free
    }

    /// # Safety
    /// The block must still exist and callers must hold exclusive access to the heap.
    #[inline(always)]
    pub unsafe fn set_free(self, is_free: bool) {
        (*self.as_ptr()).is_free = is_free;
    }

    /// # Safety
    /// The block must still exist.
    #[inline(always)]
    pub unsafe fn next(self) -> Option<BlockPtr> {
        BlockPtr::from_raw((*self.as_ptr()).next)
    }

    /// # Safety
    /// The block must still exist and callers must hold exclusive access to the heap.
    #[inline(always)]
    pub unsafe fn set_next(self, next: Option<BlockPtr>) {
        (*self.as_ptr()).next = next.map_or(null_mut(), BlockPtr::as_ptr);
    }

    /// Returns the number of bytes the block occupies, header included.
    ///
    /// # Safety
    /// The block must still exist.
    #[inline]
    pub unsafe fn extent(self) -> usize {
        let size = self.size();
        debug_assert!(block_extent(size).is_some());
        // Checked once in block_extent() when the block was created.
        HEADER_SIZE + (size.wrapping_add(HEADER_ALIGN - 1) & !(HEADER_ALIGN - 1))
    }

    /// Returns the first address past the block.
    ///
    /// # Safety
    /// The block must still exist.
    #[inline]
    pub unsafe fn end(self) -> *mut u8 {
        self.as_ptr().cast::<u8>().wrapping_add(self.extent())
    }
}
