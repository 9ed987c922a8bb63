//! Reasons an allocation request produced no memory.

use core::fmt;

/// Why an allocation, zero-allocation or reallocation returned no pointer.
///
/// The C-shaped entry points collapse every variant into a null pointer,
/// the `try_*` methods of [`HeapManager`](crate::allocators::HeapManager) hand it to Rust callers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocFailure {
    /// A zero-byte request, or a zero count or element size. Not a fault.
    ZeroSize,
    /// `count * elem_size` does not fit in a `usize`, or the block would not fit in the address space.
    Overflow,
    /// The grower refused to extend the heap.
    Exhausted,
    /// The requested alignment is not a power of two.
    BadAlignment,
}

impl fmt::Display for AllocFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocFailure::ZeroSize => write!(f, "zero-sized request"),
            AllocFailure::Overflow => write!(f, "requested size overflows the address space"),
            AllocFailure::Exhausted => write!(f, "heap growth was denied"),
            AllocFailure::BadAlignment => write!(f, "alignment is not a power of two"),
        }
    }
}

impl std::error::Error for AllocFailure {}
