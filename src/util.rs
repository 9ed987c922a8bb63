//! Pointer and size arithmetic shared by the heap manager and the growers.

use core::ptr::{null_mut, NonNull};

/// Returns the smallest (in address) `align`-aligned pointer
/// with an address greater or equal to that of `ptr`
/// or `None` if no such pointer exists.
///
/// # Panics
/// Panics if `align` is not a power-of-two.
#[inline]
pub(crate) fn find_aligned(ptr: *const u8, align: usize) -> Option<*const u8> {
    let offset = ptr.align_offset(align);
    debug_assert_ne!(
        offset,
        usize::MAX,
        "align_offset() on a *const u8 should never fail."
    );
    if usize::MAX - offset < ptr as usize {
        return None;
    }
    Some(ptr.wrapping_add(offset))
}

/// Returns the smallest integer `z` such that `z ≥ x` and `z = y.k` for some integer `k`
/// or `None` if that integer can not be contained in a `usize`.
///
/// # Panics
/// Panics if `y` is 0.
#[inline]
pub(crate) fn find_divisible(x: usize, y: usize) -> Option<usize> {
    if x % y == 0 {
        Some(x)
    } else {
        ((x / y) * y).checked_add(y)
    }
}

#[inline(always)]
pub(crate) fn raw_ptr<T>(p: Option<NonNull<T>>) -> *mut T {
    p.map_or(null_mut(), |p| p.as_ptr())
}

#[inline(always)]
pub(crate) fn checked_add(ptr: *const u8, offset: usize) -> Option<*const u8> {
    (ptr as usize <= usize::MAX - offset).then(|| ptr.wrapping_add(offset))
}
