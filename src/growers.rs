//! [`Grower`] trait and structures that implement it.
//!
//! The [`Grower`] trait allows users to easily change the underlying
//! buffer on which allocators in [`brk_malloc::allocators`](crate::allocators) operate.

use super::header::HEADER_ALIGN;
use super::util::{checked_add, find_aligned};

use core::ptr::NonNull;

#[cfg(unix)]
use libc::{intptr_t, sbrk};
#[cfg(unix)]
use tracing::warn;

/// A trait for types that act as if they were a contiguous buffer
/// that can grow and shrink at its end, like the program break.
///
/// # Safety
/// * copying, cloning, or moving the grower must not invalidate any pointers to the buffer
///   managed by the grower. This generally means that growers should not own but
///   reference their underlying buffers.
/// * a successful `grow(n)` must return the old end of the buffer, aligned to
///   [`HEADER_ALIGN`](crate::HEADER_ALIGN), and the `n` bytes after it must be valid
///   for reads and writes until they are given back with `shrink`.
pub unsafe trait Grower {
    /// Returns the current end of the buffer or `None` if it can not be queried.
    ///
    /// # Safety
    /// Implementations may query process-wide state, callers must serialize calls
    /// with every other operation on the same grower.
    unsafe fn heap_end(&mut self) -> Option<NonNull<u8>>;

    /// Grows the underlying buffer by exactly `size` bytes.
    /// Returns the old end of the buffer, which is where the new bytes start,
    /// or `Err(())` if the growth was denied.
    ///
    /// # Safety
    /// Callers should only request multiples of [`HEADER_ALIGN`](crate::HEADER_ALIGN).
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()>;

    /// Moves the end of the buffer back by `size` bytes, giving them back.
    /// Returns `Err(())` if the buffer could not be shrunk.
    ///
    /// # Safety
    /// The last `size` bytes of the buffer must not be in use anymore.
    unsafe fn shrink(&mut self, size: usize) -> Result<(), ()>;
}

#[cfg(unix)]
#[derive(Debug, Default)]
/// A grower that internally uses [`libc::sbrk`] to operate
/// on the end of the process's data segment.
pub struct SbrkGrower {
    aligned: bool,
}

#[cfg(unix)]
impl SbrkGrower {
    #[inline(always)]
    pub const fn new() -> Self {
        SbrkGrower { aligned: false }
    }

    /// Moves the program break up to the next [`HEADER_ALIGN`] boundary.
    /// Returns `Err(())` if the break could not be moved.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that there aren't any other
    /// objects (growers or not) concurrently managing the program break.
    unsafe fn align_break(&mut self) -> Result<(), ()> {
        let heap_end = sbrk(0);
        if heap_end as isize == -1 {
            return Err(());
        }
        let aligned = find_aligned(heap_end.cast(), HEADER_ALIGN).ok_or(())?;
        let padding = aligned as usize - heap_end as usize;
        if padding != 0 && sbrk(padding as intptr_t) as isize == -1 {
            return Err(());
        }
        self.aligned = true;
        Ok(())
    }
}

#[cfg(unix)]
unsafe impl Grower for SbrkGrower {
    unsafe fn heap_end(&mut self) -> Option<NonNull<u8>> {
        let heap_end = sbrk(0);
        if heap_end as isize == -1 {
            return None;
        }
        NonNull::new(heap_end.cast())
    }

    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        let increment = intptr_t::try_from(size).map_err(|_| ())?;

        // Our increments keep the break aligned, a foreign sbrk() might not.
        for _ in 0..2 {
            if !self.aligned {
                self.align_break()?;
            }
            let old_heap_end = sbrk(increment);
            if old_heap_end as isize == -1 {
                return Err(());
            }
            if old_heap_end as usize % HEADER_ALIGN == 0 {
                return NonNull::new(old_heap_end.cast()).ok_or(());
            }
            warn!(?old_heap_end, "Program break was misaligned by a foreign grower.");
            sbrk(-increment);
            self.aligned = false;
        }
        Err(())
    }

    unsafe fn shrink(&mut self, size: usize) -> Result<(), ()> {
        let decrement = intptr_t::try_from(size).map_err(|_| ())?;
        match sbrk(-decrement) as isize {
            -1 => Err(()),
            _ => Ok(()),
        }
    }
}

/// A grower that operates on a caller-provided buffer instead of the program break.
///
/// Each instance is independent of the process heap and of every other instance,
/// which makes it the grower of choice for isolated allocators and for tests.
#[derive(Debug)]
pub struct ArenaGrower {
    heap_start: *mut u8,
    heap_end: *mut u8,
    arena_end: *mut u8,
}

impl ArenaGrower {
    /// Creates a grower that operates on the `size` bytes starting at `buf`.
    /// The start of the heap is rounded up to [`HEADER_ALIGN`] so some
    /// bytes at the front of an unaligned buffer are never handed out.
    pub fn new(buf: *mut u8, size: usize) -> Self {
        let arena_end = buf.wrapping_add(size);
        let heap_start = match find_aligned(buf, HEADER_ALIGN) {
            Some(p) if p as usize <= arena_end as usize => p as *mut u8,
            _ => arena_end,
        };
        ArenaGrower {
            heap_start,
            heap_end: heap_start,
            arena_end,
        }
    }

    /// Returns the number of bytes currently handed out.
    #[inline]
    pub fn used(&self) -> usize {
        self.heap_end as usize - self.heap_start as usize
    }

    /// Returns the number of bytes that can still be handed out.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.arena_end as usize - self.heap_end as usize
    }
}

// The arena is only ever accessed through the grower's owner.
unsafe impl Send for ArenaGrower {}

unsafe impl Grower for ArenaGrower {
    unsafe fn heap_end(&mut self) -> Option<NonNull<u8>> {
        NonNull::new(self.heap_end)
    }

    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        let heap_end = NonNull::new(self.heap_end).ok_or(())?;
        let new_heap_end = checked_add(heap_end.as_ptr(), size).ok_or(())? as *mut u8;
        if new_heap_end > self.arena_end {
            return Err(());
        }
        self.heap_end = new_heap_end;
        Ok(heap_end)
    }

    unsafe fn shrink(&mut self, size: usize) -> Result<(), ()> {
        if size > self.used() {
            return Err(());
        }
        self.heap_end = self.heap_end.wrapping_sub(size);
        Ok(())
    }
}

unsafe impl<T: Grower + ?Sized> Grower for &mut T {
    unsafe fn heap_end(&mut self) -> Option<NonNull<u8>> {
        (**self).heap_end()
    }

    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        (**self).grow(size)
    }

    unsafe fn shrink(&mut self, size: usize) -> Result<(), ()> {
        (**self).shrink(size)
    }
}
