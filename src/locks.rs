//! [`HeapLock`] trait and the locks that implement it.
//!
//! [`BrkMalloc`](crate::BrkMalloc) serializes every operation on its heap through a
//! [`HeapLock`]. A `std::sync::Mutex` is used by default, any other primitive can be plugged in
//! with [`BrkMalloc::with_lock`](crate::BrkMalloc::with_lock).

use std::sync::{Mutex, PoisonError};

/// A mutual-exclusion primitive guarding a value of type `T`.
///
/// # Safety
/// Implementors must guarantee that at most one closure passed to [`with`](HeapLock::with)
/// runs at any instant for a given lock, and that the exclusive borrow handed
/// to it is released once the closure returns or unwinds.
pub unsafe trait HeapLock<T> {
    /// Runs `f` with exclusive access to the guarded value.
    /// Blocks until the lock is available.
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

unsafe impl<T> HeapLock<T> for Mutex<T> {
    #[inline]
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // Heap operations never panic halfway through, a poisoned heap is still consistent.
        let mut guard = self.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

unsafe impl<T> HeapLock<T> for spin::Mutex<T> {
    #[inline]
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }
}
