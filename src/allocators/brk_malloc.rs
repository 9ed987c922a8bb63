//! A multithreaded memory allocator.

use crate::allocators::HeapManager;
use crate::growers::Grower;
use crate::header::HEADER_ALIGN;
use crate::locks::HeapLock;

use core::alloc::{GlobalAlloc, Layout};
use core::marker::PhantomData;
use std::alloc::System;
use std::sync::Mutex;

/// A multithreaded memory allocator.
///
/// This allocator is a lock wrapper over [`HeapManager`]: every operation takes the lock
/// for its whole duration, so at most one thread works on the heap at any instant.
/// The lock is a `std::sync::Mutex` unless another [`HeapLock`] is given to
/// [`with_lock`](BrkMalloc::with_lock).
///
/// Operations are not reentrant, calling into the same allocator while its lock is held
/// (from a signal handler or from an [`inspect`](BrkMalloc::inspect) closure) deadlocks.
pub struct BrkMalloc<G: Grower, L: HeapLock<HeapManager<G>> = Mutex<HeapManager<G>>> {
    inner: L,
    _heap: PhantomData<fn() -> HeapManager<G>>,
}

impl<G: Grower> BrkMalloc<G> {
    /// # Safety
    /// Callers must make sure that the provided grower will be the only object
    /// managing it's underlying buffer for the lifetime of the returned allocator.
    pub const unsafe fn with_grower(grower: G) -> Self {
        BrkMalloc::with_lock(Mutex::new(HeapManager::with_grower(grower)))
    }
}

impl<G: Grower, L: HeapLock<HeapManager<G>>> BrkMalloc<G, L> {
    /// Wraps an already locked heap manager.
    pub const fn with_lock(lock: L) -> Self {
        BrkMalloc {
            inner: lock,
            _heap: PhantomData,
        }
    }

    /// See [`HeapManager::allocate`].
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.inner.with(|heap| heap.allocate(size))
    }

    /// See [`HeapManager::allocate_aligned`].
    pub fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
        self.inner.with(|heap| heap.allocate_aligned(size, align))
    }

    /// See [`HeapManager::zero_allocate`].
    pub fn zero_allocate(&self, count: usize, elem_size: usize) -> *mut u8 {
        self.inner.with(|heap| heap.zero_allocate(count, elem_size))
    }

    /// See [`HeapManager::reallocate`].
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this allocator.
    pub unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        self.inner.with(|heap| heap.reallocate(ptr, new_size))
    }

    /// See [`HeapManager::deallocate`].
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this allocator.
    pub unsafe fn deallocate(&self, ptr: *mut u8) {
        self.inner.with(|heap| heap.deallocate(ptr))
    }

    /// See [`HeapManager::usable_size`].
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this allocator.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        self.inner.with(|heap| heap.usable_size(ptr))
    }

    /// Runs `f` on the locked heap manager.
    ///
    /// `f` must not allocate through this allocator, which is the case as soon as
    /// it allocates anything while this allocator is the global allocator.
    pub fn inspect<R>(&self, f: impl FnOnce(&HeapManager<G>) -> R) -> R {
        self.inner.with(|heap| f(heap))
    }
}

//---------------impl GlobalAlloc for BrkMalloc---------------//

// Payloads are only ever HEADER_ALIGN-aligned, layouts asking for more
// are served by the system allocator. Every call routes on `layout.align()`
// so memory always goes back to the allocator it came from.
unsafe impl<G: Grower, L: HeapLock<HeapManager<G>>> GlobalAlloc for BrkMalloc<G, L> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match layout.align() > HEADER_ALIGN {
            true => System.alloc(layout),
            false => self.allocate(layout.size()),
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        match layout.align() > HEADER_ALIGN {
            true => System.alloc_zeroed(layout),
            false => self.zero_allocate(1, layout.size()),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        match layout.align() > HEADER_ALIGN {
            true => System.dealloc(ptr, layout),
            false => self.deallocate(ptr),
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        match layout.align() > HEADER_ALIGN {
            true => System.realloc(ptr, layout, new_size),
            false => self.reallocate(ptr, new_size),
        }
    }
}
