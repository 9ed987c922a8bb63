//! A singlethreaded exact-fit heap manager.
//!
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Block extents
// Payloads must start on a `HEADER_ALIGN` boundary, so a block spans its header, its payload
// and enough padding to keep the next header aligned. The header only records the requested
// payload size, the extent is recomputed from it (see `header::block_extent`) whenever
// the heap grows or shrinks. Every grower request is a whole extent which keeps the heap end
// aligned at all times.
//
// ## Topmost blocks
// A block is released to the grower only if it is the list tail *and* it ends at the
// heap end. Both hold together unless someone else moved the heap end, in which case the
// block is simply marked free.

use crate::blocklist::BlockList;
use crate::error::AllocFailure;
use crate::growers::Grower;
use crate::header::{block_extent, BlockPtr, HEADER_ALIGN, HEADER_SIZE};
use crate::util::{find_divisible, raw_ptr};

use core::fmt;
use core::ptr::{copy_nonoverlapping, null, NonNull};

use tracing::{debug, error, instrument, warn, Level};

pub use self::blocks::{BlockInfo, Blocks, MemList};

mod blocks;

/// A single threaded memory allocator.
///
/// Owns the list of every block ever grown and the grower backing them.
/// All operations take `&mut self`, wrap the manager in a lock
/// (see [`BrkMalloc`](crate::BrkMalloc)) to share it between threads.
pub struct HeapManager<G: Grower> {
    blocks: BlockList,
    grower: G,
}

// Headers are only reachable through the manager.
unsafe impl<G: Grower + Send> Send for HeapManager<G> {}

impl<G: Grower> fmt::Debug for HeapManager<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapManager")
            .field("head", &self.head())
            .field("tail", &self.tail())
            .finish()
    }
}

impl<G: Grower> HeapManager<G> {
    /// Creates an allocator instance with the specified grower.
    ///
    /// # Safety
    /// Callers must make sure that the provided grower will be the only object
    /// managing it's underlying buffer for the lifetime of the returned allocator.
    pub const unsafe fn with_grower(grower: G) -> Self {
        HeapManager {
            blocks: BlockList::new(),
            grower,
        }
    }

    /// Returns the grower backing the heap.
    #[inline]
    pub fn grower(&self) -> &G {
        &self.grower
    }

    /// Allocates `size` bytes, aligned to [`HEADER_ALIGN`].
    /// Returns null if `size` is 0 or the heap could not grow.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        raw_ptr(self.try_allocate(size).ok())
    }

    /// Allocates `count * elem_size` zeroed bytes.
    /// Returns null if either factor is 0, their product overflows or the heap could not grow.
    #[inline]
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> *mut u8 {
        raw_ptr(self.try_zero_allocate(count, elem_size).ok())
    }

    /// Resizes the allocation at `ptr` to hold at least `new_size` bytes.
    /// Returns null if a new block was needed and could not be allocated,
    /// `ptr` stays valid and untouched in that case.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this manager.
    #[inline]
    pub unsafe fn reallocate(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        raw_ptr(self.try_reallocate(ptr, new_size).ok())
    }

    /// Same as [`allocate`](HeapManager::allocate) but reports why no memory was returned.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::DEBUG))]
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocFailure> {
        if size == 0 {
            return Err(AllocFailure::ZeroSize);
        }

        let block = match unsafe { self.blocks.find_exact(size) } {
            Some(block) => {
                unsafe { block.set_free(false) };
                debug!(?block, "Found free block of the exact size, reusing it.");
                block
            }
            None => {
                debug!("Couldn't find free block of the exact size, requesting heap growth.");
                self.grow_and_place(size)?
            }
        };

        Ok(block.payload())
    }

    /// Allocates `size` bytes at an address that is a multiple of `align`.
    /// Returns null if `size` is 0, `align` is not a power of two or the heap could not grow.
    #[inline]
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> *mut u8 {
        raw_ptr(self.try_allocate_aligned(size, align).ok())
    }

    /// Same as [`allocate_aligned`](HeapManager::allocate_aligned) but reports why no memory was returned.
    ///
    /// Alignments up to [`HEADER_ALIGN`] are plain allocations. Stricter ones reuse a free block
    /// of the exact size that happens to be aligned, or else grow the heap by a free padding
    /// block followed by the new block, so that the new payload lands on an `align` boundary.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::DEBUG))]
    pub fn try_allocate_aligned(
        &mut self,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, AllocFailure> {
        if !align.is_power_of_two() {
            return Err(AllocFailure::BadAlignment);
        }
        if align <= HEADER_ALIGN {
            return self.try_allocate(size);
        }
        if size == 0 {
            return Err(AllocFailure::ZeroSize);
        }

        let found = unsafe {
            self.blocks.iter().find(|&block| {
                block.is_free()
                    && block.size() == size
                    && block.payload().as_ptr() as usize % align == 0
            })
        };
        if let Some(block) = found {
            unsafe { block.set_free(false) };
            debug!(?block, "Found aligned free block of the exact size, reusing it.");
            return Ok(block.payload());
        }

        let pad = match self.padding_for(align)? {
            Some(pad_size) => Some(self.grow_and_place(pad_size)?),
            None => None,
        };
        if let Some(pad) = pad {
            unsafe { pad.set_free(true) };
            debug!(?pad, "Placed padding block.");
        }

        let block = match self.grow_and_place(size) {
            Ok(block) => block,
            Err(failure) => {
                if let Some(pad) = pad {
                    if unsafe { self.is_topmost(pad) } {
                        unsafe { self.release_topmost(pad) };
                    }
                }
                return Err(failure);
            }
        };

        let payload = block.payload();
        if payload.as_ptr() as usize % align != 0 {
            warn!(?block, "Heap end moved while placing an aligned block, giving it back.");
            unsafe { self.deallocate(payload.as_ptr()) };
            return Err(AllocFailure::Exhausted);
        }
        Ok(payload)
    }

    /// Returns the payload size of the free block to place before the next block so that
    /// the next payload is `align`-aligned, or `None` if it already is.
    fn padding_for(&mut self, align: usize) -> Result<Option<usize>, AllocFailure> {
        let Some(heap_end) = (unsafe { self.grower.heap_end() }) else {
            error!("Couldn't get heap end.");
            return Err(AllocFailure::Exhausted);
        };
        // Growers place blocks on the next HEADER_ALIGN boundary.
        let start = heap_end.as_ptr() as usize;
        let start = find_divisible(start, HEADER_ALIGN).ok_or(AllocFailure::Overflow)?;
        let payload = start.checked_add(HEADER_SIZE).ok_or(AllocFailure::Overflow)?;

        let misalign = payload.wrapping_neg() & (align - 1);
        if misalign == 0 {
            return Ok(None);
        }
        // The padding block spans at least a header, its extent must be congruent to misalign.
        let pad_extent = find_divisible(HEADER_SIZE.saturating_sub(misalign), align)
            .and_then(|rounds| rounds.checked_add(misalign))
            .ok_or(AllocFailure::Overflow)?;
        debug!(misalign, pad_extent, "Calculated padding.");
        Ok(Some(pad_extent - HEADER_SIZE))
    }

    /// Same as [`zero_allocate`](HeapManager::zero_allocate) but reports why no memory was returned.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::DEBUG))]
    pub fn try_zero_allocate(
        &mut self,
        count: usize,
        elem_size: usize,
    ) -> Result<NonNull<u8>, AllocFailure> {
        if count == 0 || elem_size == 0 {
            return Err(AllocFailure::ZeroSize);
        }
        let Some(size) = count.checked_mul(elem_size) else {
            debug!("Multiplication overflow, refusing to allocate.");
            return Err(AllocFailure::Overflow);
        };

        let payload = self.try_allocate(size)?;
        // Reused blocks still hold their previous contents.
        unsafe { payload.as_ptr().write_bytes(0, size) };
        Ok(payload)
    }

    /// Same as [`reallocate`](HeapManager::reallocate) but reports why no memory was returned.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this manager.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::DEBUG))]
    pub unsafe fn try_reallocate(
        &mut self,
        ptr: *mut u8,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocFailure> {
        let Some(payload) = NonNull::new(ptr) else {
            return self.try_allocate(new_size);
        };

        let block = BlockPtr::from_payload(payload);
        debug_assert!(!block.is_free(), "Reallocated blocks should be in use.");
        let size = block.size();

        if size >= new_size {
            debug!(size, "Block is already large enough, keeping it.");
            return Ok(payload);
        }

        let new_payload = self.try_allocate(new_size)?;
        copy_nonoverlapping(payload.as_ptr(), new_payload.as_ptr(), size.min(new_size));
        self.deallocate(payload.as_ptr());
        Ok(new_payload)
    }

    /// Frees the allocation at `ptr`. Null pointers are ignored.
    ///
    /// If the block is the last one before the heap end its memory is given back
    /// to the grower and the block ceases to exist, otherwise it is only marked free
    /// and stays available for requests of the exact same size.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this manager.
    /// Freeing a pointer twice or a pointer from elsewhere is undefined behavior.
    #[instrument(level = "info")]
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };
        let block = BlockPtr::from_payload(payload);

        debug_assert_eq!(
            ptr as usize % HEADER_ALIGN,
            0,
            "All allocations should have header alignment."
        );
        debug_assert!(!block.is_free(), "Block shouldn't be free already.");

        if self.is_topmost(block) {
            self.release_topmost(block);
        } else {
            block.set_free(true);
            debug!(?block, "Marked block as free.");
        }
    }

    /// Returns the number of bytes usable at `ptr`, which is the size it was allocated with.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this manager.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        match NonNull::new(ptr) {
            Some(payload) => BlockPtr::from_payload(payload).size(),
            None => 0,
        }
    }

    /// Grows the heap by the extent of a block with a `size`-byte payload
    /// and appends a new occupied block there.
    /// Returns `Err` if the heap can not grow, nothing is modified in that case.
    #[instrument(level = "debug", ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    fn grow_and_place(&mut self, size: usize) -> Result<BlockPtr, AllocFailure> {
        let Some(extent) = block_extent(size) else {
            error!("Growth failure, object is too big.");
            return Err(AllocFailure::Overflow);
        };
        debug!(extent, "Calculated growth amount.");

        let block_start = match unsafe { self.grower.grow(extent) } {
            Ok(p) => p,
            Err(()) => {
                error!("Growth failure, no memory.");
                return Err(AllocFailure::Exhausted);
            }
        };
        debug_assert_eq!(block_start.as_ptr() as usize % HEADER_ALIGN, 0);

        let block = unsafe { BlockPtr::create(block_start, size) };
        unsafe { self.blocks.push_back(block) };
        debug!(?block_start, "Heap growth successful, appended a new block.");
        Ok(block)
    }

    /// Returns whether `block` is the last block before the heap end.
    ///
    /// # Safety
    /// `block` must be part of the heap.
    unsafe fn is_topmost(&mut self, block: BlockPtr) -> bool {
        let Some(heap_end) = self.grower.heap_end() else {
            error!("Couldn't get heap end.");
            return false;
        };

        if block.end() != heap_end.as_ptr() {
            return false;
        }
        if self.blocks.tail() != Some(block) {
            warn!(?block, "Block ends at the heap end but isn't the tail, was the heap end moved?");
            return false;
        }
        true
    }

    /// Unlinks the tail block and gives its memory back to the grower.
    ///
    /// # Safety
    /// `block` must be the tail and end at the heap end.
    #[instrument(level = "debug")]
    unsafe fn release_topmost(&mut self, block: BlockPtr) {
        let extent = block.extent();

        let unlinked = self.blocks.pop_back();
        debug_assert_eq!(unlinked, Some(block));
        debug!(new_tail = ?self.blocks.tail(), "Unlinked topmost block.");

        // The block is gone from the list either way, a failed shrink just leaks it.
        match self.grower.shrink(extent) {
            Ok(()) => debug!(extent, "Heap shrunk."),
            Err(()) => error!(extent, "Shrink failure, the block's memory is lost."),
        }
    }

    /// Returns the address of the first block header or null if there are no blocks.
    #[inline]
    pub fn head(&self) -> *const u8 {
        self.blocks.head().map_or(null(), |b| b.as_ptr() as *const u8)
    }

    /// Returns the address of the most recently grown block header or null if there are no blocks.
    #[inline]
    pub fn tail(&self) -> *const u8 {
        self.blocks.tail().map_or(null(), |b| b.as_ptr() as *const u8)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns an iterator over every block from head to tail.
    #[inline]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(unsafe { self.blocks.iter() })
    }

    /// Returns a [`Display`](fmt::Display) adapter listing the head, the tail and every block.
    #[inline]
    pub fn mem_list(&self) -> MemList<'_, G> {
        MemList::new(self)
    }

    /// Emits the block listing as `debug` events.
    pub fn log_blocks(&self) {
        debug!(head = ?self.head(), tail = ?self.tail(), "Block list.");
        for info in self.blocks() {
            debug!(
                addr = ?info.addr,
                size = info.size,
                is_free = info.is_free,
                next = ?info.next,
                "Block."
            );
        }
    }
}

#[cfg(test)]
mod tests;
