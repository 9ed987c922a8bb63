//! A break-pointer backed memory allocator with exact-size block reuse.
//!
//! The allocator keeps every block it ever created in one contiguous heap
//! grown and shrunk at its end, in the manner of the classic `sbrk` allocators.
//! It is deliberately simple: no splitting, no merging, no size classes and a
//! single lock around everything.
//!
//! # Usage
//! ```
//! use brk_malloc::BrkMalloc;
//! use brk_malloc::growers::SbrkGrower;
//!
//! #[global_allocator]
//! static ALLOCATOR: BrkMalloc<SbrkGrower> = unsafe { BrkMalloc::with_grower(SbrkGrower::new()) };
//!
//! fn main() {
//!     let v1: Vec<u32> = vec![1, 2, 3];
//!     println!("Brk is cool {:?}", v1);
//! }
//! ```
//!
//! An allocator can just as well be local and operate on any buffer:
//! ```
//! use brk_malloc::BrkMalloc;
//! use brk_malloc::growers::ArenaGrower;
//!
//! let mut buf = vec![0_u8; 4096];
//! let allocator = unsafe { BrkMalloc::with_grower(ArenaGrower::new(buf.as_mut_ptr(), buf.len())) };
//!
//! let p = allocator.zero_allocate(5, 4);
//! assert!(!p.is_null());
//! unsafe { allocator.deallocate(p) };
//! ```
//!
//! # Allocators
//! Two allocators are exported by this crate - [`HeapManager`]
//! and [`BrkMalloc`]. [`HeapManager`] is the single-threaded core and takes `&mut self`,
//! [`BrkMalloc`] wraps it in a [`HeapLock`] (a `std::sync::Mutex` by default)
//! and can be used as a global allocator.
//!
//! # Mode of operation
//! ## Blocks
//! The heap is divided into blocks. Each block starts with a header holding the payload size
//! that was requested when the block was created, whether the block is free and a link to the
//! next block. The payload follows the header immediately and is what callers get a pointer to.
//! Headers are [`HEADER_ALIGN`]-aligned and [`HEADER_SIZE`] bytes long, so every payload is
//! [`HEADER_ALIGN`]-aligned too.
//!
//! ## Block list
//! All blocks, free or not, are chained in creation order. Since blocks are only created
//! by growing the heap, creation order is also address order and the list tail is always
//! the block closest to the heap end.
//!
//! ## Allocation
//! The list is scanned from the head for a free block whose size is *exactly* the requested
//! size. A block of any other size is never reused, even if it is larger. When no block
//! matches, the heap grows by one block and the new block becomes the tail.
//!
//! ## Deallocation
//! If the freed block ends exactly at the heap end it is unlinked and the heap shrinks,
//! giving the memory back. Any other block is only marked free.
//!
//! ## Growers
//! A grower is the allocators' underlying storage, a buffer that can grow and shrink
//! at its end. [`SbrkGrower`] moves the program break, [`ArenaGrower`] carves a caller-provided
//! buffer. Anything implementing [`Grower`] can back an allocator.
//!
//! # Caveats
//! * The program break is process-wide state. An [`SbrkGrower`]-backed allocator must be the
//!   only thing moving it: a foreign `sbrk` between the moment a block is found to be topmost
//!   and the moment the heap shrinks corrupts the heap.
//! * Freeing a pointer twice, or a pointer that did not come from the allocator, is
//!   undefined behavior and is not detected.
//! * Every failure is reported as a null pointer, the `try_*` methods of [`HeapManager`]
//!   return the reason as an [`AllocFailure`].
//!
//! [`SbrkGrower`]: growers::SbrkGrower
//! [`ArenaGrower`]: growers::ArenaGrower
//! [`Grower`]: growers::Grower
//! [`HeapLock`]: locks::HeapLock

pub use crate::allocators::BrkMalloc;
pub use crate::allocators::HeapManager;
pub use crate::error::AllocFailure;
pub use crate::header::{HEADER_ALIGN, HEADER_SIZE};

pub mod allocators;
mod blocklist;
#[cfg(all(feature = "c_api", unix))]
pub mod c_api;
mod error;
pub mod growers;
mod header;
pub mod locks;
mod util;
