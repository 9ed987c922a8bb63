//! The [`HeapManager`] and [`BrkMalloc`] allocators.

pub mod brk_malloc;
pub mod heap_manager;

pub use brk_malloc::BrkMalloc;
pub use heap_manager::HeapManager;
