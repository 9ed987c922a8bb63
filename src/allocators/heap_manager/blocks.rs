//! Read-only views of the block list, for debugging.

use core::fmt;
use core::ptr::null;

use super::HeapManager;
use crate::blocklist::Iter;
use crate::growers::Grower;

/// A snapshot of one block header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the header.
    pub addr: *const u8,
    /// Address handed out to the caller.
    pub payload: *const u8,
    pub size: usize,
    pub is_free: bool,
    /// Address of the next header or null for the tail.
    pub next: *const u8,
}

/// Iterator over the blocks of a [`HeapManager`], from head to tail.
pub struct Blocks<'a> {
    inner: Iter<'a>,
}

impl<'a> Blocks<'a> {
    pub(super) fn new(inner: Iter<'a>) -> Self {
        Blocks { inner }
    }
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let block = self.inner.next()?;
        // The manager is borrowed for the iterator's lifetime so every block is alive.
        unsafe {
            Some(BlockInfo {
                addr: block.as_ptr() as *const u8,
                payload: block.payload().as_ptr(),
                size: block.size(),
                is_free: block.is_free(),
                next: block.next().map_or(null(), |n| n.as_ptr() as *const u8),
            })
        }
    }
}

/// Lists the head and tail addresses followed by one line per block.
///
/// ```text
/// head = 0x5581c2a4d000, tail = 0x5581c2a4d040
/// addr = 0x5581c2a4d000, size = 20, is_free = false, next = 0x5581c2a4d040
/// addr = 0x5581c2a4d040, size = 40, is_free = false, next = 0x0
/// ```
pub struct MemList<'a, G: Grower> {
    heap: &'a HeapManager<G>,
}

impl<'a, G: Grower> MemList<'a, G> {
    pub(super) fn new(heap: &'a HeapManager<G>) -> Self {
        MemList { heap }
    }
}

impl<G: Grower> fmt::Display for MemList<'_, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "head = {:p}, tail = {:p}", self.heap.head(), self.heap.tail())?;
        for info in self.heap.blocks() {
            writeln!(
                f,
                "addr = {:p}, size = {}, is_free = {}, next = {:p}",
                info.addr, info.size, info.is_free, info.next
            )?;
        }
        Ok(())
    }
}
