use crate::growers::ArenaGrower;
use crate::header::{block_extent, HEADER_ALIGN, HEADER_SIZE};

use super::*;

use std::cell::Cell;
use std::ffi::CStr;

use tracing::subscriber::DefaultGuard;


/// Logs the test's events, filtered by `RUST_LOG`
/// (e.g. `RUST_LOG=brk_malloc::allocators=debug`).
#[cfg(not(feature = "c_api"))]
fn init_logging() -> Option<DefaultGuard> {
    use self::format::SimpleFormatter;
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::fmt::Layer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::{EnvFilter, Registry};

    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(
            Layer::new()
                .with_test_writer()
                .with_span_events(FmtSpan::ENTER)
                .event_format(SimpleFormatter),
        );
    Some(tracing::subscriber::set_default(subscriber))
}

/// With the C symbols exported the subscriber would allocate through the process heap
/// while its lock is held, so tests run without logging.
#[cfg(feature = "c_api")]
fn init_logging() -> Option<DefaultGuard> {
    None
}

#[repr(C, align(16))]
struct Buf<const N: usize>([u8; N]);

impl<const N: usize> Buf<N> {
    fn new() -> Self {
        Buf([0; N])
    }

    fn heap(&mut self) -> HeapManager<ArenaGrower> {
        unsafe { HeapManager::with_grower(ArenaGrower::new(self.0.as_mut_ptr(), N)) }
    }
}

/// An arena whose heap end can be misreported and whose shrinks can be refused.
struct FaultyGrower {
    arena: ArenaGrower,
    end_offset: Cell<usize>,
    refuse_shrink: Cell<bool>,
}

impl FaultyGrower {
    fn new(arena: ArenaGrower) -> Self {
        FaultyGrower {
            arena,
            end_offset: Cell::new(0),
            refuse_shrink: Cell::new(false),
        }
    }
}

unsafe impl Grower for FaultyGrower {
    unsafe fn heap_end(&mut self) -> Option<NonNull<u8>> {
        let end = self.arena.heap_end()?;
        NonNull::new(end.as_ptr().wrapping_add(self.end_offset.get()))
    }

    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        self.arena.grow(size)
    }

    unsafe fn shrink(&mut self, size: usize) -> Result<(), ()> {
        match self.refuse_shrink.get() {
            true => Err(()),
            false => self.arena.shrink(size),
        }
    }
}

fn extent(size: usize) -> usize {
    block_extent(size).unwrap()
}

#[test]
fn test_1() {
    let _guard = init_logging();
    let mut buf = Buf::<4096>::new();
    let mut heap = buf.heap();

    let mut objects = vec![];
    for size in 1..=32 {
        let p = heap.allocate(size);
        assert!(!p.is_null());
        assert_eq!(p as usize % HEADER_ALIGN, 0);
        unsafe { p.write_bytes(size as u8, size) };
        objects.push((p, size));
    }

    for &(p, size) in &objects {
        for i in 0..size {
            assert_eq!(unsafe { *p.add(i) }, size as u8, "Blocks should not overlap.");
        }
    }

    let listed: Vec<(*const u8, usize)> = heap.blocks().map(|b| (b.payload, b.size)).collect();
    let expected: Vec<(*const u8, usize)> = objects.iter().map(|&(p, s)| (p as *const u8, s)).collect();
    assert_eq!(listed, expected, "Blocks should be listed in allocation order.");
}

#[test]
fn test_2() {
    let _guard = init_logging();
    let mut buf = Buf::<256>::new();
    let mut heap = buf.heap();

    assert!(heap.allocate(0).is_null());
    assert_eq!(heap.try_allocate(0), Err(AllocFailure::ZeroSize));
    assert!(heap.is_empty());
    assert!(heap.head().is_null());
    assert!(heap.tail().is_null());
    assert_eq!(heap.grower().used(), 0);
}

#[test]
fn test_3() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    let p1 = heap.allocate(20);
    let p2 = heap.allocate(40);
    assert!(!p1.is_null());
    assert!(!p2.is_null());
    assert_eq!(heap.blocks().count(), 2);
    let used = heap.grower().used();
    assert_eq!(used, extent(20) + extent(40));

    // p2 is topmost, it should vanish from the list and the heap should shrink.
    unsafe { heap.deallocate(p2) };
    assert_eq!(heap.blocks().count(), 1);
    assert!(heap.blocks().all(|b| b.payload != p2 as *const u8));
    assert_eq!(heap.grower().used(), used - extent(40));
    assert_eq!(heap.head(), heap.tail());
    assert!(heap.blocks().next().unwrap().next.is_null());
}

#[test]
fn test_4() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    let p1 = heap.allocate(24);
    let p2 = heap.allocate(64);
    assert!(!p2.is_null());

    unsafe { heap.deallocate(p1) };
    let first = heap.blocks().next().unwrap();
    assert_eq!(first.payload, p1 as *const u8);
    assert_eq!(first.size, 24);
    assert!(first.is_free, "A non-topmost block should only be marked free.");
    assert_eq!(heap.blocks().count(), 2);

    let used = heap.grower().used();
    let p3 = heap.allocate(24);
    assert_eq!(p3, p1, "A free block of the exact size should be reused.");
    assert!(!heap.blocks().next().unwrap().is_free);
    assert_eq!(heap.grower().used(), used);
}

#[test]
fn test_5() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    let p1 = heap.allocate(64);
    let _p2 = heap.allocate(16);
    unsafe { heap.deallocate(p1) };

    // No splitting: a larger free block is never used for a smaller request.
    let p3 = heap.allocate(32);
    assert_ne!(p3, p1);
    let p4 = heap.allocate(65);
    assert_ne!(p4, p1);

    let first = heap.blocks().next().unwrap();
    assert!(first.is_free);
    assert_eq!(first.size, 64);
    assert_eq!(heap.blocks().count(), 4);
}

#[test]
fn test_6() {
    let _guard = init_logging();
    let mut buf = Buf::<256>::new();
    let mut heap = buf.heap();

    let p = heap.allocate(100);
    assert!(!p.is_null());
    assert_eq!(heap.head(), heap.tail());

    unsafe { heap.deallocate(p) };
    assert!(heap.is_empty());
    assert!(heap.head().is_null());
    assert!(heap.tail().is_null());
    assert_eq!(heap.grower().used(), 0);

    // The heap is usable again from its very start.
    assert_eq!(heap.allocate(100), p);
}

#[test]
fn test_7() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    let a = heap.allocate(16);
    let b = heap.allocate(32);
    let c = heap.allocate(48);

    unsafe {
        heap.deallocate(b);
        heap.deallocate(c);
    }

    // c was unlinked, b became the tail but stays in the list as a free block.
    let blocks: Vec<BlockInfo> = heap.blocks().collect();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].payload, a as *const u8);
    assert_eq!(blocks[1].payload, b as *const u8);
    assert!(blocks[1].is_free);
    assert!(blocks[1].next.is_null());
    assert_eq!(heap.tail(), blocks[1].addr);

    assert_eq!(heap.allocate(32), b);

    // b is topmost now, freeing it shrinks the heap down to a.
    unsafe { heap.deallocate(b) };
    assert_eq!(heap.blocks().count(), 1);
    assert_eq!(heap.tail(), heap.head());
    assert_eq!(heap.grower().used(), extent(16));
}

#[test]
fn test_8() {
    let _guard = init_logging();
    let mut buf = Buf::<256>::new();
    let mut heap = buf.heap();

    let p = heap.allocate(256 - HEADER_SIZE);
    assert!(!p.is_null());
    assert_eq!(heap.grower().remaining(), 0);

    assert!(heap.allocate(1).is_null());
    assert_eq!(heap.try_allocate(1), Err(AllocFailure::Exhausted));
    assert_eq!(heap.try_allocate(usize::MAX), Err(AllocFailure::Overflow));

    // Failed growths leave no trace.
    assert_eq!(heap.blocks().count(), 1);
    assert_eq!(heap.head(), heap.tail());
    assert_eq!(heap.grower().used(), 256);
}

#[test]
fn test_9() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    let dirty = heap.allocate(20);
    unsafe { dirty.write_bytes(0xAA, 20) };
    let _barrier = heap.allocate(8);
    unsafe { heap.deallocate(dirty) };

    let p = heap.zero_allocate(5, 4);
    assert_eq!(p, dirty, "The dirty block should be reused.");
    let bytes = unsafe { core::slice::from_raw_parts(p, 20) };
    assert!(bytes.iter().all(|&b| b == 0));
    assert_eq!(unsafe { heap.usable_size(p) }, 20);
}

#[test]
fn test_10() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    assert!(heap.zero_allocate(0, 4).is_null());
    assert!(heap.zero_allocate(5, 0).is_null());
    assert!(heap.zero_allocate(usize::MAX, 2).is_null());
    assert!(heap.zero_allocate(usize::MAX / 2 + 1, 2).is_null());
    assert_eq!(heap.try_zero_allocate(0, 0), Err(AllocFailure::ZeroSize));
    assert_eq!(heap.try_zero_allocate(usize::MAX / 3, 4), Err(AllocFailure::Overflow));
    assert!(heap.is_empty());
    assert_eq!(heap.grower().used(), 0);
}

#[test]
fn test_11() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    let p = heap.allocate(16);
    for i in 0..16 {
        unsafe { *p.add(i) = i as u8 };
    }

    let q = unsafe { heap.reallocate(p, 48) };
    assert!(!q.is_null());
    assert_ne!(q, p);
    for i in 0..16 {
        assert_eq!(unsafe { *q.add(i) }, i as u8);
    }

    // The old block sits below the new one, so it is only marked free.
    let blocks: Vec<BlockInfo> = heap.blocks().collect();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].payload, p as *const u8);
    assert!(blocks[0].is_free);
    assert_eq!(blocks[1].payload, q as *const u8);
    assert_eq!(blocks[1].size, 48);
}

#[test]
fn test_12() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    let p = heap.allocate(64);
    unsafe { p.write_bytes(7, 64) };
    let used = heap.grower().used();

    unsafe {
        assert_eq!(heap.reallocate(p, 64), p);
        assert_eq!(heap.reallocate(p, 10), p);
        assert_eq!(heap.reallocate(p, 0), p);
        assert_eq!(heap.usable_size(p), 64, "Blocks should never shrink in place.");
        assert_eq!(*p.add(63), 7);
    }
    assert_eq!(heap.grower().used(), used);
}

#[test]
fn test_13() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    unsafe {
        assert!(heap.reallocate(core::ptr::null_mut(), 0).is_null());
        assert_eq!(
            heap.try_reallocate(core::ptr::null_mut(), 0),
            Err(AllocFailure::ZeroSize)
        );
        assert!(heap.is_empty());

        let p = heap.reallocate(core::ptr::null_mut(), 24);
        assert!(!p.is_null());
        assert_eq!(heap.usable_size(p), 24);
        assert_eq!(heap.blocks().count(), 1);
    }
}

#[test]
fn test_14() {
    let _guard = init_logging();
    let mut buf = Buf::<256>::new();
    let mut heap = buf.heap();

    let p = heap.allocate(100);
    unsafe { p.write_bytes(0x5A, 100) };

    let q = unsafe { heap.reallocate(p, 200) };
    assert!(q.is_null());
    assert_eq!(
        unsafe { heap.try_reallocate(p, 200) },
        Err(AllocFailure::Exhausted)
    );

    // The original block is untouched.
    let blocks: Vec<BlockInfo> = heap.blocks().collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].payload, p as *const u8);
    assert!(!blocks[0].is_free);
    let bytes = unsafe { core::slice::from_raw_parts(p, 100) };
    assert!(bytes.iter().all(|&b| b == 0x5A));
}

#[test]
fn test_15() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    let greeting = b"Hello Allocator!\0";
    let suffix = b" Extended.\0";

    let p = heap.allocate(20);
    assert!(!p.is_null());
    unsafe { core::ptr::copy_nonoverlapping(greeting.as_ptr(), p, greeting.len()) };

    let p = unsafe { heap.reallocate(p, 40) };
    assert!(!p.is_null());
    unsafe {
        let end = CStr::from_ptr(p.cast()).to_bytes().len();
        core::ptr::copy_nonoverlapping(suffix.as_ptr(), p.add(end), suffix.len());
        assert_eq!(
            CStr::from_ptr(p.cast()).to_str().unwrap(),
            "Hello Allocator! Extended."
        );
    }

    assert_eq!(heap.tail(), heap.blocks().last().unwrap().addr);
    unsafe { heap.deallocate(p) };
    assert!(heap.blocks().all(|b| b.payload != p as *const u8));
    assert_eq!(heap.blocks().count(), 1);
    assert!(heap.blocks().next().unwrap().is_free);
}

#[test]
fn test_16() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut heap = buf.heap();

    let p1 = heap.allocate(20);
    let _p2 = heap.allocate(40);
    unsafe { heap.deallocate(p1) };
    heap.log_blocks();

    let listing = heap.mem_list().to_string();
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        format!("head = {:p}, tail = {:p}", heap.head(), heap.tail())
    );
    assert!(lines[1].ends_with(&format!(
        "size = 20, is_free = true, next = {:p}",
        heap.tail()
    )));
    assert!(lines[2].ends_with("size = 40, is_free = false, next = 0x0"));
}

#[test]
fn test_17() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let mut arena = ArenaGrower::new(buf.0.as_mut_ptr(), 1024);

    {
        let mut heap = unsafe { HeapManager::with_grower(&mut arena) };
        assert!(!heap.allocate(10).is_null());
        assert!(!heap.allocate(10).is_null());
    }

    assert_eq!(arena.used(), 2 * extent(10));
}

#[test]
fn test_18() {
    let _guard = init_logging();
    let mut buf = Buf::<{ 64 * 1024 }>::new();
    let mut heap = buf.heap();

    let objects: Vec<(*mut u8, usize)> = (0..12)
        .flat_map(|i| [(1 << i), (1 << i) + 3])
        .map(|size| (heap.allocate(size), size))
        .collect();

    for &(p, size) in &objects {
        assert!(!p.is_null());
        unsafe { heap.deallocate(p) };
        assert_eq!(heap.allocate(size), p);
    }

    // Freeing from the top down gives everything back.
    for &(p, _) in objects.iter().rev() {
        unsafe { heap.deallocate(p) };
    }
    assert!(heap.is_empty());
    assert_eq!(heap.grower().used(), 0);
}

#[test]
fn test_19() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let arena = ArenaGrower::new(buf.0.as_mut_ptr(), 1024);
    let mut heap = unsafe { HeapManager::with_grower(FaultyGrower::new(arena)) };

    let a = heap.allocate(16);
    let b = heap.allocate(32);
    assert!(!a.is_null() && !b.is_null());
    let used = extent(16) + extent(32);

    // A refused shrink still unlinks the block, its memory is lost.
    heap.grower().refuse_shrink.set(true);
    unsafe { heap.deallocate(b) };
    assert_eq!(heap.blocks().count(), 1);
    assert_eq!(heap.head(), heap.tail());
    assert!(heap.blocks().next().unwrap().next.is_null());
    assert_eq!(heap.grower().arena.used(), used);

    heap.grower().refuse_shrink.set(false);
    let c = heap.allocate(32);
    assert_ne!(c, b, "The lost block should never come back.");
    assert_eq!(c as usize, b as usize + extent(32));
    assert_eq!(heap.grower().arena.used(), used + extent(32));

    // Shrinking works again once the grower allows it.
    unsafe { heap.deallocate(c) };
    assert_eq!(heap.grower().arena.used(), used);
}

#[test]
fn test_20() {
    let _guard = init_logging();
    let mut buf = Buf::<1024>::new();
    let arena = ArenaGrower::new(buf.0.as_mut_ptr(), 1024);
    let mut heap = unsafe { HeapManager::with_grower(FaultyGrower::new(arena)) };

    let a = heap.allocate(16);
    let b = heap.allocate(32);
    assert!(!a.is_null() && !b.is_null());
    let used = heap.grower().arena.used();

    // The tail no longer ends at the heap end, so it is only marked free.
    heap.grower().end_offset.set(HEADER_ALIGN);
    unsafe { heap.deallocate(b) };
    let blocks: Vec<(usize, bool)> = heap.blocks().map(|b| (b.size, b.is_free)).collect();
    assert_eq!(blocks, [(16, false), (32, true)]);
    assert_eq!(heap.grower().arena.used(), used);

    heap.grower().end_offset.set(0);
    assert_eq!(heap.allocate(32), b);
    unsafe { heap.deallocate(b) };
    assert_eq!(heap.blocks().count(), 1);
    assert_eq!(heap.grower().arena.used(), extent(16));
}

#[test]
fn test_21() {
    let _guard = init_logging();
    let mut buf = Buf::<4096>::new();
    let mut heap = buf.heap();

    let a = heap.allocate(8);
    let p = heap.allocate_aligned(40, 64);
    assert!(!p.is_null());
    assert_eq!(p as usize % 64, 0);
    assert_eq!(unsafe { heap.usable_size(p) }, 40);

    let q = heap.allocate_aligned(24, 256);
    assert!(!q.is_null());
    assert_eq!(q as usize % 256, 0);
    let r = heap.allocate_aligned(8, 16);
    assert!(!r.is_null());

    // Everything between the requested blocks is free padding.
    let taken = [a, p, q, r].map(|x| x as *const u8);
    for block in heap.blocks() {
        assert_eq!(!taken.contains(&block.payload), block.is_free);
    }

    assert_eq!(heap.try_allocate_aligned(8, 48), Err(AllocFailure::BadAlignment));
    assert_eq!(heap.try_allocate_aligned(0, 64), Err(AllocFailure::ZeroSize));

    // An aligned free block of the exact size is reused.
    unsafe { heap.deallocate(p) };
    assert_eq!(heap.allocate_aligned(40, 64), p);
}

#[test]
fn test_22() {
    let _guard = init_logging();
    let mut buf = Buf::<256>::new();
    let mut heap = buf.heap();

    // A padding block placed for a growth that then fails is given back.
    assert_eq!(heap.try_allocate_aligned(1000, 64), Err(AllocFailure::Exhausted));
    assert!(heap.is_empty());
    assert_eq!(heap.grower().used(), 0);

    let p = heap.allocate_aligned(16, 64);
    assert_eq!(p as usize % 64, 0);
    unsafe { heap.deallocate(p) };
    // The padding stays behind as a free block and the next aligned block needs none.
    assert!(heap.blocks().all(|b| b.is_free));
    assert_eq!(heap.allocate_aligned(16, 64), p);
}
