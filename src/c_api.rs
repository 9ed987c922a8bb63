//! C entry points overriding the process allocator (enabled with `--features c_api`).
//!
//! Build the `cdylib` with the feature enabled and preload it to route every
//! `malloc`, `free`, `calloc` and `realloc` of an unmodified program through
//! a process-wide [`BrkMalloc`] grown with `sbrk`:
//! ```text
//! LD_PRELOAD=target/release/libbrk_malloc.so ./program
//! ```
//!
//! The aligned entry points (`posix_memalign`, `aligned_alloc`, `memalign`, `valloc` and
//! `pvalloc`) are served from the same heap, so every pointer `free` sees came from it.

use core::ffi::c_int;
use core::fmt::{self, Write};
use core::ptr::null_mut;

use crate::growers::SbrkGrower;
use crate::BrkMalloc;

static ALLOCATOR: BrkMalloc<SbrkGrower> = unsafe { BrkMalloc::with_grower(SbrkGrower::new()) };

#[no_mangle]
pub unsafe extern "C" fn malloc(size: usize) -> *mut u8 {
    ALLOCATOR.allocate(size)
}

#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut u8) {
    ALLOCATOR.deallocate(ptr)
}

#[no_mangle]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut u8 {
    ALLOCATOR.zero_allocate(nmemb, size)
}

#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    ALLOCATOR.reallocate(ptr, size)
}

#[no_mangle]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut u8) -> usize {
    ALLOCATOR.usable_size(ptr)
}

#[no_mangle]
pub unsafe extern "C" fn posix_memalign(memptr: *mut *mut u8, alignment: usize, size: usize) -> c_int {
    if !alignment.is_power_of_two() || alignment % core::mem::size_of::<*mut u8>() != 0 {
        return libc::EINVAL;
    }

    let ptr = ALLOCATOR.allocate_aligned(size, alignment);
    if ptr.is_null() && size != 0 {
        return libc::ENOMEM;
    }

    *memptr = ptr;
    0
}

#[no_mangle]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut u8 {
    ALLOCATOR.allocate_aligned(size, alignment)
}

#[no_mangle]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut u8 {
    ALLOCATOR.allocate_aligned(size, alignment)
}

#[no_mangle]
pub unsafe extern "C" fn valloc(size: usize) -> *mut u8 {
    ALLOCATOR.allocate_aligned(size, page_size())
}

/// Like [`valloc`] with the size rounded up to a whole number of pages.
#[no_mangle]
pub unsafe extern "C" fn pvalloc(size: usize) -> *mut u8 {
    let page = page_size();
    match size.checked_add(page - 1) {
        Some(padded) => ALLOCATOR.allocate_aligned(padded & !(page - 1), page),
        None => null_mut(),
    }
}

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

/// Writes the block listing to stderr.
///
/// Formats into a stack buffer, one line at a time, so the dump never allocates.
#[no_mangle]
pub extern "C" fn brk_malloc_dump() {
    ALLOCATOR.inspect(|heap| {
        let mut line = LineBuf::new();
        let _ = writeln!(line, "head = {:p}, tail = {:p}", heap.head(), heap.tail());
        line.flush();
        for info in heap.blocks() {
            let _ = writeln!(
                line,
                "addr = {:p}, size = {}, is_free = {}, next = {:p}",
                info.addr, info.size, info.is_free, info.next
            );
            line.flush();
        }
    })
}

/// A fixed-size line buffer flushed to stderr, overlong lines are truncated.
struct LineBuf {
    buf: [u8; 256],
    len: usize,
}

impl LineBuf {
    const fn new() -> Self {
        LineBuf { buf: [0; 256], len: 0 }
    }

    fn flush(&mut self) {
        unsafe { libc::write(libc::STDERR_FILENO, self.buf.as_ptr().cast(), self.len) };
        self.len = 0;
    }
}

impl Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let n = s.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}
