//! Guard-paged stack regions for fibers.
//!
//! Each fiber gets its own `mmap`-backed stack: a leading `PROT_NONE` guard
//! page to turn stack overflow into a `SIGSEGV` instead of silent
//! corruption of whatever memory happens to sit below it, followed by the
//! writable region the fiber actually runs on.

use std::io;
use std::ptr;

use once_cell::sync::Lazy;

/// Default fiber stack size: 8 pages.
pub const DEFAULT_STACK_PAGES: usize = 8;

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    // Safety: sysconf with _SC_PAGESIZE never fails on a sane host.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as usize
    } else {
        4096
    }
});

/// Returns the OS page size, queried once via `sysconf` and cached.
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// An `mmap`-backed stack region with a guard page.
pub struct Stack {
    mmap_base: *mut libc::c_void,
    mmap_len: usize,
    /// Highest usable address, 16-byte aligned, handed to the context
    /// switch as the initial stack pointer basis.
    top: usize,
}

impl Stack {
    /// Allocates a new stack of at least `usable_bytes`, rounded up to a
    /// whole number of pages, plus one leading guard page.
    pub fn new(usable_bytes: usize) -> io::Result<Stack> {
        let page = page_size();
        let usable = (usable_bytes.max(page) + page - 1) & !(page - 1);
        let mmap_len = usable + page;

        // Safety: MAP_ANONYMOUS | MAP_PRIVATE with a null address lets the
        // kernel pick the mapping; we only ever read the returned pointer.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mmap_len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Safety: `base` is a fresh mapping of `mmap_len` bytes; we make
        // everything but the guard page read/write.
        let writable = unsafe { (base as *mut u8).add(page) };
        let rc = unsafe {
            libc::mprotect(
                writable.cast(),
                usable,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            // Safety: undoes the mmap above on the failure path.
            unsafe { libc::munmap(base, mmap_len) };
            return Err(err);
        }

        let top = (base as usize + mmap_len) & !0xf;
        Ok(Stack {
            mmap_base: base,
            mmap_len,
            top,
        })
    }

    /// Highest 16-byte-aligned address of the stack: the value a brand new
    /// fiber's context is initialized relative to.
    pub fn top(&self) -> usize {
        self.top
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // Safety: `mmap_base`/`mmap_len` describe exactly the mapping made
        // in `Stack::new`, and this is the only place that unmaps it.
        unsafe {
            libc::munmap(self.mmap_base, self.mmap_len);
        }
    }
}
