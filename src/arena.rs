//! Per-fiber bump allocator with bulk reset.
//!
//! Every fiber owns exactly one [`Arena`]. All dynamic memory a fiber uses —
//! parsed headers, duplicated strings, formatting scratch space — is
//! allocated from it, and released in one motion when the fiber ends
//! ([`Arena::reset`]). There is no per-object `free`; the arena is a chain
//! of fixed-capacity [`Page`]s and allocation is first-fit bump allocation
//! across that chain.
//!
//! This generalizes a per-fiber allocation list freed entry-by-entry
//! (`runtime_alloc`/`runtime_cleanup`) into one page chain reset in bulk.

use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::mem;
use std::ptr::{self, NonNull};

use crate::error::{Error, Result};
use crate::fiber::page_size as os_page_size;

/// Requests larger than this are rejected outright rather than risking
/// overflow when a page's capacity is doubled to accommodate them.
pub const PAGE_MAX: usize = 1 << 30;

struct Page {
    buf: NonNull<u8>,
    capacity: usize,
    len: usize,
    next: Option<Box<Page>>,
}

impl Page {
    fn new(capacity: usize) -> Result<Box<Page>> {
        let layout = Layout::from_size_align(capacity, mem::align_of::<usize>())
            .map_err(|_| Error::Oom("page layout overflow"))?;
        // Safety: layout has non-zero size (capacity > 0 is an invariant of
        // every call site in this module).
        let ptr = unsafe { alloc::alloc(layout) };
        let buf = NonNull::new(ptr).ok_or(Error::Oom("page allocation failed"))?;
        Ok(Box::new(Page {
            buf,
            capacity,
            len: 0,
            next: None,
        }))
    }

    fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    /// # Safety
    /// `size` must be `<= self.remaining()`.
    unsafe fn bump(&mut self, size: usize) -> NonNull<u8> {
        let ptr = self.buf.as_ptr().add(self.len);
        self.len += size;
        // Safety: buf + len is within the page's allocation by construction.
        unsafe { NonNull::new_unchecked(ptr) }
    }

    fn layout(&self) -> Layout {
        Layout::from_size_align(self.capacity, mem::align_of::<usize>()).unwrap()
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        // Safety: `buf` was allocated with the same layout in `Page::new`,
        // and this is the only place that frees it.
        unsafe { alloc::dealloc(self.buf.as_ptr(), self.layout()) };
    }
}

/// Records of every successful allocation since the last reset, so
/// [`Arena::alloc_count`] can be checked by tests without poking at page
/// internals.
#[derive(Default)]
struct Blocks {
    count: usize,
    /// `(page_index, offset, size)` of the single most recent allocation,
    /// used by `realloc` to detect the in-place-growth fast path.
    last: Option<(usize, usize, usize)>,
}

struct Inner {
    head: Box<Page>,
    blocks: Blocks,
}

/// A page-chained bump allocator, private to a single fiber.
///
/// `alloc` never zeroes memory. `reset` drops every page after the first
/// and zeroes the head page's length (not its bytes) so the very next
/// allocation after a reset returns the same pointer the first allocation
/// ever returned — this is relied on by fiber/arena reuse (§8 of the
/// design: "Arena reuse across fibers").
pub struct Arena {
    inner: RefCell<Inner>,
}

impl Arena {
    /// Creates an arena whose head page has the default capacity (the OS
    /// page size).
    pub fn new() -> Result<Arena> {
        Self::with_capacity(os_page_size())
    }

    /// Creates an arena whose head page has the given capacity.
    pub fn with_capacity(capacity: usize) -> Result<Arena> {
        let head = Page::new(capacity.max(1))?;
        Ok(Arena {
            inner: RefCell::new(Inner {
                head,
                blocks: Blocks::default(),
            }),
        })
    }

    /// Allocates `size` bytes, aligned to at least `align_of::<usize>()`.
    /// The returned pointer is valid until the next [`Arena::reset`] (or
    /// until the arena is dropped).
    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        if size == 0 {
            return Ok(NonNull::dangling());
        }
        if size > PAGE_MAX {
            return Err(Error::Oom("allocation exceeds PAGE_MAX"));
        }
        let size = align_up(size, mem::align_of::<usize>());

        let mut inner = self.inner.borrow_mut();

        // First-fit across the page chain.
        let mut page_index = 0usize;
        let mut page = &mut *inner.head;
        loop {
            if page.remaining() >= size {
                let offset = page.len;
                // Safety: just checked `remaining() >= size`.
                let ptr = unsafe { page.bump(size) };
                inner.blocks.count += 1;
                inner.blocks.last = Some((page_index, offset, size));
                return Ok(ptr);
            }
            if page.next.is_some() {
                page = page.next.as_mut().unwrap();
                page_index += 1;
                continue;
            }
            break;
        }

        // No page had room: grow the chain.
        let new_capacity = (inner.head.capacity.max(size)).saturating_mul(2);
        if new_capacity > PAGE_MAX {
            return Err(Error::Oom("arena growth would exceed PAGE_MAX"));
        }
        let mut new_page = Page::new(new_capacity.max(size))?;
        // Safety: new_page.remaining() == new_page.capacity >= size.
        let ptr = unsafe { new_page.bump(size) };

        // Append at the tail.
        let mut tail = &mut *inner.head;
        let mut index = 0usize;
        while tail.next.is_some() {
            tail = tail.next.as_mut().unwrap();
            index += 1;
        }
        tail.next = Some(new_page);
        inner.blocks.count += 1;
        inner.blocks.last = Some((index + 1, 0, size));
        Ok(ptr)
    }

    /// Resizes a previous allocation.
    ///
    /// If `old` was the arena's single most recent allocation *and* the new
    /// size still fits within its page, grows in place and returns the same
    /// pointer. Otherwise, copies the first `old_size` bytes into a fresh
    /// allocation and returns that — the old slot's bytes remain readable
    /// until the next [`Arena::reset`], but are no longer tracked.
    ///
    /// This always-copy-when-not-most-recent behavior is a deliberate
    /// choice (see DESIGN.md) rather than a more elaborate free-list scheme.
    pub fn realloc(&self, old: NonNull<u8>, old_size: usize, new_size: usize) -> Result<NonNull<u8>> {
        if new_size <= old_size {
            return Ok(old);
        }

        let grow_in_place = {
            let mut inner = self.inner.borrow_mut();
            match inner.blocks.last {
                Some((page_idx, offset, size)) if size == align_up(old_size, mem::align_of::<usize>()) => {
                    let mut page = &mut *inner.head;
                    for _ in 0..page_idx {
                        page = page.next.as_mut().unwrap();
                    }
                    let page_ptr = page.buf.as_ptr();
                    // Safety: offset was recorded for this exact page.
                    let recorded = unsafe { page_ptr.add(offset) };
                    if recorded == old.as_ptr() {
                        let extra = align_up(new_size, mem::align_of::<usize>())
                            - align_up(old_size, mem::align_of::<usize>());
                        if page.remaining() >= extra {
                            // Safety: just checked remaining() >= extra.
                            unsafe { page.bump(extra) };
                            inner.blocks.last = Some((page_idx, offset, new_size));
                            true
                        } else {
                            false
                        }
                    } else {
                        false
                    }
                }
                _ => false,
            }
        };

        if grow_in_place {
            return Ok(old);
        }

        let new_ptr = self.alloc(new_size)?;
        // Safety: both ranges are valid for `old_size` bytes (caller's
        // contract: `old_size` is the size `old` was allocated/grown with).
        unsafe {
            ptr::copy_nonoverlapping(old.as_ptr(), new_ptr.as_ptr(), old_size);
        }
        Ok(new_ptr)
    }

    /// Drops every page after the first and zeroes the head page's length.
    /// Called automatically when a fiber ends; safe to call at any other
    /// time too (e.g. between requests on a long-lived fiber).
    pub fn reset(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.head.next = None;
        inner.head.len = 0;
        inner.blocks = Blocks::default();
    }

    /// Number of successful allocations since the last reset. An in-place
    /// `realloc` does not count as a new allocation; a copying one does.
    #[cfg(test)]
    pub fn alloc_count(&self) -> usize {
        self.inner.borrow().blocks.count
    }
}

fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_reuses_the_first_pointer() {
        let arena = Arena::with_capacity(256).unwrap();
        let first = arena.alloc(16).unwrap();
        arena.alloc(16).unwrap();
        arena.reset();
        let after_reset = arena.alloc(16).unwrap();
        assert_eq!(first, after_reset);
    }

    #[test]
    fn block_count_tracks_allocations_not_in_place_growth() {
        let arena = Arena::with_capacity(256).unwrap();
        let a = arena.alloc(8).unwrap();
        assert_eq!(arena.alloc_count(), 1);
        let grown = arena.realloc(a, 8, 16).unwrap();
        assert_eq!(a, grown, "in-place growth must return the same pointer");
        assert_eq!(arena.alloc_count(), 1, "in-place growth isn't a new allocation");

        arena.alloc(8).unwrap();
        let b = arena.alloc(8).unwrap();
        // b is no longer the most recent allocation once another alloc
        // intervenes between it and the realloc below, so this must copy.
        arena.alloc(8).unwrap();
        let copied = arena.realloc(b, 8, 32).unwrap();
        assert_ne!(b, copied);
        assert_eq!(arena.alloc_count(), 5, "copying realloc counts as a new allocation");
    }

    #[test]
    fn page_growth_doubles_and_fits_the_request() {
        let arena = Arena::with_capacity(64).unwrap();
        arena.alloc(32).unwrap();
        // Doesn't fit in the remaining 32 bytes of the 64-byte head page.
        let big = arena.alloc(100).unwrap();
        assert!(!big.as_ptr().is_null());
    }

    #[test]
    fn zero_sized_allocations_are_free() {
        let arena = Arena::with_capacity(64).unwrap();
        arena.alloc(0).unwrap();
        assert_eq!(arena.alloc_count(), 1);
    }
}
