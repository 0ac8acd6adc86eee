//! The page pool (C1): fixed-size, page-aligned bump-allocated pages.
//!
//! Pages are obtained from the OS via [`gc_sys`] rather than the system
//! byte allocator, so every page starts life page-aligned for free — the
//! BiBOP layout this runtime's slab allocator (C2) relies on wants
//! page-aligned storage, and `mmap`/`VirtualAlloc` give that directly where
//! `std::alloc` would need an explicit over-aligned `Layout`.
//!
//! This module holds no lock of its own: the slab allocator (C2) is the
//! sole owner of the page list and serialises access to it with its own
//! mutex, per the concurrency model in the design doc.

use std::cell::Cell;
use std::io;
use std::ptr::NonNull;

use gc_sys::MmapOptions;

/// Size of every page handed out by the pool.
pub const PAGE_SIZE: usize = 4096;

/// A single bump-allocated page of raw bytes.
pub struct Page {
    mmap: gc_sys::Mmap,
    bump_offset: Cell<usize>,
}

impl Page {
    fn new() -> io::Result<Self> {
        // SAFETY: `map_anon` is unsafe only because it performs a raw OS
        // mapping call; the resulting `Mmap` owns the region for its
        // lifetime and we never hand out pointers past its `len()`.
        let mmap = unsafe { MmapOptions::new().len(PAGE_SIZE).map_anon()? };
        Ok(Self {
            mmap,
            bump_offset: Cell::new(0),
        })
    }

    /// Bytes remaining before the page is exhausted.
    #[must_use]
    pub fn remaining(&self) -> usize {
        PAGE_SIZE - self.bump_offset.get()
    }

    /// Bump-allocates `size` bytes from this page, rounded by the caller to
    /// whatever granularity it needs. Returns `None` if the page doesn't
    /// have `size` bytes left.
    pub fn bump_alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let offset = self.bump_offset.get();
        if size > PAGE_SIZE - offset {
            return None;
        }
        // SAFETY: offset + size <= PAGE_SIZE, within the mapped region.
        let ptr = unsafe { self.mmap.ptr().add(offset) };
        self.bump_offset.set(offset + size);
        NonNull::new(ptr)
    }
}

/// Owns every page ever handed out, in allocation order. Pages are never
/// returned to the OS until the pool itself is dropped (see the Open
/// Question decision in DESIGN.md: per-page reuse at sweep time is left
/// for a future implementer, matching the reference design).
#[derive(Default)]
pub struct PagePool {
    pages: Vec<Box<Page>>,
}

impl PagePool {
    #[must_use]
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// Maps a fresh page and returns a stable pointer to it. The pointer
    /// remains valid for the lifetime of the pool: pages are heap-boxed, so
    /// growing `self.pages` never relocates an already-handed-out `Page`.
    ///
    /// # Errors
    ///
    /// Propagates the underlying `mmap`/`VirtualAlloc` failure.
    pub fn allocate_page(&mut self) -> io::Result<NonNull<Page>> {
        let page = Box::new(Page::new()?);
        let ptr = NonNull::from(page.as_ref());
        self.pages.push(page);
        Ok(ptr)
    }

    /// Number of pages mapped so far.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Total bytes mapped so far (`page_count * PAGE_SIZE`).
    #[must_use]
    pub fn bytes_mapped(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_alloc_within_page() {
        let mut pool = PagePool::new();
        let page = unsafe { pool.allocate_page().unwrap().as_ref() };
        let a = page.bump_alloc(64).unwrap();
        let b = page.bump_alloc(64).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
        assert_eq!(page.remaining(), PAGE_SIZE - 128);
    }

    #[test]
    fn bump_alloc_fails_when_exhausted() {
        let mut pool = PagePool::new();
        let page = unsafe { pool.allocate_page().unwrap().as_ref() };
        assert!(page.bump_alloc(PAGE_SIZE + 1).is_none());
        assert!(page.bump_alloc(PAGE_SIZE).is_some());
        assert!(page.bump_alloc(1).is_none());
    }

    #[test]
    fn pool_tracks_page_count() {
        let mut pool = PagePool::new();
        assert_eq!(pool.page_count(), 0);
        pool.allocate_page().unwrap();
        pool.allocate_page().unwrap();
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.bytes_mapped(), 2 * PAGE_SIZE);
    }
}
