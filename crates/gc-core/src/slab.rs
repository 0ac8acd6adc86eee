//! The slab allocator (C2): segregated-fit free lists over bump-pointer
//! pages, per §4.1.
//!
//! Small requests are rounded up to a multiple of [`GRANULARITY`] and
//! routed to a free-list "slot" (`size / GRANULARITY`). Large requests
//! bypass the slab entirely and go straight to the system allocator.

use std::alloc::{alloc, dealloc, Layout};
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::lock_order::{LockGuard, LockOrder};
use crate::page::{Page, PagePool, PAGE_SIZE};

/// Allocation granularity: every small request is rounded up to a multiple
/// of this many bytes.
pub const GRANULARITY: usize = 8;

/// Requests larger than this many bytes bypass the slab and free-list
/// machinery entirely and go straight to the system allocator.
pub const SMALL_LIMIT: usize = 2048;

const NUM_SLOTS: usize = SMALL_LIMIT / GRANULARITY + 1;

fn round_up_to_granularity(size: usize) -> usize {
    (size + GRANULARITY - 1) & !(GRANULARITY - 1)
}

fn slot_for(size: usize) -> usize {
    size >> GRANULARITY.trailing_zeros()
}

/// A free block's storage doubles as an intrusive singly-linked free-list
/// node: the first machine word of a freed block stores the next free
/// block's address.
struct FreeListNode {
    next: Option<NonNull<FreeListNode>>,
}

struct SlabState {
    pool: PagePool,
    free_lists: Vec<Option<NonNull<FreeListNode>>>,
    current_page: Option<NonNull<Page>>,
}

// SAFETY: all access to `SlabState` is serialised by `Slab::state`'s mutex.
unsafe impl Send for SlabState {}

/// Per-size-class free lists backed by the page pool, plus a large-object
/// escape hatch. One mutex guards `free_lists` and `current_page`; large
/// allocations never take it (per the concurrency model in the design
/// doc).
pub struct Slab {
    state: Mutex<SlabState>,
    /// Bytes currently allocated through this slab (small + large),
    /// tracked for the GC trigger (C10). Uses relaxed atomics: small
    /// accounting races are accepted, per the design doc's Open Question
    /// decision.
    bytes_allocated: AtomicUsize,
}

impl Default for Slab {
    fn default() -> Self {
        Self::new()
    }
}

impl Slab {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlabState {
                pool: PagePool::new(),
                free_lists: vec![None; NUM_SLOTS],
                current_page: None,
            }),
            bytes_allocated: AtomicUsize::new(0),
        }
    }

    /// Total bytes currently allocated through this slab (small and large).
    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    /// Allocates `size` bytes, routing to the slab or the system allocator
    /// per §4.1. The returned memory is **not** zeroed; the caller (C4's
    /// `allocate_object`) is responsible for zeroing it.
    ///
    /// # Errors
    ///
    /// Returns an error if a new page could not be mapped, or (for large
    /// objects) if the system allocator returns null.
    pub fn allocate(&self, size: usize) -> io::Result<NonNull<u8>> {
        if size > SMALL_LIMIT {
            return self.allocate_large(size);
        }
        let ptr = self.allocate_small(round_up_to_granularity(size.max(GRANULARITY)))?;
        self.bytes_allocated.fetch_add(size, Ordering::Relaxed);
        Ok(ptr)
    }

    /// Frees a small object by pushing it back onto its slot's free list.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` with this exact `size`
    /// and must not be accessed again afterward.
    pub unsafe fn free_small(&self, ptr: NonNull<u8>, size: usize) {
        let slot = slot_for(round_up_to_granularity(size.max(GRANULARITY)));
        let _guard = LockGuard::new(LockOrder::Slab);
        let mut state = self.state.lock();
        let node = ptr.cast::<FreeListNode>();
        unsafe {
            node.as_ptr().write(FreeListNode {
                next: state.free_lists[slot],
            });
        }
        state.free_lists[slot] = Some(node);
        self.bytes_allocated.fetch_sub(size, Ordering::Relaxed);
    }

    /// Frees a large object via the system allocator.
    ///
    /// # Safety
    ///
    /// `ptr`/`size`/`align` must match a prior `allocate_large` call exactly.
    pub unsafe fn free_large(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        let layout = Layout::from_size_align(size, align).expect("invalid large-object layout");
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }
        self.bytes_allocated.fetch_sub(size, Ordering::Relaxed);
    }

    fn allocate_small(&self, size: usize) -> io::Result<NonNull<u8>> {
        let slot = slot_for(size);
        let _guard = LockGuard::new(LockOrder::Slab);
        let mut state = self.state.lock();

        // Step 1: pop the free list for this slot.
        if let Some(node) = state.free_lists[slot] {
            state.free_lists[slot] = unsafe { node.as_ref().next };
            return Ok(node.cast::<u8>());
        }

        // Step 2: bump-allocate from the current page.
        if let Some(page) = state.current_page {
            if let Some(ptr) = unsafe { page.as_ref() }.bump_alloc(size) {
                return Ok(ptr);
            }
        }

        // Step 3: scavenge the current page's tail into smaller slots
        // before giving up on it, so the remaining space isn't wasted.
        if let Some(page) = state.current_page {
            Self::scavenge(unsafe { page.as_ref() }, slot, &mut state.free_lists);
        }

        // Step 4: map a new page and bump-allocate from it; this cannot
        // fail for any size within SMALL_LIMIT since PAGE_SIZE > SMALL_LIMIT.
        let new_page = state.pool.allocate_page()?;
        state.current_page = Some(new_page);
        let ptr = unsafe { new_page.as_ref() }
            .bump_alloc(size)
            .expect("a fresh page must fit any small-object request");
        Ok(ptr)
    }

    /// For each smaller slot `s` from `slot - 1` down to `1`, bump-allocate
    /// `s`-sized blocks from `page`'s remaining tail while one fits, and
    /// push each onto that slot's free list. Reclaims a page's tail before
    /// it's abandoned for a fresh one.
    fn scavenge(page: &Page, slot: usize, free_lists: &mut [Option<NonNull<FreeListNode>>]) {
        for s in (1..slot).rev() {
            let block_size = s * GRANULARITY;
            while let Some(ptr) = page.bump_alloc(block_size) {
                let node = ptr.cast::<FreeListNode>();
                unsafe {
                    node.as_ptr().write(FreeListNode {
                        next: free_lists[s],
                    });
                }
                free_lists[s] = Some(node);
            }
        }
    }

    fn allocate_large(&self, size: usize) -> io::Result<NonNull<u8>> {
        let layout = Layout::from_size_align(size, align_for(size))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: layout has nonzero size (large objects exceed SMALL_LIMIT > 0).
        let raw = unsafe { alloc(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            io::Error::new(io::ErrorKind::OutOfMemory, "system allocator returned null")
        })?;
        self.bytes_allocated.fetch_add(size, Ordering::Relaxed);
        Ok(ptr)
    }

    /// Number of pages mapped so far across this slab's page pool.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.state.lock().pool.page_count()
    }

    /// Frees a block of `size` bytes, routing to the small or large path
    /// the same way `allocate` would have for that same `size`. Symmetric
    /// counterpart to `allocate`, so callers never need to duplicate the
    /// `SMALL_LIMIT` routing decision or the large-object alignment policy.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate(size)` on this slab and
    /// must not be accessed again afterward.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if size > SMALL_LIMIT {
            unsafe { self.free_large(ptr, size, align_for(size)) };
        } else {
            unsafe { self.free_small(ptr, size) };
        }
    }
}

fn align_for(size: usize) -> usize {
    // Large objects get pointer alignment; sufficient for any header or
    // payload this runtime places at their start.
    size.min(PAGE_SIZE).next_power_of_two().min(std::mem::align_of::<usize>().max(8))
}
