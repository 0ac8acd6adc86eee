//! The object model (C4): object header layout, allocation entry point,
//! retain/release pinning (§4.2).

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::slab::Slab;
use crate::types::TypeDescriptor;

/// Prefix of every managed allocation (§3).
///
/// `marked` replaces the reference design's sign-bit overload on
/// `object_size`: see the Redesign decision recorded in DESIGN.md. It is a
/// plain `Cell<bool>`, not atomic, because marking only ever runs while
/// mutators are parked (no concurrent marking, per §1's non-goals).
#[repr(C)]
pub struct ObjectHeader {
    /// Stable pointer into the type registry; descriptors never move.
    pub type_desc: NonNull<TypeDescriptor>,
    /// Allocation size in bytes, as written by `allocate_object`.
    pub object_size: u32,
    /// Reachability flag, set during mark and cleared during sweep.
    pub marked: Cell<bool>,
    /// Pin count; positive values root the object independent of the
    /// reference graph (§4.2).
    pub reference_count: AtomicUsize,
    /// Intrusive link threading this object into its allocator's
    /// `objects` or `objects_requiring_cleanup` list.
    pub next_object: AtomicPtr<ObjectHeader>,
    /// True while this header is linked into `objects_requiring_cleanup`
    /// rather than `objects`.
    pub on_cleanup_list: Cell<bool>,
}

impl ObjectHeader {
    /// Type descriptor this object was allocated with.
    #[must_use]
    pub fn type_desc(&self) -> &TypeDescriptor {
        // SAFETY: type descriptors are immutable and outlive every object
        // allocated against them (the registry is never torn down while
        // any allocator holding its objects is still alive).
        unsafe { self.type_desc.as_ref() }
    }

    /// Current pin count.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.reference_count.load(Ordering::Acquire)
    }

    /// `retain(obj)` (§4.2): increments the pin count.
    pub fn retain(&self) {
        self.reference_count.fetch_add(1, Ordering::AcqRel);
    }

    /// `release(obj)` (§4.2): decrements the pin count, clamped at zero.
    pub fn release(&self) {
        let _ = self
            .reference_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });
    }
}

/// A live-object list: `objects` or `objects_requiring_cleanup` (§3).
/// Insertion is a lock-free CAS-prepend (§5); traversal during a
/// collection cycle is exclusive to the collector, since mutators are
/// parked for the whole cycle.
#[derive(Default)]
pub struct ObjectList {
    head: AtomicPtr<ObjectHeader>,
}

impl ObjectList {
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Prepends `header` onto this list with a CAS loop. Lock-free: the
    /// only multithreaded mutation of these lists (§5).
    pub fn prepend(&self, header: NonNull<ObjectHeader>) {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            unsafe {
                header.as_ref().next_object.store(current, Ordering::Relaxed);
            }
            match self.head.compare_exchange_weak(
                current,
                header.as_ptr(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Replaces the list head outright. Used only by the collector, which
    /// owns the list exclusively during a cycle (mutators are parked).
    pub fn set_head(&self, head: Option<NonNull<ObjectHeader>>) {
        self.head.store(
            head.map_or(std::ptr::null_mut(), NonNull::as_ptr),
            Ordering::Release,
        );
    }

    /// Current head, if any.
    #[must_use]
    pub fn head(&self) -> Option<NonNull<ObjectHeader>> {
        NonNull::new(self.head.load(Ordering::Acquire))
    }

    /// Drains the list into a `Vec`, following `next_object` links,
    /// leaving the list empty. Only safe to call while the collector
    /// exclusively owns the list (mutators parked).
    pub fn drain_to_vec(&self) -> Vec<NonNull<ObjectHeader>> {
        let mut out = Vec::new();
        let mut cursor = self.head();
        self.set_head(None);
        while let Some(header) = cursor {
            cursor = NonNull::new(unsafe { header.as_ref() }.next_object.load(Ordering::Relaxed));
            out.push(header);
        }
        out
    }
}

/// Owns one allocator instance's pages, free lists, and live-object lists
/// (§3). Type descriptors route to an allocator via `allocator_id`.
pub struct Allocator {
    pub slab: Slab,
    pub objects: ObjectList,
    pub objects_requiring_cleanup: ObjectList,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slab: Slab::new(),
            objects: ObjectList::new(),
            objects_requiring_cleanup: ObjectList::new(),
        }
    }

    /// `allocate_object(type, size)` (§4.2), minus the GC-trigger check
    /// (C10), which the caller (`Runtime::allocate_object`) performs first.
    ///
    /// Obtains `size` bytes, zeroes them, writes the header, and links the
    /// object onto the appropriate list based on whether `type_desc` has a
    /// cleanup function.
    ///
    /// # Errors
    ///
    /// Propagates an allocator failure (page mapping or system allocator
    /// exhaustion).
    pub fn allocate_object(
        &self,
        type_desc: NonNull<TypeDescriptor>,
        size: u32,
    ) -> std::io::Result<NonNull<ObjectHeader>> {
        let has_cleanup = unsafe { type_desc.as_ref() }.has_cleanup();
        let header_layout_size = std::mem::size_of::<ObjectHeader>();
        let total = header_layout_size + size as usize;
        let raw = self.slab.allocate(total)?;

        // SAFETY: `raw` is fresh, uninitialized, and large enough for the
        // header; the payload bytes that follow are zeroed separately.
        unsafe {
            std::ptr::write_bytes(raw.as_ptr(), 0, total);
            let header_ptr = raw.cast::<ObjectHeader>();
            header_ptr.as_ptr().write(ObjectHeader {
                type_desc,
                object_size: size,
                marked: Cell::new(false),
                reference_count: AtomicUsize::new(0),
                next_object: AtomicPtr::new(std::ptr::null_mut()),
                on_cleanup_list: Cell::new(has_cleanup),
            });

            if has_cleanup {
                self.objects_requiring_cleanup.prepend(header_ptr);
            } else {
                self.objects.prepend(header_ptr);
            }

            Ok(header_ptr)
        }
    }

    /// Reclaims a header produced by `allocate_object` back to the
    /// allocator it came from. Routes to the slab's small or large free
    /// path based on the total allocation size, mirroring the routing
    /// `allocate_object` used to obtain it.
    ///
    /// # Safety
    ///
    /// `header` must have been returned by `allocate_object` on this same
    /// allocator and must not be reachable or referenced again afterward.
    pub unsafe fn free_object(&self, header: NonNull<ObjectHeader>) {
        let object_size = unsafe { header.as_ref() }.object_size as usize;
        let total = std::mem::size_of::<ObjectHeader>() + object_size;
        unsafe {
            self.slab.free(header.cast::<u8>(), total);
        }
    }

    /// Shutdown-only counterpart to the regular mark-and-sweep path:
    /// unconditionally drains and frees every object on both lists,
    /// ignoring `marked` and `reference_count` entirely, running
    /// cleanup-bearing objects' `on_cleanup_fn` first (mirrors
    /// `finalize::run_finalizers`'s invocation, minus the reachability
    /// check that function makes). Cleanup callbacks run before the plain
    /// list drains, so any object they allocate lands on `objects` and is
    /// still caught by the second drain.
    ///
    /// # Safety
    ///
    /// Must only be called once every mutator is known to be stopped for
    /// good (`quit()`'s shutdown sequence) and nothing still holds a
    /// reference to any object owned by this allocator.
    pub unsafe fn free_all(&self) {
        for header in self.objects_requiring_cleanup.drain_to_vec() {
            let header_ref = unsafe { header.as_ref() };
            if let Some(on_cleanup_fn) = header_ref.type_desc().on_cleanup_fn {
                on_cleanup_fn(header);
            }
            unsafe { self.free_object(header) };
        }
        for header in self.objects.drain_to_vec() {
            unsafe { self.free_object(header) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptorSpec;
    use crate::types::TypeRegistry;

    fn leak_registry(specs: Vec<TypeDescriptorSpec>) -> &'static TypeRegistry {
        let mut registry = TypeRegistry::empty();
        registry.configure(specs);
        Box::leak(Box::new(registry))
    }

    fn plain_spec() -> TypeDescriptorSpec {
        TypeDescriptorSpec {
            name_index: 0,
            object_size: 16,
            allocator_id: 0,
            base_types: vec![],
            property_layout: vec![],
            trace_fn: None,
            init_object_fn: None,
            init_fn: None,
            on_cleanup_fn: None,
            to_string_fn: None,
        }
    }

    #[test]
    fn allocate_object_links_plain_objects() {
        let registry = leak_registry(vec![plain_spec()]);
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();
        assert_eq!(allocator.objects.head(), Some(header));
        assert!(allocator.objects_requiring_cleanup.head().is_none());
    }

    #[test]
    fn allocate_object_links_cleanup_bearing_objects() {
        fn noop_cleanup(_h: NonNull<ObjectHeader>) {}
        let mut spec = plain_spec();
        spec.on_cleanup_fn = Some(noop_cleanup);
        let registry = leak_registry(vec![spec]);
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();
        assert_eq!(allocator.objects_requiring_cleanup.head(), Some(header));
        assert!(allocator.objects.head().is_none());
    }

    #[test]
    fn retain_release_clamp_at_zero() {
        let registry = leak_registry(vec![plain_spec()]);
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();
        let header_ref = unsafe { header.as_ref() };
        header_ref.release();
        assert_eq!(header_ref.reference_count(), 0);
        header_ref.retain();
        header_ref.retain();
        header_ref.release();
        assert_eq!(header_ref.reference_count(), 1);
    }

    #[test]
    fn free_object_returns_memory_to_the_slab() {
        let registry = leak_registry(vec![plain_spec()]);
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let bytes_before = allocator.slab.bytes_allocated();
        let header = allocator.allocate_object(type_desc, 16).unwrap();
        assert!(allocator.slab.bytes_allocated() > bytes_before);
        unsafe { allocator.free_object(header) };
        assert_eq!(allocator.slab.bytes_allocated(), bytes_before);
    }

    #[test]
    fn free_all_reclaims_pinned_and_rooted_objects_regardless_of_reachability() {
        let registry = leak_registry(vec![plain_spec()]);
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let bytes_before = allocator.slab.bytes_allocated();

        let header = allocator.allocate_object(type_desc, 16).unwrap();
        unsafe { header.as_ref() }.retain();
        unsafe { header.as_ref() }.marked.set(true);

        unsafe { allocator.free_all() };

        assert_eq!(allocator.slab.bytes_allocated(), bytes_before);
        assert!(allocator.objects.head().is_none());
    }

    #[test]
    fn free_all_runs_cleanup_callbacks_before_freeing() {
        use std::sync::atomic::{AtomicUsize as AU, Ordering as Ord};
        static CLEANUP_RUNS: AU = AU::new(0);
        fn counting_cleanup(_h: NonNull<ObjectHeader>) {
            CLEANUP_RUNS.fetch_add(1, Ord::SeqCst);
        }

        let mut spec = plain_spec();
        spec.on_cleanup_fn = Some(counting_cleanup);
        let registry = leak_registry(vec![spec]);
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        allocator.allocate_object(type_desc, 16).unwrap();
        allocator.allocate_object(type_desc, 16).unwrap();

        let before = CLEANUP_RUNS.load(Ord::SeqCst);
        unsafe { allocator.free_all() };
        assert_eq!(CLEANUP_RUNS.load(Ord::SeqCst) - before, 2);
        assert!(allocator.objects_requiring_cleanup.head().is_none());
    }
}
