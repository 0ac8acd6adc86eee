//! The sweeper (C6, §4.5).
//!
//! Runs only on paused mutators. Split into two passes so a
//! [`crate::runtime::Runtime`] driving more than one allocator can run
//! resurrection tracing for every allocator, then the single global
//! weak-reference sweep (§4.6), before finishing any allocator's sweep —
//! otherwise an object in allocator A that resurrects an otherwise-dead
//! object in allocator B could have its weak references nulled before B's
//! own resurrection pass runs. Running the finalizers themselves (step 5)
//! is [`crate::finalize::run_finalizers`]'s job, kept in its own module
//! per the component table's C7/C6 split.

use std::ptr::NonNull;

use crate::object::{Allocator, ObjectHeader};
use crate::trace::Tracer;

/// One allocator's cleanup-list split, produced by
/// [`resurrect_cleanup_list`] and consumed by [`finish_sweep`] after the
/// global weak-sweep has run.
pub struct CleanupSplit {
    /// Entries that were marked or pinned: restored to the cleanup list.
    pub survivors: Vec<NonNull<ObjectHeader>>,
    /// Entries that were unreferenced: traced for resurrection here, handed
    /// to `finalize::run_finalizers` once the cycle's sweep finishes.
    pub unreferenced: Vec<NonNull<ObjectHeader>>,
}

/// Step 1 (§4.5): splits one allocator's cleanup-bearing list into
/// survivors and unreferenced entries, tracing the unreferenced ones now
/// so their transitive referents survive this cycle (resurrection). Does
/// not drain the tracer's worklist — the caller drains once, after every
/// allocator's resurrection pass has queued its marks, so a resurrected
/// object in one allocator can still keep an otherwise-dead referent in
/// another allocator alive.
pub fn resurrect_cleanup_list(allocator: &Allocator, tracer: &mut Tracer) -> CleanupSplit {
    let entries = allocator.objects_requiring_cleanup.drain_to_vec();
    let mut survivors = Vec::new();
    let mut unreferenced = Vec::new();
    for header in entries {
        let header_ref = unsafe { header.as_ref() };
        if header_ref.marked.get() || header_ref.reference_count() > 0 {
            header_ref.marked.set(false);
            survivors.push(header);
        } else {
            tracer.mark(header);
            unreferenced.push(header);
        }
    }
    CleanupSplit {
        survivors,
        unreferenced,
    }
}

/// What one allocator's finished sweep produced.
pub struct SweepOutcome {
    /// Objects that were unmarked and unpinned on the plain list: ready to
    /// be freed.
    pub freed: Vec<NonNull<ObjectHeader>>,
}

/// Steps 3-4 (§4.5): rebuilds the cleanup list from `survivors` (unmarking
/// was already done by [`resurrect_cleanup_list`]) and splits the plain
/// list into kept (unmarked back to the clear state) and freeable. Must
/// not run until the global weak-sweep (§4.6) has already run for this
/// cycle.
pub fn finish_sweep(allocator: &Allocator, survivors: Vec<NonNull<ObjectHeader>>) -> SweepOutcome {
    allocator.objects_requiring_cleanup.set_head(None);
    for header in survivors.into_iter().rev() {
        allocator.objects_requiring_cleanup.prepend(header);
    }

    let plain_entries = allocator.objects.drain_to_vec();
    let mut freed = Vec::new();
    let mut kept = Vec::new();
    for header in plain_entries {
        let header_ref = unsafe { header.as_ref() };
        if header_ref.marked.get() {
            header_ref.marked.set(false);
            kept.push(header);
        } else {
            freed.push(header);
        }
    }
    for header in kept.into_iter().rev() {
        allocator.objects.prepend(header);
    }

    SweepOutcome { freed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeDescriptorSpec, TypeRegistry};
    use crate::weakref::WeakRefManager;

    fn leak_registry(on_cleanup_fn: Option<crate::types::CleanupFn>) -> &'static TypeRegistry {
        let mut registry = TypeRegistry::empty();
        registry.configure(vec![TypeDescriptorSpec {
            name_index: 0,
            object_size: 16,
            allocator_id: 0,
            base_types: vec![],
            property_layout: vec![],
            trace_fn: None,
            init_object_fn: None,
            init_fn: None,
            on_cleanup_fn,
            to_string_fn: None,
        }]);
        Box::leak(Box::new(registry))
    }

    fn run_cycle(
        allocator: &Allocator,
        tracer: &mut Tracer,
        weak_refs: &WeakRefManager,
    ) -> SweepOutcome {
        let split = resurrect_cleanup_list(allocator, tracer);
        tracer.drain();
        weak_refs.sweep_unmarked();
        finish_sweep(allocator, split.survivors)
    }

    #[test]
    fn unmarked_plain_object_is_freed() {
        let registry = leak_registry(None);
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();

        let mut tracer = Tracer::new();
        let weak_refs = WeakRefManager::new();
        let outcome = run_cycle(&allocator, &mut tracer, &weak_refs);
        assert_eq!(outcome.freed, vec![header]);
        assert!(allocator.objects.head().is_none());
    }

    #[test]
    fn marked_plain_object_survives_and_unmarks() {
        let registry = leak_registry(None);
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();
        unsafe { header.as_ref() }.marked.set(true);

        let mut tracer = Tracer::new();
        let weak_refs = WeakRefManager::new();
        let outcome = run_cycle(&allocator, &mut tracer, &weak_refs);
        assert!(outcome.freed.is_empty());
        assert_eq!(allocator.objects.head(), Some(header));
        assert!(!unsafe { header.as_ref() }.marked.get());
    }

    #[test]
    fn unreferenced_cleanup_object_is_resurrected() {
        fn noop_cleanup(_h: NonNull<ObjectHeader>) {}
        let registry = leak_registry(Some(noop_cleanup));
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();

        let mut tracer = Tracer::new();
        let split = resurrect_cleanup_list(&allocator, &mut tracer);
        tracer.drain();
        assert_eq!(split.unreferenced, vec![header]);
        let weak_refs = WeakRefManager::new();
        weak_refs.sweep_unmarked();
        let outcome = finish_sweep(&allocator, split.survivors);
        assert!(outcome.freed.is_empty());
    }

    #[test]
    fn marked_cleanup_object_stays_on_cleanup_list() {
        fn noop_cleanup(_h: NonNull<ObjectHeader>) {}
        let registry = leak_registry(Some(noop_cleanup));
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();
        unsafe { header.as_ref() }.marked.set(true);

        let mut tracer = Tracer::new();
        let weak_refs = WeakRefManager::new();
        let outcome = run_cycle(&allocator, &mut tracer, &weak_refs);
        assert!(outcome.freed.is_empty());
        assert_eq!(allocator.objects_requiring_cleanup.head(), Some(header));
    }

    #[test]
    fn cross_allocator_resurrection_survives_global_weak_sweep_ordering() {
        fn noop_cleanup(_h: NonNull<ObjectHeader>) {}
        let registry = leak_registry(Some(noop_cleanup));
        let type_desc = NonNull::from(registry.get(0).unwrap());

        let allocator_a = Allocator::new();
        let allocator_b = Allocator::new();
        let header_a = allocator_a.allocate_object(type_desc, 16).unwrap();
        let header_b = allocator_b.allocate_object(type_desc, 16).unwrap();

        let weak_refs = WeakRefManager::new();
        let slot = weak_refs.register(header_b);

        let mut tracer = Tracer::new();
        // Allocator A's resurrection pass runs first and is the only thing
        // that marks B's object reachable again; if the weak-sweep ran
        // per-allocator instead of once globally, B's slot would already
        // have been nulled by the time A's pass marks it.
        let split_a = resurrect_cleanup_list(&allocator_a, &mut tracer);
        tracer.mark(header_b);
        let split_b = resurrect_cleanup_list(&allocator_b, &mut tracer);
        tracer.drain();
        weak_refs.sweep_unmarked();

        assert_eq!(unsafe { slot.as_ref() }.get(), Some(header_b));
        let _ = finish_sweep(&allocator_a, split_a.survivors);
        let _ = finish_sweep(&allocator_b, split_b.survivors);
        unsafe { weak_refs.unregister(slot) };
    }
}
