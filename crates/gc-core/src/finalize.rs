//! The finalization manager (C7, §4.5 step 5, §4.7).
//!
//! Finalizers run in intrusive-list order, after the sweep of the same
//! cycle and before any allocation from the next one (§5 ordering
//! guarantees). Each ran-once finalizable object is reinserted onto the
//! plain `objects` list with its header otherwise untouched; the object
//! will be collected on a future cycle like any other plain object once it
//! becomes unreachable again.

use std::ptr::NonNull;

use crate::object::{Allocator, ObjectHeader};

/// Runs `on_cleanup_fn` on every object in `unreferenced_on_cleanup`, in
/// list order, then moves each onto `allocator.objects`. Objects allocated
/// by a finalizer land on the live lists via the normal allocation path
/// and are therefore automatically excluded from this cycle (§4.7).
pub fn run_finalizers(unreferenced_on_cleanup: Vec<NonNull<ObjectHeader>>, allocator: &Allocator) {
    for header in unreferenced_on_cleanup {
        let header_ref = unsafe { header.as_ref() };
        if let Some(on_cleanup_fn) = header_ref.type_desc().on_cleanup_fn {
            on_cleanup_fn(header);
        }
        header_ref.on_cleanup_list.set(false);
        allocator.objects.prepend(header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeDescriptorSpec, TypeRegistry};
    use std::cell::Cell;
    use std::ptr::NonNull as StdNonNull;

    thread_local! {
        static CLEANUP_CALLS: Cell<u32> = const { Cell::new(0) };
    }

    fn counting_cleanup(_h: StdNonNull<ObjectHeader>) {
        CLEANUP_CALLS.with(|c| c.set(c.get() + 1));
    }

    #[test]
    fn finalizer_runs_once_and_reinserts_on_plain_list() {
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
            on_cleanup_fn: Some(counting_cleanup),
            to_string_fn: None,
        }]);

        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();
        allocator.objects_requiring_cleanup.drain_to_vec();

        run_finalizers(vec![header], &allocator);

        assert_eq!(CLEANUP_CALLS.with(Cell::get), 1);
        assert_eq!(allocator.objects.head(), Some(header));
        assert!(!unsafe { header.as_ref() }.on_cleanup_list.get());
    }
}
