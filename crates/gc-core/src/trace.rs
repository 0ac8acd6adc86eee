//! The tracer (C5): mark phase (§4.4).
//!
//! Marking uses the `marked` flag on [`ObjectHeader`](crate::object::ObjectHeader)
//! rather than the reference design's sign-bit overload (see DESIGN.md).
//! The mark stack is a plain `Vec`: the spec's non-goals explicitly
//! exclude concurrent marking, so there is no need for the teacher's
//! work-stealing deque — the tracer runs alone, on the collector thread,
//! while every mutator is parked.

use std::ptr::NonNull;

use crate::object::{Allocator, ObjectHeader};
use crate::roots::RootSet;

/// Drives the mark phase: walks roots, then the transitive reference
/// graph, flipping `marked` on each object it visits exactly once.
pub struct Tracer {
    worklist: Vec<NonNull<ObjectHeader>>,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            worklist: Vec::new(),
        }
    }

    /// `trace_fn(obj)` step 1-2 (§4.4): marks `obj` if not already marked
    /// and queues it for its own `trace_fn` to run. Returns immediately
    /// (without queuing) if already marked, matching the idempotence
    /// required by step 1.
    pub fn mark(&mut self, obj: NonNull<ObjectHeader>) {
        let header = unsafe { obj.as_ref() };
        if header.marked.get() {
            return;
        }
        header.marked.set(true);
        self.worklist.push(obj);
    }

    /// Drains the worklist, invoking each marked object's `trace_fn` (step
    /// 3: recurse into reference fields). New objects marked while tracing
    /// a referent are pushed back onto the same worklist, so the loop
    /// continues until the transitive closure is exhausted.
    pub fn drain(&mut self) {
        while let Some(obj) = self.worklist.pop() {
            let trace_fn = unsafe { obj.as_ref() }.type_desc().trace_fn;
            if let Some(trace_fn) = trace_fn {
                trace_fn(obj, self);
            }
        }
    }

    /// Marks every root and drains the worklist to completion: globals,
    /// pinned objects across every allocator, and thread-local roots
    /// (§4.4 roots 1-3).
    pub fn mark_from_roots(&mut self, roots: &RootSet, allocators: &[Allocator]) {
        roots.trace_globals(self);
        roots.trace_locals(self);
        for allocator in allocators {
            mark_pinned(self, &allocator.objects);
            mark_pinned(self, &allocator.objects_requiring_cleanup);
        }
        self.drain();
    }
}

/// Root 2 (§4.4): walks an intrusive list and marks any object with a
/// positive pin count that isn't marked yet.
fn mark_pinned(tracer: &mut Tracer, list: &crate::object::ObjectList) {
    let mut cursor = list.head();
    while let Some(header) = cursor {
        let header_ref = unsafe { header.as_ref() };
        if header_ref.reference_count() > 0 {
            tracer.mark(header);
        }
        cursor = NonNull::new(
            header_ref
                .next_object
                .load(std::sync::atomic::Ordering::Relaxed),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Allocator;
    use crate::types::{TypeDescriptorSpec, TypeRegistry};

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
    fn mark_is_idempotent() {
        let registry = leak_registry(vec![plain_spec()]);
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();

        let mut tracer = Tracer::new();
        tracer.mark(header);
        tracer.mark(header);
        assert_eq!(tracer.worklist.len(), 1, "marking twice must queue once");
    }

    #[test]
    fn pinned_objects_are_marked_as_roots() {
        let registry = leak_registry(vec![plain_spec()]);
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();
        unsafe { header.as_ref() }.retain();

        let roots = RootSet::new();
        let mut tracer = Tracer::new();
        tracer.mark_from_roots(&roots, std::slice::from_ref(&allocator));
        assert!(unsafe { header.as_ref() }.marked.get());
    }
}
