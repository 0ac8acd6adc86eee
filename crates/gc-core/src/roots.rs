//! Root registration (§4.4 roots 1 and 3, §9 "Local root registration").
//!
//! Two root kinds are modeled here:
//! - **Globals**: a flat list of static reference slots, registered once
//!   and visited on every collection (root 1).
//! - **Locals**: a per-thread shadow stack of object pointers, pushed and
//!   popped as a scope is entered and exited (root 3). Grounded in the
//!   teacher's `roots.rs` `ShadowStack` (a `Vec`-based push/pop-by-pointer
//!   list) rather than `handles/mod.rs`'s block-allocated `HandleScope`,
//!   since this crate doesn't need V8-style handle blocks — a scoped RAII
//!   guard around a per-thread `Vec` is enough to guarantee release on
//!   every exit path, including unwinding.
//!
//!   Collection always runs on one thread (either the dedicated collector
//!   or, inline, the sole mutator) while every *other* mutator is parked,
//!   so the thread running `trace_locals` is almost never the thread whose
//!   shadow stack it needs to read. Each thread's stack is therefore kept
//!   behind an `Arc` handle registered into `RootSet.locals`, keyed by
//!   `ThreadId`, so the tracing thread can reach every mutator's stack
//!   instead of only its own.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::thread::ThreadId;

use crate::object::ObjectHeader;
use crate::trace::Tracer;

/// A thread's local-root stack, behind its own lock so the collector
/// thread can read it while the owning thread is parked.
struct LocalStack(parking_lot::Mutex<Vec<NonNull<ObjectHeader>>>);

// SAFETY: access is serialised by the inner mutex; the `NonNull` pointers
// held point at heap objects owned by the runtime, not at thread-local
// state, so reading them from another thread is sound once that thread
// is parked (the only time `trace_locals` runs).
unsafe impl Send for LocalStack {}
unsafe impl Sync for LocalStack {}

thread_local! {
    static LOCAL_ROOTS: std::sync::Arc<LocalStack> =
        std::sync::Arc::new(LocalStack(parking_lot::Mutex::new(Vec::new())));
}

/// Global and per-thread-local roots fed to the tracer (§4.4).
#[derive(Default)]
pub struct RootSet {
    globals: parking_lot::Mutex<Vec<NonNull<ObjectHeader>>>,
    locals: parking_lot::Mutex<HashMap<ThreadId, std::sync::Arc<LocalStack>>>,
}

// SAFETY: access to `globals` and `locals` is serialised by their own
// mutexes; `NonNull` pointers inside point at heap objects owned by the
// runtime, not at thread-local state.
unsafe impl Send for RootSet {}
unsafe impl Sync for RootSet {}

impl RootSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            globals: parking_lot::Mutex::new(Vec::new()),
            locals: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// `def_local_ref`'s global counterpart: registers a static reference
    /// slot to be visited on every collection.
    pub fn register_global(&self, obj: NonNull<ObjectHeader>) {
        self.globals.lock().push(obj);
    }

    /// Unregisters a previously registered global slot.
    pub fn unregister_global(&self, obj: NonNull<ObjectHeader>) {
        let mut globals = self.globals.lock();
        if let Some(pos) = globals.iter().position(|&g| g == obj) {
            globals.swap_remove(pos);
        }
    }

    /// Root 1 (§4.4): the compiler-emitted `trace_all` equivalent — visits
    /// every registered global slot.
    pub(crate) fn trace_globals(&self, tracer: &mut Tracer) {
        for &obj in self.globals.lock().iter() {
            tracer.mark(obj);
        }
    }

    /// Registers the calling thread's shadow stack so `trace_locals` can
    /// reach it from whichever thread ends up running a collection —
    /// usually not this one. Idempotent: safe to call more than once for
    /// the same thread (`Runtime::register_thread` and
    /// `Runtime::def_local_ref` both call this, the latter so a thread
    /// that never registered as a mutator — the common single-threaded,
    /// no-collector-thread case — still has its stack discoverable).
    pub fn register_thread_locals(&self) {
        let handle = LOCAL_ROOTS.with(std::sync::Arc::clone);
        self.locals.lock().insert(std::thread::current().id(), handle);
    }

    /// Unregisters the calling thread's shadow stack.
    pub fn unregister_thread_locals(&self) {
        self.locals.lock().remove(&std::thread::current().id());
    }

    /// Root 3 (§4.4): visits every local reference registered on every
    /// registered thread's shadow stack, not just the calling thread's.
    /// Collection only ever runs with every other mutator parked, so this
    /// is safe to read concurrently with a parked thread's own (quiescent)
    /// stack.
    pub(crate) fn trace_locals(&self, tracer: &mut Tracer) {
        for stack in self.locals.lock().values() {
            for &obj in stack.0.lock().iter() {
                tracer.mark(obj);
            }
        }
    }
}

/// `def_local_ref(slot, value)` (§6) plus its scoped-release counterpart
/// from §9: pushes `obj` onto the current thread's shadow stack and pops
/// it again on drop, on every exit path including unwinding.
#[must_use = "a LocalRoot must be held for as long as the reference must stay rooted"]
pub struct LocalRoot {
    obj: NonNull<ObjectHeader>,
}

impl LocalRoot {
    /// Registers `obj` as a root of the current thread's call stack.
    pub fn new(obj: NonNull<ObjectHeader>) -> Self {
        LOCAL_ROOTS.with(|stack| stack.0.lock().push(obj));
        Self { obj }
    }

    /// The rooted object.
    #[must_use]
    pub fn get(&self) -> NonNull<ObjectHeader> {
        self.obj
    }
}

impl Drop for LocalRoot {
    fn drop(&mut self) {
        LOCAL_ROOTS.with(|stack| {
            let mut stack = stack.0.lock();
            if let Some(pos) = stack.iter().rposition(|&o| o == self.obj) {
                stack.swap_remove(pos);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Allocator;
    use crate::types::{TypeDescriptorSpec, TypeRegistry};

    fn leak_registry() -> &'static TypeRegistry {
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
            on_cleanup_fn: None,
            to_string_fn: None,
        }]);
        Box::leak(Box::new(registry))
    }

    #[test]
    fn local_root_unregisters_on_drop() {
        let registry = leak_registry();
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();

        {
            let _guard = LocalRoot::new(header);
            LOCAL_ROOTS.with(|stack| assert_eq!(stack.0.lock().len(), 1));
        }
        LOCAL_ROOTS.with(|stack| assert!(stack.0.lock().is_empty()));
    }

    #[test]
    fn global_root_is_traced() {
        let registry = leak_registry();
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();

        let roots = RootSet::new();
        roots.register_global(header);
        let mut tracer = Tracer::new();
        tracer.mark_from_roots(&roots, &[]);
        assert!(unsafe { header.as_ref() }.marked.get());
    }

    #[test]
    fn local_root_held_on_another_thread_is_traced_from_this_one() {
        // The whole point of `locals` being keyed by `ThreadId` rather
        // than read straight off `LOCAL_ROOTS`: a collection normally runs
        // on a thread other than the one holding the `LocalRoot`.
        let registry = leak_registry();
        let type_desc = NonNull::from(registry.get(0).unwrap());
        let allocator = Allocator::new();
        let header = allocator.allocate_object(type_desc, 16).unwrap();
        let addr = header.as_ptr() as usize;

        let roots = std::sync::Arc::new(RootSet::new());
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();

        let mutator_roots = std::sync::Arc::clone(&roots);
        let mutator = std::thread::spawn(move || {
            mutator_roots.register_thread_locals();
            let header = NonNull::new(addr as *mut ObjectHeader).unwrap();
            let _guard = LocalRoot::new(header);
            ready_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            mutator_roots.unregister_thread_locals();
        });

        ready_rx.recv().unwrap();
        let mut tracer = Tracer::new();
        tracer.mark_from_roots(&roots, &[]);
        assert!(unsafe { header.as_ref() }.marked.get());

        release_tx.send(()).unwrap();
        mutator.join().unwrap();
    }
}
