//! The runtime handle (C12, §2 supplement, §9 "Global mutable state").
//!
//! Encapsulates every piece of C1-C11's mutable state in one owned value
//! instead of process-wide statics, so tests (and embedders that need more
//! than one isolated collector) construct `Runtime::new()` directly
//! (grounded in the teacher's `thread_local! { static HEAP }` pattern,
//! generalized from a single global to an owned handle per the Open
//! Question decision recorded in DESIGN.md).

use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::GcConfig;
use crate::error::{GcError, GcResult};
use crate::metrics::{CollectionType, GcMetrics};
use crate::object::{Allocator, ObjectHeader};
use crate::roots::{LocalRoot, RootSet};
use crate::safepoint::SafepointCoordinator;
use crate::singleton;
use crate::sweep;
use crate::trace::Tracer;
use crate::trigger::Trigger;
use crate::types::{TypeDescriptorSpec, TypeRegistry};
use crate::weakref::{WeakRefManager, WeakSlot};
use crate::{finalize, tracing_support};

/// A zero-argument lifecycle hook, as registered by `on_gc_begin`,
/// `on_gc_trace_finished`, and `on_gc_end` (§6).
pub type Callback = fn();

#[derive(Default)]
struct Callbacks {
    on_gc_begin: Vec<Callback>,
    on_gc_trace_finished: Vec<Callback>,
    on_gc_end: Vec<Callback>,
}

/// The process-wide (or, for tests, per-instance) runtime handle (§6).
///
/// Built in two phases: construct with [`Runtime::new`] or
/// [`Runtime::new_with_config`] and call [`Runtime::configure_types`]
/// while you still have unique ownership (it needs `&mut self` — types
/// never move or mutate again afterward, per invariant 3), then wrap in
/// an `Arc` and call [`Runtime::configure_gc`] to start the collector
/// thread shared across mutators.
pub struct Runtime {
    types: TypeRegistry,
    allocators: Vec<Allocator>,
    weak_refs: WeakRefManager,
    roots: RootSet,
    trigger: Trigger,
    config: Mutex<GcConfig>,
    safepoint: SafepointCoordinator,
    metrics: Mutex<GcMetrics>,
    callbacks: Mutex<Callbacks>,
    collector_running: AtomicBool,
    collector_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// A runtime with the default configuration (§11): a 16 MiB trigger
    /// threshold, logging off.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_config(GcConfig::default())
    }

    /// A runtime with an explicit configuration.
    #[must_use]
    pub fn new_with_config(config: GcConfig) -> Self {
        Self {
            types: TypeRegistry::empty(),
            allocators: Vec::new(),
            weak_refs: WeakRefManager::new(),
            roots: RootSet::new(),
            trigger: Trigger::new(config.threshold_bytes),
            config: Mutex::new(config),
            safepoint: SafepointCoordinator::new(),
            metrics: Mutex::new(GcMetrics::new()),
            callbacks: Mutex::new(Callbacks::default()),
            collector_running: AtomicBool::new(false),
            collector_handle: Mutex::new(None),
        }
    }

    /// `configure_types()` (§4.3, §6): consumes the compiler-emitted type
    /// table and sizes one [`Allocator`] per distinct `allocator_id`.
    ///
    /// # Panics
    ///
    /// Panics if called more than once (delegated to
    /// [`TypeRegistry::configure`]).
    pub fn configure_types(&mut self, specs: Vec<TypeDescriptorSpec>) {
        self.types.configure(specs);
        let allocator_count = self.types.max_allocator_id().map_or(0, |id| id as usize + 1);
        self.allocators = (0..allocator_count).map(|_| Allocator::new()).collect();
    }

    /// `configure_gc()` (§6): spawns the dedicated collector thread. A
    /// runtime that never calls this still collects correctly — `collect`
    /// just runs the cycle inline on the calling thread instead of
    /// handshaking with a background collector, which is adequate for
    /// single-threaded embedders and most tests.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::CollectorThreadSpawnFailed`] if the thread spawn
    /// syscall fails (§7: fatal, but surfaced here as a `Result` so the
    /// host decides how to terminate).
    pub fn configure_gc(self: &Arc<Self>) -> GcResult<()> {
        let runtime = Arc::clone(self);
        let runtime_for_cycle = Arc::clone(self);
        let runtime_for_shutdown = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("gc-collector".to_owned())
            .spawn(move || {
                runtime.safepoint.run_collector_loop(
                    || runtime_for_cycle.run_one_cycle(),
                    || runtime_for_shutdown.free_all_allocators(),
                );
            })
            .map_err(GcError::CollectorThreadSpawnFailed)?;
        *self.collector_handle.lock() = Some(handle);
        self.collector_running.store(true, Ordering::Release);
        Ok(())
    }

    /// `quit()` (§6): drains mutator threads, runs a final collection plus
    /// two drain sweeps, then unconditionally frees every object still
    /// remaining in every allocator regardless of reachability, and joins
    /// the collector thread. A no-op on a runtime that never called
    /// `configure_gc`.
    pub fn quit(&self) {
        if !self.collector_running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.safepoint.request_shutdown();
        if let Some(handle) = self.collector_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// `enter()` (§4.8, §6).
    pub fn enter(&self) {
        self.safepoint.enter();
    }

    /// `exit()` (§4.8, §6).
    pub fn exit(&self) {
        self.safepoint.exit();
    }

    /// `gc_check()` (§4.8, §6).
    pub fn gc_check(&self) {
        self.safepoint.gc_check();
    }

    /// Registers the calling thread as a mutator counted toward the
    /// collector's handshake. Call once per mutator thread before it does
    /// any allocation or `gc_check`.
    pub fn register_thread(&self) {
        self.safepoint.register_thread();
        self.roots.register_thread_locals();
    }

    /// Unregisters the calling thread (IP7: `entered` must have returned
    /// to zero).
    pub fn unregister_thread(&self) {
        self.safepoint.unregister_thread();
        self.roots.unregister_thread_locals();
    }

    /// `def_local_ref(slot, value)` (§6): roots `obj` on the calling
    /// thread's shadow stack for as long as the returned guard is held.
    ///
    /// Registers the calling thread's shadow stack with `roots` first
    /// (idempotent): a thread that never called `register_thread` — the
    /// common case for a single-threaded embedder with no collector
    /// thread — still needs its stack discoverable by whichever thread
    /// ends up tracing it.
    #[must_use]
    pub fn def_local_ref(&self, obj: NonNull<ObjectHeader>) -> LocalRoot {
        self.roots.register_thread_locals();
        LocalRoot::new(obj)
    }

    /// Registers a global root slot (the non-scoped counterpart of
    /// `def_local_ref`).
    pub fn register_global_root(&self, obj: NonNull<ObjectHeader>) {
        self.roots.register_global(obj);
    }

    /// Unregisters a previously registered global root slot.
    pub fn unregister_global_root(&self, obj: NonNull<ObjectHeader>) {
        self.roots.unregister_global(obj);
    }

    /// `allocate_object(type, size)` (§4.2, §6). `size` comes from the
    /// type descriptor; callers select the type, not a size, since object
    /// sizes are fixed per type in this object model.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::AllocationExhausted`] if the allocator still
    /// cannot satisfy the request after a forced collection (§7).
    ///
    /// # Panics
    ///
    /// Panics if `type_index` is out of range or `configure_types` has not
    /// run yet.
    pub fn allocate_object(&self, type_index: u32) -> GcResult<NonNull<ObjectHeader>> {
        let type_desc = self
            .types
            .get(type_index)
            .expect("allocate_object: unknown type index, or configure_types not called");
        let type_ptr = NonNull::from(type_desc);
        let allocator = &self.allocators[type_desc.allocator_id as usize];

        if self.trigger.is_due() {
            self.collect(false);
        }

        let header = match allocator.allocate_object(type_ptr, type_desc.object_size) {
            Ok(header) => header,
            Err(_) => {
                self.collect(true);
                allocator
                    .allocate_object(type_ptr, type_desc.object_size)
                    .map_err(|_| GcError::AllocationExhausted {
                        requested: type_desc.object_size as usize,
                    })?
            }
        };

        self.trigger
            .charge(size_of::<ObjectHeader>() + type_desc.object_size as usize);
        Ok(header)
    }

    /// `retain(obj)` (§4.2, §6).
    pub fn retain(&self, obj: NonNull<ObjectHeader>) {
        unsafe { obj.as_ref() }.retain();
    }

    /// `release(obj)` (§4.2, §6).
    pub fn release(&self, obj: NonNull<ObjectHeader>) {
        unsafe { obj.as_ref() }.release();
    }

    /// `instance_of(obj, T)` (§4.2).
    #[must_use]
    pub fn instance_of(&self, obj_type_index: u32, type_index: u32) -> bool {
        self.types.instance_of(obj_type_index, type_index)
    }

    /// Registers a weak reference to `referent` (§4.2, §4.6).
    pub fn register_weak(&self, referent: NonNull<ObjectHeader>) -> NonNull<WeakSlot> {
        self.weak_refs.register(referent)
    }

    /// Unregisters a weak reference.
    ///
    /// # Safety
    ///
    /// See [`WeakRefManager::unregister`].
    pub unsafe fn unregister_weak(&self, slot: NonNull<WeakSlot>) {
        unsafe { self.weak_refs.unregister(slot) };
    }

    /// `singleton(type)` (§4.9, §6).
    ///
    /// # Errors
    ///
    /// Propagates allocation failure from the backing allocator.
    ///
    /// # Panics
    ///
    /// Panics if `type_index` is out of range.
    pub fn singleton(&self, type_index: u32) -> std::io::Result<NonNull<ObjectHeader>> {
        let type_desc = self
            .types
            .get(type_index)
            .expect("singleton: unknown type index");
        let type_ptr = NonNull::from(type_desc);
        let allocator = &self.allocators[type_desc.allocator_id as usize];
        singleton::singleton(type_desc, allocator, type_ptr)
    }

    /// `gc_threshold` setter (§6, §11). Takes effect on the next cycle
    /// reset; also resets the countdown immediately.
    pub fn set_threshold(&self, threshold_bytes: usize) {
        self.trigger.set_threshold(threshold_bytes);
        self.config.lock().threshold_bytes = threshold_bytes;
    }

    /// `gc_logging` setter (§6, §11).
    pub fn set_logging(&self, logging: bool) {
        self.config.lock().logging = logging;
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> GcConfig {
        *self.config.lock()
    }

    /// Registers an `on_gc_begin` callback (§6), invoked in registration
    /// order at the start of every cycle.
    pub fn on_gc_begin(&self, callback: Callback) {
        self.callbacks.lock().on_gc_begin.push(callback);
    }

    /// Registers an `on_gc_trace_finished` callback (§6), invoked right
    /// after marking and resurrection tracing complete, before the global
    /// weak-sweep.
    pub fn on_gc_trace_finished(&self, callback: Callback) {
        self.callbacks.lock().on_gc_trace_finished.push(callback);
    }

    /// Registers an `on_gc_end` callback (§6), invoked after finalizers
    /// have run.
    pub fn on_gc_end(&self, callback: Callback) {
        self.callbacks.lock().on_gc_end.push(callback);
    }

    /// `collect(force)`: requests a collection. With `force = false`, runs
    /// one only if the trigger threshold has been crossed; `force = true`
    /// always runs one, matching the hooks `allocate_object` uses for its
    /// own threshold check and exhaustion retry.
    ///
    /// Goes through the safepoint handshake if `configure_gc` started a
    /// collector thread; otherwise runs the cycle inline on the calling
    /// thread (correct as long as the caller is the only mutator, which
    /// holds for single-threaded embedders and most tests).
    pub fn collect(&self, force: bool) {
        if !force && !self.trigger.is_due() {
            return;
        }
        if self.collector_running.load(Ordering::Acquire) {
            self.safepoint.request_collection();
        } else {
            self.run_one_cycle();
        }
    }

    /// Most recent collection's statistics (§6).
    #[must_use]
    pub fn last_gc_metrics(&self) -> GcMetrics {
        *self.metrics.lock()
    }

    /// Shutdown-only hook handed to the safepoint coordinator as its
    /// `on_shutdown` closure: releases every object still remaining in
    /// every allocator, unconditionally, after the three drain cycles
    /// `quit()` already ran (§6 `quit()`).
    ///
    /// # Safety
    ///
    /// Called only from `run_collector_loop` after shutdown has been
    /// requested and every mutator has been drained through the final
    /// three cycles, so nothing else can still be touching these objects.
    fn free_all_allocators(&self) {
        for allocator in &self.allocators {
            unsafe { allocator.free_all() };
        }
    }

    /// The mark → resurrect → weak-sweep → sweep → finalize sequence for
    /// one cycle (§4.4-§4.7), run with every mutator parked. This is the
    /// closure `configure_gc` hands to the safepoint coordinator, and the
    /// direct implementation of `collect` when no collector thread exists.
    fn run_one_cycle(&self) {
        let gc_id = tracing_support::next_gc_id();
        let _span = tracing_support::trace_collection(gc_id);
        let started_at = Instant::now();

        for callback in &self.callbacks.lock().on_gc_begin {
            callback();
        }

        tracing_support::log_phase_start(tracing_support::GcPhase::Mark);
        let mut tracer = Tracer::new();
        tracer.mark_from_roots(&self.roots, &self.allocators);

        let splits: Vec<_> = self
            .allocators
            .iter()
            .map(|allocator| sweep::resurrect_cleanup_list(allocator, &mut tracer))
            .collect();
        tracer.drain();
        tracing_support::log_phase_end(tracing_support::GcPhase::Mark, 0);

        for callback in &self.callbacks.lock().on_gc_trace_finished {
            callback();
        }

        tracing_support::log_phase_start(tracing_support::GcPhase::WeakSweep);
        self.weak_refs.sweep_unmarked();
        tracing_support::log_phase_end(tracing_support::GcPhase::WeakSweep, 0);

        tracing_support::log_phase_start(tracing_support::GcPhase::Sweep);
        let mut objects_reclaimed = 0usize;
        let mut bytes_reclaimed = 0usize;
        let mut objects_surviving = 0usize;
        let mut to_finalize = Vec::new();
        for (allocator, split) in self.allocators.iter().zip(splits) {
            let outcome = sweep::finish_sweep(allocator, split.survivors);
            for &header in &outcome.freed {
                bytes_reclaimed +=
                    size_of::<ObjectHeader>() + unsafe { header.as_ref() }.object_size as usize;
                unsafe { allocator.free_object(header) };
            }
            objects_reclaimed += outcome.freed.len();
            to_finalize.push((allocator, split.unreferenced));
        }
        tracing_support::log_phase_end(tracing_support::GcPhase::Sweep, objects_reclaimed);

        tracing_support::log_phase_start(tracing_support::GcPhase::Finalize);
        for (allocator, unreferenced) in to_finalize {
            finalize::run_finalizers(unreferenced, allocator);
        }
        tracing_support::log_phase_end(tracing_support::GcPhase::Finalize, 0);

        for allocator in &self.allocators {
            objects_surviving += count_live(allocator);
        }

        self.trigger.reset();

        let mut metrics = self.metrics.lock();
        metrics.duration = started_at.elapsed();
        metrics.bytes_reclaimed = bytes_reclaimed;
        metrics.bytes_surviving = self.allocators.iter().map(|a| a.slab.bytes_allocated()).sum();
        metrics.objects_reclaimed = objects_reclaimed;
        metrics.objects_surviving = objects_surviving;
        metrics.collection_type = CollectionType::Full;
        metrics.total_collections += 1;
        drop(metrics);

        for callback in &self.callbacks.lock().on_gc_end {
            callback();
        }
    }
}

fn count_live(allocator: &Allocator) -> usize {
    fn count(list: &crate::object::ObjectList) -> usize {
        let mut n = 0;
        let mut cursor = list.head();
        while let Some(header) = cursor {
            n += 1;
            cursor = NonNull::new(
                unsafe { header.as_ref() }
                    .next_object
                    .load(Ordering::Relaxed),
            );
        }
        n
    }
    count(&allocator.objects) + count(&allocator.objects_requiring_cleanup)
}
