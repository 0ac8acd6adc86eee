//! The safepoint coordinator (C9, §4.8).
//!
//! A dedicated collector thread plus a four-counter handshake (`W`/`S`/
//! `R`/`G` in the design's vocabulary). This module owns only the
//! handshake; the actual mark/sweep/finalize work is supplied by the
//! caller as a closure passed to [`SafepointCoordinator::run_collector_loop`]
//! (`Runtime` is the one that builds that closure, wiring in the tracer,
//! sweeper and finalizer).
//!
//! `R` (the reference design's request-disambiguating counter) is folded
//! into `cycle_count` here: a requester snapshots the current cycle count
//! before publishing its request and wakes once the count has advanced,
//! which coalesces any number of concurrent requests into the very next
//! cycle without a separate counter.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::GcError;
use crate::lock_order::{LockGuard, LockOrder};

thread_local! {
    static ENTERED: Cell<isize> = const { Cell::new(0) };
    static IS_COLLECTOR: Cell<bool> = const { Cell::new(false) };
}

struct ThreadSet {
    live_mutators: usize,
}

struct GoState {
    requested: bool,
}

/// Owns the `W`/`S`/`R`/`G` handshake state (§4.8, §5). One instance per
/// [`crate::runtime::Runtime`].
pub struct SafepointCoordinator {
    thread_set: Mutex<ThreadSet>,
    /// `W`: true while a collection has brought (or is bringing) the world
    /// to a stop.
    world_stopped: AtomicBool,
    /// `S`: mutators currently parked, or temporarily credited as parked
    /// while inside a bracketed blocking call (see [`Self::exit`]).
    parked: AtomicUsize,
    world_lock: Mutex<()>,
    world_condvar: Condvar,
    go: Mutex<GoState>,
    go_condvar: Condvar,
    cycle_count: AtomicU64,
    completion: Mutex<()>,
    completion_condvar: Condvar,
    should_quit: AtomicBool,
}

impl Default for SafepointCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SafepointCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            thread_set: Mutex::new(ThreadSet { live_mutators: 0 }),
            world_stopped: AtomicBool::new(false),
            parked: AtomicUsize::new(0),
            world_lock: Mutex::new(()),
            world_condvar: Condvar::new(),
            go: Mutex::new(GoState { requested: false }),
            go_condvar: Condvar::new(),
            cycle_count: AtomicU64::new(0),
            completion: Mutex::new(()),
            completion_condvar: Condvar::new(),
            should_quit: AtomicBool::new(false),
        }
    }

    fn is_collector(&self) -> bool {
        IS_COLLECTOR.with(Cell::get)
    }

    /// Registers the calling thread as a mutator, counted toward the
    /// collector's `S == live_mutator_count` wait.
    pub fn register_thread(&self) {
        let _order = LockGuard::new(LockOrder::ThreadSet);
        self.thread_set.lock().live_mutators += 1;
    }

    /// Unregisters the calling thread.
    ///
    /// Parks like an ordinary `gc_check` before leaving the registry: a
    /// thread that is still counted in a collector's live-mutator snapshot
    /// must still show up in `S` for that cycle, or the collector would
    /// wait for a parked count it can never reach. If a cycle starts
    /// between the park check and acquiring the thread-set lock, the
    /// attempt retries.
    ///
    /// # Panics
    ///
    /// Panics if `entered` has not returned to zero (IP7): an unbalanced
    /// `enter`/`exit` pair means a corrupted safepoint count, which §7
    /// classifies as unrecoverable.
    pub fn unregister_thread(&self) {
        let depth = ENTERED.with(Cell::get);
        if depth != 0 {
            panic!("{}", GcError::UnbalancedSafepoint { depth });
        }
        loop {
            self.maybe_park();
            let _order = LockGuard::new(LockOrder::ThreadSet);
            let mut thread_set = self.thread_set.lock();
            if self.world_stopped.load(Ordering::Acquire) {
                continue;
            }
            thread_set.live_mutators -= 1;
            break;
        }
    }

    /// `gc_check()` (§4.8, §5, §6): the lightweight check emitted at
    /// back-edges and call sites. Parks if a collection is underway.
    pub fn gc_check(&self) {
        self.maybe_park();
    }

    /// `exit()` (§4.8): wraps entry into a blocking system call. Credits
    /// `S` immediately, without waiting, since a thread blocked outside
    /// managed code cannot touch GC state and is safe to treat as parked.
    /// Always legal to call; nested `exit`/`enter` brackets simply stack
    /// `entered` one level deeper.
    pub fn exit(&self) {
        ENTERED.with(|e| e.set(e.get() + 1));
        self.parked.fetch_add(1, Ordering::AcqRel);
        let _guard = self.world_lock.lock();
        self.world_condvar.notify_all();
    }

    /// `enter()` (§4.8): wraps return from a blocking system call. Undoes
    /// the credit `exit()` gave `S`, then behaves like `gc_check` — if a
    /// collection is still underway, parks for real.
    ///
    /// # Panics
    ///
    /// Panics if called without a matching prior `exit()` on this thread
    /// (`entered` already back at zero): an unbalanced pair means a
    /// corrupted safepoint count, which §7 classifies as unrecoverable.
    pub fn enter(&self) {
        ENTERED.with(|e| {
            let depth = e.get();
            if depth <= 0 {
                panic!("{}", GcError::UnbalancedSafepoint { depth: depth - 1 });
            }
            e.set(depth - 1);
        });
        {
            let _guard = self.world_lock.lock();
            let previous = self.parked.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(previous > 0, "enter() without a matching exit() credit");
        }
        self.maybe_park();
    }

    fn maybe_park(&self) {
        if self.is_collector() {
            return;
        }
        if !self.world_stopped.load(Ordering::Acquire) {
            return;
        }
        self.parked.fetch_add(1, Ordering::AcqRel);
        let mut guard = self.world_lock.lock();
        self.world_condvar.notify_all();
        while self.world_stopped.load(Ordering::Acquire) {
            self.world_condvar.wait(&mut guard);
        }
        drop(guard);
        self.parked.fetch_sub(1, Ordering::AcqRel);
    }

    fn wait_for_all_parked(&self, live_mutators: usize) {
        let mut guard = self.world_lock.lock();
        while self.parked.load(Ordering::Acquire) < live_mutators {
            self.world_condvar.wait(&mut guard);
        }
    }

    /// Mutator-initiated "collect and wait" (§4.8): publishes `G` and
    /// blocks until a cycle that started at or after this call completes.
    /// Concurrent callers all observe the same `cycle_count` snapshot and
    /// are released by the same cycle, which is the coalescing the design
    /// calls for.
    ///
    /// The calling thread credits itself as parked for the duration of the
    /// wait, the same way `exit()` credits a thread blocked on a system
    /// call: if the caller is itself a registered mutator, it is still
    /// counted in `live_mutators`, and without this credit the collector's
    /// `S == live_mutator_count` wait would never be satisfied by a
    /// thread that triggered its own request and is therefore not polling
    /// `gc_check` at all while it waits here.
    pub fn request_collection(&self) {
        let observed_cycle = self.cycle_count.load(Ordering::Acquire);
        {
            let mut go = self.go.lock();
            go.requested = true;
            self.go_condvar.notify_all();
        }
        self.parked.fetch_add(1, Ordering::AcqRel);
        {
            let _guard = self.world_lock.lock();
            self.world_condvar.notify_all();
        }
        let mut guard = self.completion.lock();
        while self.cycle_count.load(Ordering::Acquire) <= observed_cycle {
            self.completion_condvar.wait(&mut guard);
        }
        drop(guard);
        self.parked.fetch_sub(1, Ordering::AcqRel);
    }

    /// Sets the "should quit" flag and wakes the collector thread for a
    /// final shutdown sequence (§4.8, §6 `quit()`).
    pub fn request_shutdown(&self) {
        self.should_quit.store(true, Ordering::Release);
        let mut go = self.go.lock();
        go.requested = true;
        self.go_condvar.notify_all();
    }

    /// The collector thread body. Runs until shutdown is requested, then
    /// runs a final cycle plus two additional drain sweeps (§4.8, and the
    /// Open Question decision recorded in DESIGN.md to keep this at
    /// three), then calls `on_shutdown` once to release every remaining
    /// live object unconditionally, before returning.
    pub fn run_collector_loop(&self, mut collect: impl FnMut(), on_shutdown: impl FnOnce()) {
        IS_COLLECTOR.with(|c| c.set(true));
        loop {
            {
                let mut go = self.go.lock();
                while !go.requested && !self.should_quit.load(Ordering::Acquire) {
                    self.go_condvar.wait(&mut go);
                }
                go.requested = false;
            }

            let quitting = self.should_quit.load(Ordering::Acquire);
            self.run_one_cycle(&mut collect);

            if quitting {
                self.run_one_cycle(&mut collect);
                self.run_one_cycle(&mut collect);
                on_shutdown();
                break;
            }
        }
    }

    fn run_one_cycle(&self, collect: &mut impl FnMut()) {
        // Hold the thread-set lock only long enough to set `W` and
        // snapshot the live count atomically with it (§4.8 step 2-3); a
        // thread that registers after this point simply joins starting
        // with the next cycle rather than this one, which needs no
        // special handling since it holds no references yet.
        let live_mutators = {
            let _order = LockGuard::new(LockOrder::ThreadSet);
            let thread_set = self.thread_set.lock();
            self.world_stopped.store(true, Ordering::Release);
            thread_set.live_mutators
        };

        self.wait_for_all_parked(live_mutators);

        collect();

        self.world_stopped.store(false, Ordering::Release);
        {
            let _guard = self.world_lock.lock();
            self.world_condvar.notify_all();
        }

        self.cycle_count.fetch_add(1, Ordering::AcqRel);
        let _guard = self.completion.lock();
        self.completion_condvar.notify_all();
    }

    /// Number of completed collection cycles.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Acquire)
    }
}
