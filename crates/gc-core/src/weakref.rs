//! The weak-reference manager (C8, §4.6).
//!
//! The reference design registers weak entries with a CAS-based lock-free
//! prepend and leaves removal unspecified. This crate instead guards the
//! whole list with a `parking_lot::Mutex` (see the concurrency-model
//! deviation recorded in DESIGN.md): safe, ABA-free removal of an
//! arbitrary node from a lock-free singly-linked list needs hazard
//! pointers or epoch-based reclamation, machinery the spec does not
//! otherwise call for, and a single uncontended mutex is a better fit for
//! a list that is only ever walked while mutators are parked anyway.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::lock_order::{LockGuard, LockOrder};
use crate::object::ObjectHeader;

/// One weak-reference slot (§3): holds the referent, or null once nulled.
pub struct WeakSlot {
    value: Mutex<Option<NonNull<ObjectHeader>>>,
}

impl WeakSlot {
    /// Reads the current referent. May legitimately race with the
    /// collector's nulling pass if called without external synchronisation
    /// around a collection; callers that need a consistent view across a
    /// cycle should hold the allocator parked via `Runtime::enter`.
    #[must_use]
    pub fn get(&self) -> Option<NonNull<ObjectHeader>> {
        *self.value.lock()
    }
}

// SAFETY: `WeakSlot`'s only field is mutex-guarded.
unsafe impl Send for WeakSlot {}
unsafe impl Sync for WeakSlot {}

/// The process-wide weak-reference list (§3, §4.6).
#[derive(Default)]
pub struct WeakRefManager {
    entries: Mutex<Vec<NonNull<WeakSlot>>>,
}

// SAFETY: `entries` is mutex-guarded; the pointers inside are owned
// `Box<WeakSlot>` allocations whose ownership is documented at
// `register`/`unregister`.
unsafe impl Send for WeakRefManager {}
unsafe impl Sync for WeakRefManager {}

impl WeakRefManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new weak entry pointing at `referent` and returns an
    /// owned handle to it. The caller owns the returned `Box`'s backing
    /// memory and must pass it to `unregister` before dropping it, or the
    /// entry leaks for the runtime's lifetime.
    pub fn register(&self, referent: NonNull<ObjectHeader>) -> NonNull<WeakSlot> {
        let slot = Box::new(WeakSlot {
            value: Mutex::new(Some(referent)),
        });
        let ptr = NonNull::from(Box::leak(slot));
        let _guard = LockGuard::new(LockOrder::WeakList);
        self.entries.lock().push(ptr);
        ptr
    }

    /// Unregisters a weak entry, reclaiming its backing memory. The
    /// holder's own lifetime drives this, not the collector (§3
    /// lifecycles).
    ///
    /// # Safety
    ///
    /// `slot` must have been returned by `register` on this manager and
    /// must not be used again afterward.
    pub unsafe fn unregister(&self, slot: NonNull<WeakSlot>) {
        let _guard = LockGuard::new(LockOrder::WeakList);
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|&e| e == slot) {
            entries.swap_remove(pos);
        }
        drop(entries);
        // SAFETY: caller guarantees `slot` came from `Box::leak` in
        // `register` and is not used again.
        unsafe {
            drop(Box::from_raw(slot.as_ptr()));
        }
    }

    /// The "trace finished" callback (§4.6, C8): nulls every entry whose
    /// referent is unmarked. Must run strictly between mark and sweep.
    pub(crate) fn sweep_unmarked(&self) {
        let _guard = LockGuard::new(LockOrder::WeakList);
        for &slot in self.entries.lock().iter() {
            let slot_ref = unsafe { slot.as_ref() };
            let mut value = slot_ref.value.lock();
            if let Some(referent) = *value {
                if !unsafe { referent.as_ref() }.marked.get() {
                    *value = None;
                }
            }
        }
    }
}
