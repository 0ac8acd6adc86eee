//! The GC trigger policy (C10, §4.10).

use std::sync::atomic::{AtomicIsize, Ordering};

/// Byte-budget countdown deciding when a collection is due.
///
/// Uses relaxed atomics throughout, per the design doc's Open Question
/// decision: small accounting races under contention are accepted in
/// exchange for avoiding a hot lock on the allocation fast path.
pub struct Trigger {
    bytes_until_gc: AtomicIsize,
    threshold: AtomicIsize,
}

impl Trigger {
    #[must_use]
    pub fn new(threshold_bytes: usize) -> Self {
        let threshold = threshold_bytes as isize;
        Self {
            bytes_until_gc: AtomicIsize::new(threshold),
            threshold: AtomicIsize::new(threshold),
        }
    }

    /// Subtracts `size` from the countdown, as every allocation (small or
    /// large) does.
    pub fn charge(&self, size: usize) {
        self.bytes_until_gc
            .fetch_sub(size as isize, Ordering::Relaxed);
    }

    /// True once the countdown has fallen to zero or below.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.bytes_until_gc.load(Ordering::Relaxed) <= 0
    }

    /// Resets the countdown to the current threshold, as happens at the
    /// end of every cycle.
    pub fn reset(&self) {
        let threshold = self.threshold.load(Ordering::Relaxed);
        self.bytes_until_gc.store(threshold, Ordering::Relaxed);
    }

    /// Replaces the threshold (`gc_threshold`, §6) and immediately resets
    /// the countdown to it.
    pub fn set_threshold(&self, threshold_bytes: usize) {
        let threshold = threshold_bytes as isize;
        self.threshold.store(threshold, Ordering::Relaxed);
        self.reset();
    }

    /// Current threshold in bytes.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold.load(Ordering::Relaxed).max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charging_past_threshold_marks_due() {
        let trigger = Trigger::new(100);
        assert!(!trigger.is_due());
        trigger.charge(101);
        assert!(trigger.is_due());
    }

    #[test]
    fn reset_restores_threshold() {
        let trigger = Trigger::new(100);
        trigger.charge(200);
        assert!(trigger.is_due());
        trigger.reset();
        assert!(!trigger.is_due());
    }

    #[test]
    fn set_threshold_updates_and_resets() {
        let trigger = Trigger::new(100);
        trigger.set_threshold(50);
        assert_eq!(trigger.threshold(), 50);
        assert!(!trigger.is_due());
    }
}
