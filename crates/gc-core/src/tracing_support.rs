//! Feature-gated logging facade for collection cycles.
//!
//! When the `tracing` feature is off, every item here compiles to a no-op
//! with the same signature, so call sites never need their own `#[cfg]`.

#[cfg(feature = "tracing")]
pub(crate) mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Identity of one collection cycle, for correlating its log lines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Phase of a collection cycle, for structured log fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        Mark,
        WeakSweep,
        Sweep,
        Finalize,
    }

    impl GcPhase {
        const fn name(self) -> &'static str {
            match self {
                Self::Mark => "mark",
                Self::WeakSweep => "weak_sweep",
                Self::Sweep => "sweep",
                Self::Finalize => "finalize",
            }
        }
    }

    pub fn trace_collection(gc_id: GcId) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_collection", gc_id = gc_id.0).entered()
    }

    pub fn log_phase_start(phase: GcPhase) {
        tracing::debug!(phase = phase.name(), "gc phase start");
    }

    pub fn log_phase_end(phase: GcPhase, objects_touched: usize) {
        tracing::debug!(phase = phase.name(), objects_touched, "gc phase end");
    }
}

#[cfg(not(feature = "tracing"))]
pub(crate) mod internal {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        Mark,
        WeakSweep,
        Sweep,
        Finalize,
    }

    pub fn next_gc_id() -> GcId {
        GcId(0)
    }

    pub fn trace_collection(_gc_id: GcId) {}

    pub fn log_phase_start(_phase: GcPhase) {}

    pub fn log_phase_end(_phase: GcPhase, _objects_touched: usize) {}
}

pub(crate) use internal::{next_gc_id, trace_collection, GcId, GcPhase};
pub(crate) use internal::{log_phase_end, log_phase_start};
