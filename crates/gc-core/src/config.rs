//! Process-wide tuning knobs: `gc_threshold` and `gc_logging` (spec §6).

/// Tuning knobs read by the collector.
///
/// Mirrors the teacher's `IncrementalConfig`: a small `Copy` struct with a
/// `Default` impl, read and replaced wholesale rather than mutated field by
/// field.
#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// Number of bytes a mutator may allocate before a collection is
    /// triggered (see `trigger::Trigger`). Reset to this value at the end
    /// of every cycle.
    pub threshold_bytes: usize,
    /// When true, collection phases are logged via `tracing_support`.
    pub logging: bool,
}

impl GcConfig {
    /// Sixteen mebibytes: a conservative slice of the "tens of megabytes"
    /// the spec suggests for `bytes_until_gc`'s default threshold.
    pub const DEFAULT_THRESHOLD_BYTES: usize = 16 * 1024 * 1024;
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: Self::DEFAULT_THRESHOLD_BYTES,
            logging: false,
        }
    }
}
