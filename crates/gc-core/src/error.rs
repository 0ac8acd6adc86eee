//! Error conditions the runtime can report to its host.
//!
//! Mirrors the error-kind table in the design doc. No `thiserror`/`anyhow`
//! dependency: the runtime has always reported its own errors as plain
//! enums, and that precedent is kept here.

use std::fmt;

/// A recoverable or fatal condition raised by the GC core.
///
/// Fatal conditions (`CollectorThreadSpawnFailed`, and the unbalanced
/// safepoint case handled separately via `Runtime::exit`) are not
/// constructed as `Result` values; they panic at the point of detection,
/// since the design treats them as unrecoverable. `AllocationExhausted` is
/// the one kind that is returned from a fallible call.
#[non_exhaustive]
#[derive(Debug)]
pub enum GcError {
    /// The system byte allocator returned null for a large-object request,
    /// even after a forced collection and retry.
    AllocationExhausted {
        /// Size in bytes of the allocation that failed.
        requested: usize,
    },
    /// The collector thread failed to spawn.
    CollectorThreadSpawnFailed(std::io::Error),
    /// A thread's `entered` depth was not zero where it was required to be
    /// (thread exit) or went negative (an `enter()` without a matching prior
    /// `exit()`). Never returned as a `Result`: `safepoint.rs` formats this
    /// variant into its panic message at the point of detection, since a
    /// corrupted safepoint count is unrecoverable.
    UnbalancedSafepoint {
        /// The offending `entered` depth.
        depth: isize,
    },
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationExhausted { requested } => write!(
                f,
                "allocation exhausted: system allocator could not satisfy a {requested}-byte request after a forced collection"
            ),
            Self::CollectorThreadSpawnFailed(err) => {
                write!(f, "collector thread failed to start: {err}")
            }
            Self::UnbalancedSafepoint { depth } => write!(
                f,
                "unbalanced safepoint: entered depth {depth}, expected 0"
            ),
        }
    }
}

impl std::error::Error for GcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CollectorThreadSpawnFailed(err) => Some(err),
            Self::AllocationExhausted { .. } | Self::UnbalancedSafepoint { .. } => None,
        }
    }
}

/// Result alias for fallible GC-core operations.
pub type GcResult<T> = Result<T, GcError>;
