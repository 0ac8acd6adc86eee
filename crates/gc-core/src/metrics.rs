//! Statistics from the most recent collection cycle.

use std::time::Duration;

/// The kind of collection that produced a `GcMetrics` snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionType {
    /// No collection has run yet on this runtime.
    #[default]
    None = 0,
    /// A forced or threshold-triggered full-heap collection. This crate
    /// performs no generational collection, so every cycle is a full one;
    /// the variant exists for parity with the metrics shape a host may
    /// expect.
    Full = 1,
}

/// Statistics from the most recent garbage collection.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Wall-clock duration of the last collection.
    pub duration: Duration,
    /// Bytes reclaimed by the last collection.
    pub bytes_reclaimed: usize,
    /// Bytes still live after the last collection.
    pub bytes_surviving: usize,
    /// Objects reclaimed by the last collection.
    pub objects_reclaimed: usize,
    /// Objects still live after the last collection.
    pub objects_surviving: usize,
    /// Kind of the last collection.
    pub collection_type: CollectionType,
    /// Total collections run on this runtime since `Runtime::new`.
    pub total_collections: usize,
}

impl GcMetrics {
    /// A zeroed snapshot, as seen before any collection has run.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::from_secs(0),
            bytes_reclaimed: 0,
            bytes_surviving: 0,
            objects_reclaimed: 0,
            objects_surviving: 0,
            collection_type: CollectionType::None,
            total_collections: 0,
        }
    }
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}
