//! Cache Module
//!
//! Entry store, entry model, eviction ordering and derived statistics.

mod entry;
mod eviction;
mod stats;
mod store;


// Re-export public types
pub use entry::{
    checked_duration, checksum, CacheEntry, EncodedPayload, EntryMetadata, EntryPolicy, EntryStatistics,
    EntryStatus, EntryType, Priority, PutOptions, RefreshStrategy,
};
pub use eviction::{victim_order, EvictionPolicy};
pub use stats::{hit_rate, CacheStats};
pub use store::{CapacityLimits, EntryStore, EvictionOutcome, LookupResult, StoreCounters};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed serialized payload size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB

/// Longest accepted TTL, max age or schedule interval in seconds (100 years)
pub const MAX_DURATION_SECS: i64 = 100 * 365 * 24 * 60 * 60;
