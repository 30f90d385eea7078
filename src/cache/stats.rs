//! Cache Statistics Module
//!
//! Point-in-time statistics derived from a single snapshot of the store.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::{EntryStatus, EntryStore};

// == Cache Stats ==
/// Derived, read-only aggregate. Never stored; always recomputed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub active_entries: usize,
    /// Bytes
    pub total_size: u64,
    pub average_entry_size: f64,
    pub hits: u64,
    pub misses: u64,
    /// Percent, 0 when there have been no lookups
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub capacity_exceeded: u64,
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub by_strategy: BTreeMap<String, usize>,
}

impl CacheStats {
    // == Compute ==
    /// Builds statistics from the store as it is now.
    pub fn compute(store: &EntryStore) -> Self {
        let counters = store.counters();
        let mut stats = CacheStats {
            total_entries: store.len(),
            total_size: store.total_size(),
            hits: counters.hits,
            misses: counters.misses,
            hit_rate: hit_rate(counters.hits, counters.misses),
            evictions: counters.evictions,
            expirations: counters.expirations,
            invalidations: counters.invalidations,
            capacity_exceeded: counters.capacity_exceeded,
            ..Default::default()
        };

        for entry in store.iter() {
            if entry.status == EntryStatus::Active {
                stats.active_entries += 1;
            }
            *stats.by_type.entry(entry.entry_type.to_string()).or_default() += 1;
            *stats.by_status.entry(entry.status.to_string()).or_default() += 1;
            *stats.by_priority.entry(entry.priority.to_string()).or_default() += 1;
            *stats.by_strategy.entry(entry.strategy_id.clone()).or_default() += 1;
        }

        stats.average_entry_size = if stats.total_entries == 0 {
            0.0
        } else {
            stats.total_size as f64 / stats.total_entries as f64
        };
        stats
    }

    /// Entries that a cleanup task would remove.
    pub fn reclaimable_entries(&self) -> usize {
        self.by_status.get("expired").copied().unwrap_or(0)
            + self.by_status.get("invalidated").copied().unwrap_or(0)
    }
}

// == Hit Rate ==
/// `hits / (hits + misses) * 100`, or 0.0 when no lookups have been made.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EncodedPayload, EntryType, PutOptions, Priority};
    use crate::rules::Classification;
    use chrono::Utc;
    use serde_json::json;

    fn classification() -> Classification {
        Classification {
            ttl: 300,
            priority: Priority::Medium,
            compression: false,
            strategy_id: "default".to_string(),
            matched_rule: None,
        }
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(hit_rate(0, 0), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        assert_eq!(hit_rate(1, 1), 50.0);
        assert_eq!(hit_rate(3, 0), 100.0);
        assert_eq!(hit_rate(0, 2), 0.0);
    }

    #[test]
    fn test_compute_breakdowns() {
        let mut store = EntryStore::new();
        let now = Utc::now();
        for (key, entry_type) in [("a", EntryType::Api), ("b", EntryType::Api), ("c", EntryType::File)] {
            store
                .put(
                    key,
                    EncodedPayload::encode(json!(key)).unwrap(),
                    &PutOptions::default().with_type(entry_type),
                    &classification(),
                    now,
                )
                .unwrap();
        }
        store.invalidate("c", "test");
        store.get("a", now);
        store.get("zzz", now);

        let stats = CacheStats::compute(&store);

        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.active_entries, 2);
        assert_eq!(stats.by_type.get("api"), Some(&2));
        assert_eq!(stats.by_status.get("invalidated"), Some(&1));
        assert_eq!(stats.by_priority.get("medium"), Some(&3));
        assert_eq!(stats.hit_rate, 50.0);
        assert_eq!(stats.reclaimable_entries(), 1);
        assert_eq!(stats.total_size, 9);
        assert_eq!(stats.average_entry_size, 3.0);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let mut store = EntryStore::new();
        let now = Utc::now();
        store
            .put(
                "k",
                EncodedPayload::encode(json!(1)).unwrap(),
                &PutOptions::default(),
                &classification(),
                now,
            )
            .unwrap();
        store.get("k", now);
        store.get("missing", now);

        assert_eq!(CacheStats::compute(&store), CacheStats::compute(&store));
    }
}
