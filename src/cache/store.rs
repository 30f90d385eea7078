//! Cache Store Module
//!
//! Authoritative key → entry map plus the aggregate size counter. Every
//! mutation of cached data passes through here; the store itself is not
//! synchronized and is shared behind the engine's `RwLock`.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::entry::{
    CacheEntry, EncodedPayload, EntryMetadata, EntryStatistics, EntryStatus, EntryType, PutOptions,
};
use crate::cache::eviction::{victim_order, EvictionPolicy};
use crate::cache::{Priority, MAX_KEY_LENGTH};
use crate::error::{CacheError, Result};
use crate::rules::Classification;

const DEFAULT_CONTENT_TYPE: &str = "application/json";

// == Store Counters ==
/// Store-wide event counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreCounters {
    pub hits: u64,
    /// Includes lookups of absent keys
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    /// Capacity passes that had to evict critical entries or could not get under cap
    pub capacity_exceeded: u64,
}

// == Lookup Result ==
/// Outcome of a `get`. A miss carries no payload but may carry the entry.
#[derive(Debug, Clone)]
pub struct LookupResult {
    pub payload: Option<Value>,
    pub entry: Option<CacheEntry>,
    pub hit: bool,
}

impl LookupResult {
    fn miss(entry: Option<CacheEntry>) -> Self {
        Self {
            payload: None,
            entry,
            hit: false,
        }
    }
}

// == Capacity Limits ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityLimits {
    pub max_entries: u64,
    pub max_size: u64,
    pub policy: EvictionPolicy,
}

/// Result of one capacity pass over a strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    pub evicted: Vec<String>,
    pub bytes_freed: u64,
    pub critical_evicted: usize,
    /// True if the strategy is still over a cap after the pass
    pub still_over: bool,
}

// == Cache Store ==
#[derive(Debug, Default)]
pub struct EntryStore {
    entries: HashMap<String, CacheEntry>,
    total_size: u64,
    counters: StoreCounters,
    sequence: u64,
}

impl EntryStore {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted entries, recomputing the size counter.
    pub fn from_parts(entries: Vec<CacheEntry>, counters: StoreCounters) -> Self {
        let sequence = entries
            .iter()
            .map(|e| e.insert_seq.max(e.access_seq))
            .max()
            .unwrap_or(0);
        let total_size = entries.iter().map(|e| e.size).sum();
        let entries = entries.into_iter().map(|e| (e.key.clone(), e)).collect();

        Self {
            entries,
            total_size,
            counters,
            sequence,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    // == Put ==
    /// Inserts or updates an entry.
    ///
    /// On overwrite, `created_at`, `hits` and `misses` are preserved and the
    /// entry is revived to `active`. Explicit options win over the rule
    /// classification; for overwrites an unmatched classification leaves the
    /// existing ttl/priority/strategy untouched.
    pub fn put(
        &mut self,
        key: &str,
        payload: EncodedPayload,
        opts: &PutOptions,
        classification: &Classification,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        validate_key(key)?;
        opts.validate()?;

        let seq = self.next_seq();
        let explicit_ttl = opts.ttl.map(|t| t as u64);
        let explicit_max_age = opts.max_age.map(|t| t as u64);

        if let Some(entry) = self.entries.get_mut(key) {
            let rule_applies = classification.matched_rule.is_some();

            self.total_size = self.total_size - entry.size + payload.size;

            entry.payload = payload.value;
            entry.size = payload.size;
            entry.metadata.checksum = payload.checksum;
            entry.metadata.compression = payload.compressed;
            entry.metadata.version += 1;
            entry.updated_at = now;
            entry.last_accessed = now;
            entry.access_seq = seq;
            entry.status = EntryStatus::Active;
            entry.invalidation_reason = None;

            if let Some(entry_type) = opts.entry_type {
                entry.entry_type = entry_type;
            }
            match (explicit_ttl, rule_applies) {
                (Some(ttl), _) => entry.ttl = ttl,
                (None, true) => entry.ttl = classification.ttl,
                (None, false) => {}
            }
            match explicit_max_age {
                Some(max_age) => entry.max_age = max_age,
                None if explicit_ttl.is_some() || rule_applies => entry.max_age = entry.ttl,
                None => {}
            }
            match (opts.priority, rule_applies) {
                (Some(priority), _) => entry.priority = priority,
                (None, true) => entry.priority = classification.priority,
                (None, false) => {}
            }
            match (&opts.strategy_id, rule_applies) {
                (Some(id), _) => entry.strategy_id = id.clone(),
                (None, true) => entry.strategy_id = classification.strategy_id.clone(),
                (None, false) => {}
            }
            if let Some(tags) = &opts.tags {
                entry.tags = tags.iter().cloned().collect();
            }
            if let Some(content_type) = &opts.content_type {
                entry.metadata.content_type = content_type.clone();
            }
            if opts.source.is_some() {
                entry.metadata.source = opts.source.clone();
            }
            if let Some(dependencies) = &opts.dependencies {
                entry.metadata.dependencies = dependencies.clone();
            }
            if let Some(policy) = &opts.policy {
                entry.policy = policy.clone();
            }

            debug!(key, version = entry.metadata.version, "Updated cache entry");
            return Ok(entry.clone());
        }

        let ttl = explicit_ttl.unwrap_or(classification.ttl);
        let entry = CacheEntry {
            key: key.to_string(),
            entry_type: opts.entry_type.unwrap_or_default(),
            size: payload.size,
            payload: payload.value,
            hits: 0,
            misses: 0,
            created_at: now,
            updated_at: now,
            last_accessed: now,
            ttl,
            max_age: explicit_max_age.unwrap_or(ttl),
            status: EntryStatus::Active,
            priority: opts.priority.unwrap_or(classification.priority),
            tags: opts
                .tags
                .as_ref()
                .map(|tags| tags.iter().cloned().collect())
                .unwrap_or_default(),
            metadata: EntryMetadata {
                content_type: opts
                    .content_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                compression: payload.compressed,
                version: 1,
                source: opts.source.clone(),
                checksum: payload.checksum,
                dependencies: opts.dependencies.clone().unwrap_or_default(),
            },
            statistics: EntryStatistics::default(),
            policy: opts.policy.clone().unwrap_or_default(),
            strategy_id: opts
                .strategy_id
                .clone()
                .unwrap_or_else(|| classification.strategy_id.clone()),
            invalidation_reason: None,
            insert_seq: seq,
            access_seq: seq,
        };

        self.total_size += entry.size;
        self.entries.insert(key.to_string(), entry.clone());
        debug!(key, size = entry.size, strategy = %entry.strategy_id, "Inserted cache entry");
        Ok(entry)
    }

    // == Get ==
    /// Looks up a key, recording the hit or miss.
    ///
    /// A lookup that finds the entry past its max age flips it to `expired`.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> LookupResult {
        let started = Instant::now();
        let seq = self.next_seq();

        let Some(entry) = self.entries.get_mut(key) else {
            self.counters.misses += 1;
            return LookupResult::miss(None);
        };

        if entry.is_active() && entry.is_past_max_age(now) {
            entry.status = EntryStatus::Expired;
            self.counters.expirations += 1;
            debug!(key, "Entry expired on access");
        }

        if !entry.is_active() {
            entry.misses += 1;
            self.counters.misses += 1;
            return LookupResult::miss(Some(entry.clone()));
        }

        entry.hits += 1;
        entry.last_accessed = now;
        entry.access_seq = seq;
        entry
            .statistics
            .record_access(started.elapsed().as_secs_f64() * 1_000_000.0);
        self.counters.hits += 1;

        LookupResult {
            payload: Some(entry.payload.clone()),
            entry: Some(entry.clone()),
            hit: true,
        }
    }

    /// Reads an entry without touching any counter.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    // == Delete ==
    /// Removes an entry unconditionally.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove(key).is_some()
    }

    /// Removes and returns an entry, keeping the size counter in step.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size = self.total_size.saturating_sub(entry.size);
        Some(entry)
    }

    // == Invalidate ==
    /// Marks an entry invalidated, cascading to entries that depend on it.
    ///
    /// Returns false if the key is absent.
    pub fn invalidate(&mut self, key: &str, reason: &str) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }

        let mut queue = VecDeque::from([key.to_string()]);
        let mut visited = HashSet::new();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }

            if let Some(entry) = self.entries.get_mut(&current) {
                if entry.status != EntryStatus::Invalidated {
                    entry.status = EntryStatus::Invalidated;
                    self.counters.invalidations += 1;
                }
                entry.invalidation_reason = Some(if current == key {
                    reason.to_string()
                } else {
                    format!("dependency '{}' invalidated", key)
                });
            }

            let dependents = self
                .entries
                .values()
                .filter(|e| e.metadata.dependencies.iter().any(|d| d == &current))
                .map(|e| e.key.clone());
            queue.extend(dependents);
        }

        true
    }

    // == Invalidate By Tags ==
    /// Marks every entry carrying any of `tags` as invalidated.
    ///
    /// Returns the number of entries whose status changed.
    pub fn invalidate_by_tags(&mut self, tags: &[String]) -> usize {
        let mut changed = 0;
        for entry in self.entries.values_mut() {
            if entry.status != EntryStatus::Invalidated && entry.has_any_tag(tags) {
                entry.status = EntryStatus::Invalidated;
                entry.invalidation_reason = Some(format!("tag match: {}", tags.join(",")));
                changed += 1;
            }
        }
        self.counters.invalidations += changed as u64;
        changed
    }

    // == Mark Stale ==
    /// Flags an entry as awaiting refresh.
    pub fn mark_stale(&mut self, key: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.status = EntryStatus::Stale;
                true
            }
            None => false,
        }
    }

    // == Clear ==
    /// Removes entries of one type, or everything when `entry_type` is None.
    pub fn clear(&mut self, entry_type: Option<EntryType>) -> usize {
        let Some(entry_type) = entry_type else {
            let count = self.entries.len();
            self.entries.clear();
            self.total_size = 0;
            return count;
        };

        let keys: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.entry_type == entry_type)
            .map(|e| e.key.clone())
            .collect();

        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    // == Expire Sweep ==
    /// Flips every active entry past its max age to `expired`.
    ///
    /// Returns the keys that changed.
    pub fn expire_sweep(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.is_active() && entry.is_past_max_age(now) {
                entry.status = EntryStatus::Expired;
                expired.push(entry.key.clone());
            }
        }
        self.counters.expirations += expired.len() as u64;
        expired
    }

    // == Enforce Capacity ==
    /// Evicts entries of one strategy until it is within `limits`.
    ///
    /// Critical entries are only chosen once no other victims remain, and
    /// `protected` (the key just written) is never chosen.
    pub fn enforce_capacity(
        &mut self,
        strategy_id: &str,
        limits: CapacityLimits,
        now: DateTime<Utc>,
        protected: Option<&str>,
    ) -> EvictionOutcome {
        let mut outcome = EvictionOutcome::default();
        let (mut count, mut size) = self.strategy_usage(strategy_id);

        let over = |count: u64, size: u64| count > limits.max_entries || size > limits.max_size;
        if !over(count, size) {
            return outcome;
        }

        let victims = victim_order(
            limits.policy,
            self.entries.values().filter(|e| e.strategy_id == strategy_id),
            now,
            protected,
        );

        for key in victims {
            if !over(count, size) {
                break;
            }
            if let Some(entry) = self.remove(&key) {
                count -= 1;
                size -= entry.size;
                outcome.bytes_freed += entry.size;
                if entry.priority == Priority::Critical {
                    outcome.critical_evicted += 1;
                }
                outcome.evicted.push(key);
            }
        }

        self.counters.evictions += outcome.evicted.len() as u64;
        outcome.still_over = over(count, size);

        if outcome.critical_evicted > 0 || outcome.still_over {
            self.counters.capacity_exceeded += 1;
            warn!(
                strategy = strategy_id,
                critical_evicted = outcome.critical_evicted,
                still_over = outcome.still_over,
                "{}",
                CacheError::CapacityExceeded(format!(
                    "strategy '{}' could not be brought under its caps with non-critical evictions",
                    strategy_id
                ))
            );
        }

        outcome
    }

    /// Entry count and total size for one strategy.
    pub fn strategy_usage(&self, strategy_id: &str) -> (u64, u64) {
        self.entries
            .values()
            .filter(|e| e.strategy_id == strategy_id)
            .fold((0, 0), |(count, size), e| (count + 1, size + e.size))
    }

    /// Distinct strategy ids referenced by entries.
    pub fn strategy_ids(&self) -> BTreeSet<String> {
        self.entries.values().map(|e| e.strategy_id.clone()).collect()
    }

    // == Compression Commit ==
    /// Records a compressed size for an entry if its payload is unchanged.
    ///
    /// Returns the bytes saved, or None if the entry moved on or the new size
    /// is not smaller.
    pub fn commit_compression(&mut self, key: &str, checksum: &str, new_size: u64) -> Option<u64> {
        let entry = self.entries.get_mut(key)?;
        if entry.metadata.checksum != checksum || entry.metadata.compression || new_size > entry.size {
            return None;
        }

        let saved = entry.size - new_size;
        entry.size = new_size;
        entry.metadata.compression = true;
        self.total_size -= saved;
        Some(saved)
    }

    // == Reassign Strategy ==
    pub fn reassign_strategy(&mut self, key: &str, strategy_id: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.strategy_id = strategy_id.to_string();
                true
            }
            None => false,
        }
    }

    // == Compact ==
    /// Releases excess map capacity and reconciles the size counter.
    ///
    /// Returns the absolute drift that was corrected.
    pub fn compact(&mut self) -> u64 {
        self.entries.shrink_to_fit();
        let actual: u64 = self.entries.values().map(|e| e.size).sum();
        let drift = actual.abs_diff(self.total_size);
        self.total_size = actual;
        drift
    }

    // == Reset Counters ==
    /// Zeroes hit/miss accounting on every entry and on the store.
    pub fn reset_counters(&mut self) {
        for entry in self.entries.values_mut() {
            entry.hits = 0;
            entry.misses = 0;
            entry.statistics = EntryStatistics::default();
        }
        self.counters = StoreCounters::default();
    }

    // == Accessors ==
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Clones every entry, for persistence.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.insert_seq);
        entries
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::Validation("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::Validation(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}
