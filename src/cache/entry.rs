//! Cache Entry Module
//!
//! Defines the structure for individual cache entries and the options used
//! to write them.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::eviction::EvictionPolicy;
use crate::cache::{MAX_DURATION_SECS, MAX_VALUE_SIZE};
use crate::error::{CacheError, Result};

// == Entry Type ==
/// Content class of a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Api,
    Static,
    User,
    Session,
    Database,
    Computed,
    Image,
    File,
}

impl Default for EntryType {
    fn default() -> Self {
        EntryType::Computed
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryType::Api => "api",
            EntryType::Static => "static",
            EntryType::User => "user",
            EntryType::Session => "session",
            EntryType::Database => "database",
            EntryType::Computed => "computed",
            EntryType::Image => "image",
            EntryType::File => "file",
        };
        f.write_str(name)
    }
}

// == Entry Status ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Active,
    Expired,
    Invalidated,
    Stale,
    Pending,
}

impl EntryStatus {
    /// Entries in these states are removed by a cleanup task.
    pub fn is_reclaimable(self) -> bool {
        matches!(self, EntryStatus::Expired | EntryStatus::Invalidated)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryStatus::Active => "active",
            EntryStatus::Expired => "expired",
            EntryStatus::Invalidated => "invalidated",
            EntryStatus::Stale => "stale",
            EntryStatus::Pending => "pending",
        };
        f.write_str(name)
    }
}

// == Priority ==
/// Entry priority. Ordered so that `Low < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(name)
    }
}

// == Refresh Strategy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStrategy {
    #[default]
    None,
    Lazy,
    Eager,
}

// == Metadata ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub content_type: String,
    pub compression: bool,
    /// Incremented on every overwrite
    pub version: u32,
    pub source: Option<String>,
    /// CRC32 of the serialized payload, lowercase hex
    pub checksum: String,
    /// Keys this entry was derived from; invalidating one invalidates this entry
    pub dependencies: Vec<String>,
}

// == Statistics ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryStatistics {
    pub access_frequency: u64,
    /// Running mean over hits, in microseconds
    pub avg_access_latency_us: f64,
}

impl EntryStatistics {
    /// Folds one hit's latency into the running mean.
    pub fn record_access(&mut self, latency_us: f64) {
        self.access_frequency += 1;
        let n = self.access_frequency as f64;
        self.avg_access_latency_us += (latency_us - self.avg_access_latency_us) / n;
    }
}

// == Policy ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPolicy {
    pub eviction_policy: Option<EvictionPolicy>,
    #[serde(default)]
    pub refresh_strategy: RefreshStrategy,
    #[serde(default)]
    pub invalidation_rules: Vec<String>,
}

// == Durations ==
/// Accepts a duration in seconds between zero and `MAX_DURATION_SECS`.
pub fn checked_duration(field: &str, secs: i64) -> Result<u64> {
    if secs < 0 {
        return Err(CacheError::Validation(format!(
            "{} must not be negative (got {})",
            field, secs
        )));
    }
    if secs > MAX_DURATION_SECS {
        return Err(CacheError::Validation(format!(
            "{} must be at most {} seconds (got {})",
            field, MAX_DURATION_SECS, secs
        )));
    }
    Ok(secs as u64)
}

// == Cache Entry ==
/// Represents a single cache entry with its payload and bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub entry_type: EntryType,
    pub payload: Value,
    /// Stored size in bytes (compressed size once compressed)
    pub size: u64,
    pub hits: u64,
    pub misses: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Seconds
    pub ttl: u64,
    /// Seconds the entry may live since its last access
    pub max_age: u64,
    pub status: EntryStatus,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    pub metadata: EntryMetadata,
    pub statistics: EntryStatistics,
    pub policy: EntryPolicy,
    pub strategy_id: String,
    pub invalidation_reason: Option<String>,
    /// Store sequence number at insertion; FIFO tie-break
    #[serde(default)]
    pub insert_seq: u64,
    /// Store sequence number at the last access; LRU tie-break
    #[serde(default)]
    pub access_seq: u64,
}

impl CacheEntry {
    // == Is Past Max Age ==
    /// True once more than `max_age` seconds have passed since the last access.
    ///
    /// A max age too large to represent never passes.
    pub fn is_past_max_age(&self, now: DateTime<Utc>) -> bool {
        match i64::try_from(self.max_age).ok().and_then(Duration::try_seconds) {
            Some(max_age) => now - self.last_accessed > max_age,
            None => false,
        }
    }

    // == Remaining Lifetime ==
    /// Milliseconds left before the entry passes its max age (negative once past).
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        let elapsed = (now - self.last_accessed).num_milliseconds();
        i64::try_from(self.max_age)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000)
            .saturating_sub(elapsed)
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.created_at).num_seconds().max(0) as u64
    }

    pub fn is_active(&self) -> bool {
        self.status == EntryStatus::Active
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag))
    }
}

// == Encoded Payload ==
/// A payload serialized and sized, ready to be committed to the store.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub value: Value,
    pub bytes: Vec<u8>,
    pub size: u64,
    pub checksum: String,
    pub compressed: bool,
}

impl EncodedPayload {
    /// Serializes a payload and derives its size and checksum.
    pub fn encode(value: Value) -> Result<Self> {
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| CacheError::Validation(format!("Payload is not serializable: {}", e)))?;

        if bytes.len() > MAX_VALUE_SIZE {
            return Err(CacheError::Validation(format!(
                "Payload exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            )));
        }

        Ok(Self {
            size: bytes.len() as u64,
            checksum: checksum(&bytes),
            value,
            bytes,
            compressed: false,
        })
    }

    /// Records the output of a compression hook. Larger output is ignored.
    pub fn with_compressed_size(mut self, compressed_len: usize) -> Self {
        let compressed_len = compressed_len as u64;
        if compressed_len <= self.size {
            self.size = compressed_len;
            self.compressed = true;
        }
        self
    }
}

// == Put Options ==
/// Caller-supplied write options. Unset fields fall back to rule output,
/// then strategy defaults (new entries) or the existing values (overwrites).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PutOptions {
    pub entry_type: Option<EntryType>,
    /// Seconds; negative values are rejected
    pub ttl: Option<i64>,
    /// Seconds; defaults to the TTL
    pub max_age: Option<i64>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
    pub strategy_id: Option<String>,
    pub compression: Option<bool>,
    pub content_type: Option<String>,
    pub source: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub policy: Option<EntryPolicy>,
}

impl PutOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(ttl) = self.ttl {
            checked_duration("TTL", ttl)?;
        }
        if let Some(max_age) = self.max_age {
            checked_duration("Max age", max_age)?;
        }
        Ok(())
    }

    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn with_ttl(mut self, secs: i64) -> Self {
        self.ttl = Some(secs);
        self
    }

    pub fn with_max_age(mut self, secs: i64) -> Self {
        self.max_age = Some(secs);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

// == Utility Functions ==
/// CRC32 of a byte slice, lowercase hex.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(bytes))
}
