//! Eviction Module
//!
//! Orders eviction candidates according to a strategy's policy.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::entry::{CacheEntry, Priority};
use crate::error::CacheError;

// == Eviction Policy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed first
    #[default]
    Lru,
    /// Fewest hits first, oldest access breaks ties
    Lfu,
    /// Oldest insertion first
    Fifo,
    /// Soonest to expire first
    Ttl,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::Ttl => "ttl",
        };
        f.write_str(name)
    }
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "ttl" => Ok(EvictionPolicy::Ttl),
            other => Err(CacheError::Validation(format!(
                "Unknown eviction policy: {}",
                other
            ))),
        }
    }
}

impl EvictionPolicy {
    // == Compare ==
    /// Orders two entries so that the preferred victim sorts first.
    pub fn compare(&self, a: &CacheEntry, b: &CacheEntry, now: DateTime<Utc>) -> Ordering {
        let by_recency =
            |a: &CacheEntry, b: &CacheEntry| (a.last_accessed, a.access_seq).cmp(&(b.last_accessed, b.access_seq));

        match self {
            EvictionPolicy::Lru => by_recency(a, b),
            EvictionPolicy::Lfu => a.hits.cmp(&b.hits).then_with(|| by_recency(a, b)),
            EvictionPolicy::Fifo => (a.created_at, a.insert_seq).cmp(&(b.created_at, b.insert_seq)),
            EvictionPolicy::Ttl => a
                .remaining_ms(now)
                .cmp(&b.remaining_ms(now))
                .then_with(|| by_recency(a, b)),
        }
    }
}

// == Victim Order ==
/// Returns candidate keys in eviction order.
///
/// Non-critical entries always come before critical ones; within each group
/// the policy decides. `protected` is never returned.
pub fn victim_order<'a, I>(
    policy: EvictionPolicy,
    candidates: I,
    now: DateTime<Utc>,
    protected: Option<&str>,
) -> Vec<String>
where
    I: IntoIterator<Item = &'a CacheEntry>,
{
    let mut ordered: Vec<&CacheEntry> = candidates
        .into_iter()
        .filter(|entry| Some(entry.key.as_str()) != protected)
        .collect();

    ordered.sort_by(|a, b| {
        let a_critical = a.priority == Priority::Critical;
        let b_critical = b.priority == Priority::Critical;
        a_critical
            .cmp(&b_critical)
            .then_with(|| policy.compare(a, b, now))
    });

    ordered.into_iter().map(|entry| entry.key.clone()).collect()
}
