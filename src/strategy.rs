//! Strategy Registry types
//!
//! Named capacity/eviction configurations that entries are grouped under,
//! plus the live performance and health figures tracked for each.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{checked_duration, CapacityLimits, EvictionPolicy};
use crate::error::{CacheError, Result};

/// Id of the built-in strategy every unassigned entry belongs to.
pub const DEFAULT_STRATEGY_ID: &str = "default";

/// Hit rate (percent) below which a strategy is critical.
pub const CRITICAL_HIT_RATE: f64 = 50.0;
/// Hit rate (percent) below which a strategy is in warning.
pub const WARNING_HIT_RATE: f64 = 70.0;

const LATENCY_WINDOW: usize = 1024;

// == Features ==
/// Capability flags. Replication and encryption are carried for backends
/// that honor them; this engine does not act on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyFeatures {
    pub compression: bool,
    pub encryption: bool,
    pub replication: bool,
}

// == Performance ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub avg_hit_time_us: f64,
    pub avg_miss_time_us: f64,
    /// Lookups per second since the tracker started
    pub throughput: f64,
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub total_operations: u64,
}

// == Health ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Maps a hit rate to a status. No lookups at all counts as healthy.
    pub fn from_hit_rate(hit_rate: Option<f64>) -> Self {
        match hit_rate {
            Some(rate) if rate < CRITICAL_HIT_RATE => HealthStatus::Critical,
            Some(rate) if rate < WARNING_HIT_RATE => HealthStatus::Warning,
            _ => HealthStatus::Healthy,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyHealth {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    /// Fraction of writes that failed validation or hit the capacity valve
    pub error_rate: f64,
    /// Current size over `max_size`
    pub memory_pressure: f64,
    /// Percent; None until the strategy has seen a lookup
    pub hit_rate: Option<f64>,
}

// == Cache Strategy ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStrategy {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Bytes
    pub max_size: u64,
    pub max_entries: u64,
    /// Seconds
    pub default_ttl: u64,
    pub eviction_policy: EvictionPolicy,
    pub features: StrategyFeatures,
    pub performance: StrategyPerformance,
    pub health: StrategyHealth,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySpec {
    /// Optional caller-chosen id; a UUID is generated otherwise
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub max_size: i64,
    pub max_entries: i64,
    pub default_ttl: i64,
    pub eviction_policy: EvictionPolicy,
    pub features: StrategyFeatures,
}

/// Partial update; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub max_size: Option<i64>,
    pub max_entries: Option<i64>,
    pub default_ttl: Option<i64>,
    pub eviction_policy: Option<EvictionPolicy>,
    pub features: Option<StrategyFeatures>,
}

impl CacheStrategy {
    /// The built-in strategy, sized from configuration.
    pub fn default_strategy(
        max_size: u64,
        max_entries: u64,
        default_ttl: u64,
        eviction_policy: EvictionPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DEFAULT_STRATEGY_ID.to_string(),
            name: "Default".to_string(),
            description: Some("Entries without an explicit or rule-assigned strategy".to_string()),
            max_size,
            max_entries,
            default_ttl,
            eviction_policy,
            features: StrategyFeatures::default(),
            performance: StrategyPerformance::default(),
            health: StrategyHealth::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_spec(spec: StrategySpec, now: DateTime<Utc>) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(CacheError::Validation("Strategy name cannot be empty".to_string()));
        }
        let id = match spec.id {
            Some(id) if id.trim().is_empty() => {
                return Err(CacheError::Validation("Strategy id cannot be blank".to_string()))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        Ok(Self {
            id,
            name: spec.name,
            description: spec.description,
            max_size: positive_cap("max_size", spec.max_size)?,
            max_entries: positive_cap("max_entries", spec.max_entries)?,
            default_ttl: checked_duration("default_ttl", spec.default_ttl)?,
            eviction_policy: spec.eviction_policy,
            features: spec.features,
            performance: StrategyPerformance::default(),
            health: StrategyHealth::default(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a partial update. Nothing changes if any field is invalid.
    pub fn apply_update(&mut self, update: StrategyUpdate, now: DateTime<Utc>) -> Result<()> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(CacheError::Validation("Strategy name cannot be empty".to_string()));
            }
        }
        let max_size = update.max_size.map(|v| positive_cap("max_size", v)).transpose()?;
        let max_entries = update
            .max_entries
            .map(|v| positive_cap("max_entries", v))
            .transpose()?;
        let default_ttl = update
            .default_ttl
            .map(|v| checked_duration("default_ttl", v))
            .transpose()?;

        if let Some(name) = update.name {
            self.name = name;
        }
        if update.description.is_some() {
            self.description = update.description;
        }
        if let Some(max_size) = max_size {
            self.max_size = max_size;
        }
        if let Some(max_entries) = max_entries {
            self.max_entries = max_entries;
        }
        if let Some(default_ttl) = default_ttl {
            self.default_ttl = default_ttl;
        }
        if let Some(policy) = update.eviction_policy {
            self.eviction_policy = policy;
        }
        if let Some(features) = update.features {
            self.features = features;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn limits(&self) -> CapacityLimits {
        CapacityLimits {
            max_entries: self.max_entries,
            max_size: self.max_size,
            policy: self.eviction_policy,
        }
    }
}

fn positive_cap(field: &str, value: i64) -> Result<u64> {
    if value <= 0 {
        return Err(CacheError::Validation(format!(
            "{} must be greater than zero (got {})",
            field, value
        )));
    }
    Ok(value as u64)
}

// == Performance Tracker ==
/// Rolling lookup latencies and write outcomes for one strategy.
#[derive(Debug)]
pub struct PerformanceTracker {
    started: Instant,
    hit_latencies: VecDeque<f64>,
    miss_latencies: VecDeque<f64>,
    hits: u64,
    misses: u64,
    writes: u64,
    write_errors: u64,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            hit_latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            miss_latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            hits: 0,
            misses: 0,
            writes: 0,
            write_errors: 0,
        }
    }
}

impl PerformanceTracker {
    pub fn record_lookup(&mut self, hit: bool, latency_us: f64) {
        let window = if hit {
            &mut self.hit_latencies
        } else {
            &mut self.miss_latencies
        };
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency_us);
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    /// Lookups routed to this strategy, absent keys included.
    pub fn lookups(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn record_write(&mut self, ok: bool) {
        self.writes += 1;
        if !ok {
            self.write_errors += 1;
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.writes == 0 {
            0.0
        } else {
            self.write_errors as f64 / self.writes as f64
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> StrategyPerformance {
        let mut all: Vec<f64> = self
            .hit_latencies
            .iter()
            .chain(self.miss_latencies.iter())
            .copied()
            .collect();
        all.sort_by(|a, b| a.total_cmp(b));

        let elapsed = self.started.elapsed().as_secs_f64();
        StrategyPerformance {
            avg_hit_time_us: mean(&self.hit_latencies),
            avg_miss_time_us: mean(&self.miss_latencies),
            throughput: if elapsed > 0.0 {
                (self.hits + self.misses) as f64 / elapsed
            } else {
                0.0
            },
            p50_us: percentile(&all, 0.50),
            p95_us: percentile(&all, 0.95),
            p99_us: percentile(&all, 0.99),
            total_operations: self.hits + self.misses + self.writes,
        }
    }
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(max_size: i64, max_entries: i64) -> StrategySpec {
        StrategySpec {
            name: "hot".to_string(),
            max_size,
            max_entries,
            default_ttl: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_health_thresholds() {
        assert_eq!(HealthStatus::from_hit_rate(None), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_hit_rate(Some(70.0)), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_hit_rate(Some(69.9)), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_hit_rate(Some(50.0)), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_hit_rate(Some(49.9)), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_hit_rate(Some(0.0)), HealthStatus::Critical);
    }

    #[test]
    fn test_strategy_caps_must_be_positive() {
        assert!(CacheStrategy::from_spec(spec(0, 10), Utc::now()).is_err());
        assert!(CacheStrategy::from_spec(spec(10, -1), Utc::now()).is_err());
        let strategy = CacheStrategy::from_spec(spec(1024, 10), Utc::now()).unwrap();
        assert_eq!(strategy.max_size, 1024);
        assert_eq!(strategy.eviction_policy, EvictionPolicy::Lru);
    }

    #[test]
    fn test_default_ttl_is_bounded() {
        let mut unbounded = spec(1024, 10);
        unbounded.default_ttl = i64::MAX;
        assert!(CacheStrategy::from_spec(unbounded, Utc::now()).is_err());

        let mut strategy = CacheStrategy::from_spec(spec(1024, 10), Utc::now()).unwrap();
        let update = StrategyUpdate {
            default_ttl: Some(i64::MAX),
            ..Default::default()
        };
        assert!(strategy.apply_update(update, Utc::now()).is_err());
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let mut strategy = CacheStrategy::from_spec(spec(1024, 10), Utc::now()).unwrap();
        let update = StrategyUpdate {
            name: Some("renamed".to_string()),
            max_entries: Some(0),
            ..Default::default()
        };

        assert!(strategy.apply_update(update, Utc::now()).is_err());
        assert_eq!(strategy.name, "hot");

        let update = StrategyUpdate {
            max_entries: Some(5),
            eviction_policy: Some(EvictionPolicy::Lfu),
            ..Default::default()
        };
        strategy.apply_update(update, Utc::now()).unwrap();
        assert_eq!(strategy.max_entries, 5);
        assert_eq!(strategy.eviction_policy, EvictionPolicy::Lfu);
    }

    #[test]
    fn test_tracker_percentiles() {
        let mut tracker = PerformanceTracker::default();
        for i in 1..=100 {
            tracker.record_lookup(i % 2 == 0, i as f64);
        }

        let perf = tracker.snapshot();
        assert_eq!(perf.p50_us, 50.0);
        assert_eq!(perf.p95_us, 95.0);
        assert_eq!(perf.p99_us, 99.0);
        assert_eq!(perf.total_operations, 100);
        assert_eq!(tracker.lookups(), (50, 50));
        assert!(perf.avg_hit_time_us > perf.avg_miss_time_us);
    }

    #[test]
    fn test_tracker_error_rate() {
        let mut tracker = PerformanceTracker::default();
        assert_eq!(tracker.error_rate(), 0.0);
        tracker.record_write(true);
        tracker.record_write(false);
        assert_eq!(tracker.error_rate(), 0.5);
    }
}
