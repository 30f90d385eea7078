//! Metrics Aggregator
//!
//! Historical samples, hot keys and per-strategy reports layered on top of
//! the point-in-time `CacheStats`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{hit_rate, CacheStats, EntryStore};
use crate::strategy::{CacheStrategy, HealthStatus, StrategyHealth, StrategyPerformance};

const HOT_KEY_LIMIT: usize = 10;

// == Metric Names ==
/// Aggregate values alert thresholds can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    HitRate,
    MemoryPressure,
    TotalSize,
    TotalEntries,
    Evictions,
    ExpiredEntries,
    CapacityExceeded,
}

impl MetricKind {
    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::HitRate => "hit_rate",
            MetricKind::MemoryPressure => "memory_pressure",
            MetricKind::TotalSize => "total_size",
            MetricKind::TotalEntries => "total_entries",
            MetricKind::Evictions => "evictions",
            MetricKind::ExpiredEntries => "expired_entries",
            MetricKind::CapacityExceeded => "capacity_exceeded",
        }
    }
}

// == Samples ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    pub hit_rate: f64,
    pub total_size: u64,
    pub total_entries: usize,
    pub memory_pressure: f64,
}

/// Bounded ring of samples; the oldest falls off when full.
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    samples: VecDeque<MetricsSample>,
    capacity: usize,
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, sample: MetricsSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn samples(&self) -> Vec<MetricsSample> {
        self.samples.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// == Reports ==
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotKey {
    pub key: String,
    pub hits: u64,
    pub strategy_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyReport {
    pub id: String,
    pub name: String,
    pub entries: u64,
    pub size: u64,
    pub hits: u64,
    pub misses: u64,
    pub health: StrategyHealth,
    pub performance: StrategyPerformance,
}

/// Everything `metrics()` reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub generated_at: DateTime<Utc>,
    pub stats: CacheStats,
    /// Total size over the combined `max_size` of all strategies
    pub memory_pressure: f64,
    pub hot_keys: Vec<HotKey>,
    pub strategies: Vec<StrategyReport>,
    pub history: Vec<MetricsSample>,
}

impl CacheMetrics {
    /// Current value of a watched metric.
    pub fn value_of(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::HitRate => self.stats.hit_rate,
            MetricKind::MemoryPressure => self.memory_pressure,
            MetricKind::TotalSize => self.stats.total_size as f64,
            MetricKind::TotalEntries => self.stats.total_entries as f64,
            MetricKind::Evictions => self.stats.evictions as f64,
            MetricKind::ExpiredEntries => {
                self.stats.by_status.get("expired").copied().unwrap_or(0) as f64
            }
            MetricKind::CapacityExceeded => self.stats.capacity_exceeded as f64,
        }
    }

    pub fn sample(&self) -> MetricsSample {
        MetricsSample {
            timestamp: self.generated_at,
            hit_rate: self.stats.hit_rate,
            total_size: self.stats.total_size,
            total_entries: self.stats.total_entries,
            memory_pressure: self.memory_pressure,
        }
    }
}

// == Aggregate ==
/// Per-strategy lookup and write figures gathered outside the store.
#[derive(Debug, Clone, Default)]
pub struct StrategyRuntime {
    pub performance: StrategyPerformance,
    /// Lookups attributed to the strategy, including misses on absent keys
    pub hits: u64,
    pub misses: u64,
    pub uptime_secs: u64,
    pub error_rate: f64,
}

/// Computes metrics from one consistent view of the store.
///
/// `runtime` supplies latency and error figures per strategy id.
pub fn aggregate<F>(
    store: &EntryStore,
    strategies: &[CacheStrategy],
    runtime: F,
    history: Vec<MetricsSample>,
    now: DateTime<Utc>,
) -> CacheMetrics
where
    F: Fn(&str) -> StrategyRuntime,
{
    let stats = CacheStats::compute(store);

    let mut hot: Vec<HotKey> = store
        .iter()
        .filter(|e| e.hits > 0)
        .map(|e| HotKey {
            key: e.key.clone(),
            hits: e.hits,
            strategy_id: e.strategy_id.clone(),
        })
        .collect();
    hot.sort_by(|a, b| b.hits.cmp(&a.hits).then_with(|| a.key.cmp(&b.key)));
    hot.truncate(HOT_KEY_LIMIT);

    let reports: Vec<StrategyReport> = strategies
        .iter()
        .map(|strategy| strategy_report(store, strategy, runtime(&strategy.id)))
        .collect();

    let capacity = strategies
        .iter()
        .fold(0u64, |total, s| total.saturating_add(s.max_size));
    let memory_pressure = if capacity == 0 {
        0.0
    } else {
        stats.total_size as f64 / capacity as f64
    };

    CacheMetrics {
        generated_at: now,
        stats,
        memory_pressure,
        hot_keys: hot,
        strategies: reports,
        history,
    }
}

fn strategy_report(store: &EntryStore, strategy: &CacheStrategy, runtime: StrategyRuntime) -> StrategyReport {
    let (entries, size) = store.strategy_usage(&strategy.id);
    let (hits, misses) = (runtime.hits, runtime.misses);

    let rate = if hits + misses == 0 {
        None
    } else {
        Some(hit_rate(hits, misses))
    };

    StrategyReport {
        id: strategy.id.clone(),
        name: strategy.name.clone(),
        entries,
        size,
        hits,
        misses,
        health: StrategyHealth {
            status: HealthStatus::from_hit_rate(rate),
            uptime_secs: runtime.uptime_secs,
            error_rate: runtime.error_rate,
            memory_pressure: if strategy.max_size == 0 {
                0.0
            } else {
                size as f64 / strategy.max_size as f64
            },
            hit_rate: rate,
        },
        performance: runtime.performance,
    }
}
