//! Sweeps, metrics recomputation and alert evaluation.

use std::collections::HashMap;

use tracing::{debug, info};

use super::CacheManager;
use crate::alerts::CacheAlert;
use crate::cache::CapacityLimits;
use crate::metrics::{aggregate, CacheMetrics, StrategyRuntime};
use crate::strategy::DEFAULT_STRATEGY_ID;

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
}

impl CacheManager {
    // == Sweep ==
    /// Expires entries past their max age, then brings every strategy
    /// under its caps.
    pub async fn sweep_once(&self) -> SweepReport {
        let now = self.clock.now();
        let expired = self.store.write().await.expire_sweep(now).len();

        let limits: HashMap<String, CapacityLimits> = self
            .catalog
            .read()
            .await
            .list_strategies()
            .into_iter()
            .map(|s| (s.id.clone(), s.limits()))
            .collect();

        let mut evicted = 0;
        {
            let mut store = self.store.write().await;
            for strategy_id in store.strategy_ids() {
                let Some(limits) = limits
                    .get(&strategy_id)
                    .or_else(|| limits.get(DEFAULT_STRATEGY_ID))
                    .copied()
                else {
                    continue;
                };
                evicted += store
                    .enforce_capacity(&strategy_id, limits, now, None)
                    .evicted
                    .len();
            }
        }

        if expired > 0 || evicted > 0 {
            info!(expired, evicted, "Sweep changed entries");
            self.mark_dirty();
        } else {
            debug!("Sweep found nothing to do");
        }
        SweepReport { expired, evicted }
    }

    // == Metrics ==
    /// Computes metrics from the current store without recording a sample.
    pub async fn metrics(&self) -> CacheMetrics {
        let strategies = self.catalog.read().await.list_strategies();
        let history = self.history.lock().samples();
        let now = self.clock.now();

        let store = self.store.read().await;
        aggregate(
            &store,
            &strategies,
            |id| {
                let trackers = self.trackers.lock();
                trackers
                    .get(id)
                    .map(|t| {
                        let (hits, misses) = t.lookups();
                        StrategyRuntime {
                            performance: t.snapshot(),
                            hits,
                            misses,
                            uptime_secs: t.uptime_secs(),
                            error_rate: t.error_rate(),
                        }
                    })
                    .unwrap_or_default()
            },
            history,
            now,
        )
    }

    /// Computes metrics, records a history sample and stores each
    /// strategy's health and performance on the strategy record.
    pub async fn refresh_metrics(&self) -> CacheMetrics {
        let metrics = self.metrics().await;
        self.history.lock().push(metrics.sample());

        let mut catalog = self.catalog.write().await;
        for report in &metrics.strategies {
            catalog.record_health(&report.id, report.health.clone(), report.performance.clone());
        }
        metrics
    }

    // == Alerts ==
    /// Checks fresh metrics against strategy health and thresholds.
    pub async fn evaluate_alerts(&self) -> Vec<CacheAlert> {
        let metrics = self.metrics().await;
        self.evaluate_with(&metrics).await
    }

    pub(crate) async fn evaluate_with(&self, metrics: &CacheMetrics) -> Vec<CacheAlert> {
        let raised = self
            .alerts
            .write()
            .await
            .evaluate(metrics, self.clock.now());
        if !raised.is_empty() {
            self.mark_dirty();
        }
        raised
    }
}
