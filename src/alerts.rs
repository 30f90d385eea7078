//! Alert Engine
//!
//! Raises alerts from strategy health and registered metric thresholds,
//! deduplicating open alerts, and tracks acknowledge/resolve transitions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::metrics::{CacheMetrics, MetricKind};
use crate::strategy::HealthStatus;

// == Severity ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(name)
    }
}

// == Source ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSource {
    /// "strategy", "metric" or a caller-chosen category
    pub source_type: String,
    pub source_id: String,
    pub metric: String,
    pub threshold: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub done: bool,
    pub by: Option<String>,
    pub at: Option<DateTime<Utc>>,
}

// == Alert ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheAlert {
    pub id: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub source: AlertSource,
    pub acknowledged: Acknowledgement,
    pub resolved: Acknowledgement,
    pub created_at: DateTime<Utc>,
}

impl CacheAlert {
    /// Open alerts take part in deduplication.
    pub fn is_open(&self) -> bool {
        !self.acknowledged.done && !self.resolved.done
    }

    fn dedup_key(&self) -> (&str, &str, AlertSeverity) {
        (&self.source.source_type, &self.source.source_id, self.severity)
    }
}

/// Input for raising an alert by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSpec {
    pub severity: AlertSeverity,
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub source: AlertSource,
}

// == Thresholds ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Above,
    Below,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub metric: MetricKind,
    pub comparison: Comparison,
    pub value: f64,
    pub severity: AlertSeverity,
}

impl AlertThreshold {
    pub fn is_breached(&self, actual: f64) -> bool {
        match self.comparison {
            Comparison::Above => actual > self.value,
            Comparison::Below => actual < self.value,
        }
    }

    /// Hit rate below 50% warns; memory pressure above 90% is critical.
    pub fn defaults() -> Vec<Self> {
        vec![
            AlertThreshold {
                metric: MetricKind::HitRate,
                comparison: Comparison::Below,
                value: 50.0,
                severity: AlertSeverity::Warning,
            },
            AlertThreshold {
                metric: MetricKind::MemoryPressure,
                comparison: Comparison::Above,
                value: 0.9,
                severity: AlertSeverity::Critical,
            },
        ]
    }
}

// == Alert Engine ==
#[derive(Debug)]
pub struct AlertEngine {
    alerts: BTreeMap<String, CacheAlert>,
    thresholds: Vec<AlertThreshold>,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(AlertThreshold::defaults())
    }
}

impl AlertEngine {
    pub fn new(thresholds: Vec<AlertThreshold>) -> Self {
        Self {
            alerts: BTreeMap::new(),
            thresholds,
        }
    }

    pub fn with_alerts(mut self, alerts: Vec<CacheAlert>) -> Self {
        self.alerts = alerts.into_iter().map(|a| (a.id.clone(), a)).collect();
        self
    }

    pub fn register_threshold(&mut self, threshold: AlertThreshold) -> Result<()> {
        if !threshold.value.is_finite() {
            return Err(CacheError::Validation(
                "Threshold value must be a finite number".to_string(),
            ));
        }
        self.thresholds.push(threshold);
        Ok(())
    }

    pub fn thresholds(&self) -> &[AlertThreshold] {
        &self.thresholds
    }

    // == Raise ==
    /// Records an alert unless an open one with the same source and severity
    /// exists. Returns the new alert, or None when deduplicated.
    pub fn raise(&mut self, spec: AlertSpec, now: DateTime<Utc>) -> Option<CacheAlert> {
        let alert = CacheAlert {
            id: Uuid::new_v4().to_string(),
            severity: spec.severity,
            title: spec.title,
            message: spec.message,
            source: spec.source,
            acknowledged: Acknowledgement::default(),
            resolved: Acknowledgement::default(),
            created_at: now,
        };

        let duplicate = self
            .alerts
            .values()
            .any(|existing| existing.is_open() && existing.dedup_key() == alert.dedup_key());
        if duplicate {
            return None;
        }

        warn!(
            severity = %alert.severity,
            source = %alert.source.source_type,
            id = %alert.source.source_id,
            "{}",
            alert.title
        );
        self.alerts.insert(alert.id.clone(), alert.clone());
        Some(alert)
    }

    // == Evaluate ==
    /// Checks strategy health and every threshold against fresh metrics.
    ///
    /// Returns the alerts that were newly raised.
    pub fn evaluate(&mut self, metrics: &CacheMetrics, now: DateTime<Utc>) -> Vec<CacheAlert> {
        let mut raised = Vec::new();

        for report in &metrics.strategies {
            let severity = match report.health.status {
                HealthStatus::Healthy => continue,
                HealthStatus::Warning => AlertSeverity::Warning,
                HealthStatus::Critical => AlertSeverity::Critical,
            };
            let actual = report.health.hit_rate.unwrap_or(0.0);
            let threshold = if severity == AlertSeverity::Critical {
                crate::strategy::CRITICAL_HIT_RATE
            } else {
                crate::strategy::WARNING_HIT_RATE
            };
            let spec = AlertSpec {
                severity,
                title: format!("Strategy '{}' is {}", report.name, report.health.status),
                message: format!("Hit rate {:.1}% is below {:.0}%", actual, threshold),
                source: AlertSource {
                    source_type: "strategy".to_string(),
                    source_id: report.id.clone(),
                    metric: MetricKind::HitRate.name().to_string(),
                    threshold,
                    actual,
                },
            };
            raised.extend(self.raise(spec, now));
        }

        let breaches: Vec<(AlertThreshold, f64)> = self
            .thresholds
            .iter()
            .filter_map(|t| {
                let actual = metrics.value_of(t.metric);
                t.is_breached(actual).then(|| (t.clone(), actual))
            })
            .collect();

        for (threshold, actual) in breaches {
            // A hit rate of zero with no traffic is not a breach
            if threshold.metric == MetricKind::HitRate && metrics.stats.hits + metrics.stats.misses == 0 {
                continue;
            }
            let name = threshold.metric.name();
            let spec = AlertSpec {
                severity: threshold.severity,
                title: format!("Metric '{}' crossed its threshold", name),
                message: format!(
                    "{} is {:.2}, {} threshold {:.2}",
                    name,
                    actual,
                    match threshold.comparison {
                        Comparison::Above => "above",
                        Comparison::Below => "below",
                    },
                    threshold.value
                ),
                source: AlertSource {
                    source_type: "metric".to_string(),
                    source_id: name.to_string(),
                    metric: name.to_string(),
                    threshold: threshold.value,
                    actual,
                },
            };
            raised.extend(self.raise(spec, now));
        }

        raised
    }

    // == Acknowledge / Resolve ==
    /// Idempotent: acknowledging twice keeps the first actor and time.
    pub fn acknowledge(&mut self, id: &str, actor: &str, now: DateTime<Utc>) -> Result<CacheAlert> {
        let alert = self.get_mut(id)?;
        if !alert.acknowledged.done {
            alert.acknowledged = Acknowledgement {
                done: true,
                by: Some(actor.to_string()),
                at: Some(now),
            };
            info!(alert = id, actor, "Alert acknowledged");
        }
        Ok(alert.clone())
    }

    /// Idempotent: resolving twice keeps the first actor and time.
    pub fn resolve(&mut self, id: &str, actor: &str, now: DateTime<Utc>) -> Result<CacheAlert> {
        let alert = self.get_mut(id)?;
        if !alert.resolved.done {
            alert.resolved = Acknowledgement {
                done: true,
                by: Some(actor.to_string()),
                at: Some(now),
            };
            info!(alert = id, actor, "Alert resolved");
        }
        Ok(alert.clone())
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut CacheAlert> {
        self.alerts
            .get_mut(id)
            .ok_or_else(|| CacheError::NotFound(format!("alert '{}'", id)))
    }

    pub fn list(&self) -> Vec<CacheAlert> {
        let mut alerts: Vec<CacheAlert> = self.alerts.values().cloned().collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStats;
    use crate::metrics::StrategyReport;
    use crate::strategy::{StrategyHealth, StrategyPerformance};

    fn metrics(hits: u64, misses: u64, memory_pressure: f64, status: HealthStatus) -> CacheMetrics {
        let stats = CacheStats {
            hits,
            misses,
            hit_rate: crate::cache::hit_rate(hits, misses),
            ..Default::default()
        };
        CacheMetrics {
            generated_at: Utc::now(),
            stats,
            memory_pressure,
            hot_keys: Vec::new(),
            strategies: vec![StrategyReport {
                id: "default".to_string(),
                name: "Default".to_string(),
                entries: 0,
                size: 0,
                hits,
                misses,
                health: StrategyHealth {
                    status,
                    hit_rate: Some(crate::cache::hit_rate(hits, misses)),
                    ..Default::default()
                },
                performance: StrategyPerformance::default(),
            }],
            history: Vec::new(),
        }
    }

    fn manual_spec(severity: AlertSeverity) -> AlertSpec {
        AlertSpec {
            severity,
            title: "disk".to_string(),
            message: String::new(),
            source: AlertSource {
                source_type: "manual".to_string(),
                source_id: "ops".to_string(),
                metric: "none".to_string(),
                threshold: 0.0,
                actual: 0.0,
            },
        }
    }

    #[test]
    fn test_healthy_metrics_raise_nothing() {
        let mut engine = AlertEngine::default();
        let raised = engine.evaluate(&metrics(9, 1, 0.1, HealthStatus::Healthy), Utc::now());
        assert!(raised.is_empty());
    }

    #[test]
    fn test_no_traffic_does_not_alert_on_hit_rate() {
        let mut engine = AlertEngine::default();
        let raised = engine.evaluate(&metrics(0, 0, 0.0, HealthStatus::Healthy), Utc::now());
        assert!(raised.is_empty());
    }

    #[test]
    fn test_critical_strategy_and_threshold_alerts() {
        let mut engine = AlertEngine::default();
        let raised = engine.evaluate(&metrics(1, 9, 0.95, HealthStatus::Critical), Utc::now());

        let sources: Vec<(&str, &str, AlertSeverity)> = raised
            .iter()
            .map(|a| (a.source.source_type.as_str(), a.source.source_id.as_str(), a.severity))
            .collect();
        assert_eq!(
            sources,
            vec![
                ("strategy", "default", AlertSeverity::Critical),
                ("metric", "hit_rate", AlertSeverity::Warning),
                ("metric", "memory_pressure", AlertSeverity::Critical),
            ]
        );
    }

    #[test]
    fn test_repeated_breach_is_deduplicated() {
        let mut engine = AlertEngine::default();
        let breach = metrics(1, 9, 0.0, HealthStatus::Critical);

        let first = engine.evaluate(&breach, Utc::now());
        let second = engine.evaluate(&breach, Utc::now());

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(engine.list().len(), 2);
    }

    #[test]
    fn test_acknowledged_alert_allows_new_one() {
        let mut engine = AlertEngine::default();
        let now = Utc::now();

        let alert = engine.raise(manual_spec(AlertSeverity::Error), now).unwrap();
        assert!(engine.raise(manual_spec(AlertSeverity::Error), now).is_none());
        // Different severity is a different alert
        assert!(engine.raise(manual_spec(AlertSeverity::Info), now).is_some());

        engine.acknowledge(&alert.id, "alice", now).unwrap();
        assert!(engine.raise(manual_spec(AlertSeverity::Error), now).is_some());
    }

    #[test]
    fn test_acknowledge_and_resolve_are_idempotent() {
        let mut engine = AlertEngine::default();
        let now = Utc::now();
        let alert = engine.raise(manual_spec(AlertSeverity::Warning), now).unwrap();

        let first = engine.acknowledge(&alert.id, "alice", now).unwrap();
        let second = engine
            .acknowledge(&alert.id, "bob", now + chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.acknowledged.by.as_deref(), Some("alice"));

        let resolved = engine.resolve(&alert.id, "bob", now).unwrap();
        assert!(resolved.resolved.done);
        assert_eq!(engine.resolve(&alert.id, "carol", now).unwrap(), resolved);
    }

    #[test]
    fn test_unknown_alert_is_not_found() {
        let mut engine = AlertEngine::default();
        assert!(matches!(
            engine.acknowledge("nope", "a", Utc::now()),
            Err(CacheError::NotFound(_))
        ));
    }

    #[test]
    fn test_custom_threshold() {
        let mut engine = AlertEngine::new(Vec::new());
        engine
            .register_threshold(AlertThreshold {
                metric: MetricKind::Evictions,
                comparison: Comparison::Above,
                value: 10.0,
                severity: AlertSeverity::Info,
            })
            .unwrap();
        assert!(engine
            .register_threshold(AlertThreshold {
                metric: MetricKind::Evictions,
                comparison: Comparison::Above,
                value: f64::NAN,
                severity: AlertSeverity::Info,
            })
            .is_err());

        let mut m = metrics(10, 0, 0.0, HealthStatus::Healthy);
        m.stats.evictions = 11;
        let raised = engine.evaluate(&m, Utc::now());
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].source.source_id, "evictions");
    }
}
