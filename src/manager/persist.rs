//! Saving and reloading engine state through the persistence backend.

use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::CacheManager;
use crate::alerts::{AlertEngine, AlertThreshold, CacheAlert};
use crate::cache::{CacheEntry, EntryStore, StoreCounters};
use crate::catalog::{Catalog, ProfileRecords};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::optimization::{OptimizationTask, TaskRegistry, TaskSchedule};
use crate::persistence::{self, encode_record, load_record, PersistenceBackend};
use crate::rules::CacheRule;
use crate::strategy::CacheStrategy;

/// Persisted form of the alert engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AlertRecords {
    alerts: Vec<CacheAlert>,
    thresholds: Vec<AlertThreshold>,
}

pub(super) struct LoadedState {
    pub store: EntryStore,
    pub catalog: Catalog,
    pub tasks: TaskRegistry,
    pub alerts: AlertEngine,
}

/// Rebuilds engine state from the backend. Missing records start empty.
pub(super) fn load_state(
    backend: &dyn PersistenceBackend,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<LoadedState> {
    let entries: Vec<CacheEntry> = load_record(backend, persistence::ENTRIES)?.unwrap_or_default();
    let counters: StoreCounters = load_record(backend, persistence::COUNTERS)?.unwrap_or_default();
    let strategies: Vec<CacheStrategy> =
        load_record(backend, persistence::STRATEGIES)?.unwrap_or_default();
    let rules: Vec<CacheRule> = load_record(backend, persistence::RULES)?.unwrap_or_default();
    let profiles: ProfileRecords = load_record(backend, persistence::PROFILES)?.unwrap_or_default();
    let schedules: Vec<TaskSchedule> =
        load_record(backend, persistence::SCHEDULES)?.unwrap_or_default();
    let tasks: Vec<OptimizationTask> = load_record(backend, persistence::TASKS)?.unwrap_or_default();
    let alerts: Option<AlertRecords> = load_record(backend, persistence::ALERTS)?;

    if !entries.is_empty() || !strategies.is_empty() {
        info!(
            entries = entries.len(),
            strategies = strategies.len(),
            rules = rules.len(),
            tasks = tasks.len(),
            "Restored persisted state"
        );
    }

    let default_strategy = CacheStrategy::default_strategy(
        config.max_size_bytes,
        config.max_entries,
        config.default_ttl,
        config.eviction_policy,
        now,
    );
    let alerts = match alerts {
        Some(records) => AlertEngine::new(records.thresholds).with_alerts(records.alerts),
        None => AlertEngine::default(),
    };

    Ok(LoadedState {
        store: EntryStore::from_parts(entries, counters),
        catalog: Catalog::from_records(default_strategy, strategies, rules, profiles, schedules),
        tasks: TaskRegistry::from_tasks(tasks),
        alerts,
    })
}

impl CacheManager {
    // == Persist ==
    /// Saves every record now, whether or not anything changed.
    pub async fn persist_now(&self) -> Result<()> {
        self.dirty.store(false, Ordering::Release);
        let result = self.save_all().await;
        if result.is_err() {
            self.mark_dirty();
        }
        result
    }

    /// Saves only if something changed since the last save.
    pub async fn flush_if_dirty(&self) -> Result<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        match self.save_all().await {
            Ok(()) => Ok(true),
            Err(e) => {
                self.mark_dirty();
                Err(e)
            }
        }
    }

    async fn save_all(&self) -> Result<()> {
        let (entries, counters) = {
            let store = self.store.read().await;
            (store.snapshot(), store.counters().clone())
        };
        let (strategies, rules, profiles, schedules) = {
            let catalog = self.catalog.read().await;
            (
                catalog.list_strategies(),
                catalog.rules_record().to_vec(),
                catalog.profile_records(),
                catalog.list_schedules(),
            )
        };
        let tasks = self.tasks.read().await.list();
        let alerts = {
            let engine = self.alerts.read().await;
            AlertRecords {
                alerts: engine.list(),
                thresholds: engine.thresholds().to_vec(),
            }
        };

        let records = vec![
            (persistence::ENTRIES, encode_record(&entries)?),
            (persistence::COUNTERS, encode_record(&counters)?),
            (persistence::STRATEGIES, encode_record(&strategies)?),
            (persistence::RULES, encode_record(&rules)?),
            (persistence::PROFILES, encode_record(&profiles)?),
            (persistence::SCHEDULES, encode_record(&schedules)?),
            (persistence::TASKS, encode_record(&tasks)?),
            (persistence::ALERTS, encode_record(&alerts)?),
        ];

        // Backends may do blocking file I/O
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            records
                .iter()
                .try_for_each(|(name, bytes)| backend.save(name, bytes))
        })
        .await
        .map_err(|e| CacheError::Persistence(format!("save task failed: {}", e)))??;

        debug!(entries = entries.len(), "State persisted");
        Ok(())
    }
}
