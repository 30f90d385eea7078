//! Cache Manager
//!
//! The engine facade. Owns the entry store, the catalog, the task registry
//! and the alert engine, each behind its own lock, and the background loops
//! that maintain them.
//!
//! Lock discipline: no two of the store, catalog, task and alert locks are
//! ever held at the same time. Data is cloned out of one before the next is
//! taken.

mod entries;
mod maintenance;
mod optimize;
mod persist;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alerts::{AlertEngine, AlertSpec, AlertThreshold, CacheAlert};
use crate::cache::CapacityLimits;
use crate::catalog::{ActiveSet, Catalog};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::hooks::{Compressor, Fetcher, NoopCompressor};
use crate::metrics::MetricsHistory;
use crate::optimization::{ScheduleSpec, TaskRegistry, TaskSchedule};
use crate::persistence::{FileBackend, MemoryBackend, PersistenceBackend};
use crate::profile::{CacheProfile, ProfileSpec};
use crate::rules::{CacheRule, RuleSpec};
use crate::strategy::{CacheStrategy, PerformanceTracker, StrategySpec, StrategyUpdate};
use crate::tasks;

pub use maintenance::SweepReport;

// == Builder ==
/// Assembles a `CacheManager` with optional collaborators.
pub struct CacheManagerBuilder {
    config: Config,
    clock: Option<SharedClock>,
    compressor: Option<Arc<dyn Compressor>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    backend: Option<Arc<dyn PersistenceBackend>>,
}

impl CacheManagerBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Builds the engine, reloading any state the backend holds.
    ///
    /// Without an explicit backend, `DATA_DIR` selects a file backend and
    /// its absence an in-memory one.
    pub fn build(self) -> Result<CacheManager> {
        let backend: Arc<dyn PersistenceBackend> = match (self.backend, &self.config.data_dir) {
            (Some(backend), _) => backend,
            (None, Some(dir)) => Arc::new(FileBackend::open(dir)?),
            (None, None) => Arc::new(MemoryBackend::new()),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let state = persist::load_state(backend.as_ref(), &self.config, clock.now())?;
        let (shutdown, _) = watch::channel(false);

        Ok(CacheManager {
            store: RwLock::new(state.store),
            catalog: RwLock::new(state.catalog),
            tasks: RwLock::new(state.tasks),
            alerts: RwLock::new(state.alerts),
            history: Mutex::new(MetricsHistory::new(self.config.metrics_history)),
            trackers: Mutex::new(HashMap::new()),
            clock,
            compressor: self.compressor.unwrap_or_else(|| Arc::new(NoopCompressor)),
            fetcher: self.fetcher,
            backend,
            dirty: AtomicBool::new(false),
            config: self.config,
            shutdown,
            workers: Mutex::new(Vec::new()),
        })
    }
}

// == Cache Manager ==
pub struct CacheManager {
    store: RwLock<crate::cache::EntryStore>,
    catalog: RwLock<Catalog>,
    tasks: RwLock<TaskRegistry>,
    alerts: RwLock<AlertEngine>,
    history: Mutex<MetricsHistory>,
    trackers: Mutex<HashMap<String, PerformanceTracker>>,
    clock: SharedClock,
    compressor: Arc<dyn Compressor>,
    fetcher: Option<Arc<dyn Fetcher>>,
    backend: Arc<dyn PersistenceBackend>,
    dirty: AtomicBool,
    config: Config,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheManager {
    pub fn builder(config: Config) -> CacheManagerBuilder {
        CacheManagerBuilder {
            config,
            clock: None,
            compressor: None,
            fetcher: None,
            backend: None,
        }
    }

    /// Builds an engine with the system clock and no collaborators.
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn track<F: FnOnce(&mut PerformanceTracker)>(&self, strategy_id: &str, f: F) {
        let mut trackers = self.trackers.lock();
        f(trackers.entry(strategy_id.to_string()).or_default());
    }

    async fn limits_of(&self, strategy_id: &str) -> Result<CapacityLimits> {
        let catalog = self.catalog.read().await;
        Ok(catalog.strategy(strategy_id)?.limits())
    }

    // == Lifecycle ==
    /// Spawns the sweep, scheduler, metrics and persistence loops.
    ///
    /// Calling it again while the loops run does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        let config = &self.config;
        workers.push(tasks::spawn_sweep_task(
            self.clone(),
            config.sweep_interval,
            self.shutdown.subscribe(),
        ));
        workers.push(tasks::spawn_scheduler_task(
            self.clone(),
            config.scheduler_interval,
            self.shutdown.subscribe(),
        ));
        workers.push(tasks::spawn_metrics_task(
            self.clone(),
            config.metrics_interval,
            self.shutdown.subscribe(),
        ));
        workers.push(tasks::spawn_persist_task(
            self.clone(),
            config.persist_interval,
            self.shutdown.subscribe(),
        ));
        info!(loops = workers.len(), "Background loops started");
    }

    /// Stops and joins the background loops, then flushes state.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.send_replace(true);

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background loop ended abnormally");
            }
        }

        self.persist_now().await?;
        info!("Cache manager shut down");
        Ok(())
    }

    // == Strategies ==
    pub async fn create_strategy(&self, spec: StrategySpec) -> Result<CacheStrategy> {
        let strategy = self
            .catalog
            .write()
            .await
            .create_strategy(spec, self.clock.now())?;
        self.mark_dirty();
        Ok(strategy)
    }

    /// Applies a partial update and brings the strategy under its new caps.
    pub async fn update_strategy(&self, id: &str, update: StrategyUpdate) -> Result<CacheStrategy> {
        let now = self.clock.now();
        let strategy = self.catalog.write().await.update_strategy(id, update, now)?;

        let outcome = self
            .store
            .write()
            .await
            .enforce_capacity(id, strategy.limits(), now, None);
        if !outcome.evicted.is_empty() {
            info!(strategy = id, evicted = outcome.evicted.len(), "Evicted after strategy update");
        }
        self.mark_dirty();
        Ok(strategy)
    }

    pub async fn get_strategy(&self, id: &str) -> Result<CacheStrategy> {
        self.catalog.read().await.strategy(id).cloned()
    }

    pub async fn list_strategies(&self) -> Vec<CacheStrategy> {
        self.catalog.read().await.list_strategies()
    }

    /// Refused for the default strategy and while entries belong to it.
    pub async fn delete_strategy(&self, id: &str) -> Result<()> {
        let in_use = self.store.read().await.strategy_usage(id).0 > 0;
        self.catalog.write().await.delete_strategy(id, in_use)?;
        self.trackers.lock().remove(id);
        self.mark_dirty();
        Ok(())
    }

    // == Rules ==
    pub async fn create_rule(&self, spec: RuleSpec) -> Result<CacheRule> {
        let rule = self.catalog.write().await.create_rule(spec, self.clock.now())?;
        self.mark_dirty();
        Ok(rule)
    }

    pub async fn list_rules(&self) -> Vec<CacheRule> {
        self.catalog.read().await.list_rules()
    }

    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<CacheRule> {
        let rule = self.catalog.write().await.set_rule_enabled(id, enabled)?;
        self.mark_dirty();
        Ok(rule)
    }

    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        self.catalog.write().await.delete_rule(id)?;
        self.mark_dirty();
        Ok(())
    }

    // == Profiles ==
    pub async fn create_profile(&self, spec: ProfileSpec) -> Result<CacheProfile> {
        let profile = self
            .catalog
            .write()
            .await
            .create_profile(spec, self.clock.now())?;
        self.mark_dirty();
        Ok(profile)
    }

    pub async fn apply_profile(&self, id: &str) -> Result<CacheProfile> {
        let profile = self
            .catalog
            .write()
            .await
            .apply_profile(id, self.clock.now())?;
        self.mark_dirty();
        Ok(profile)
    }

    pub async fn get_profile(&self, id: &str) -> Result<CacheProfile> {
        self.catalog.read().await.profile(id).cloned()
    }

    pub async fn list_profiles(&self) -> Vec<CacheProfile> {
        self.catalog.read().await.list_profiles()
    }

    pub async fn active_profile(&self) -> ActiveSet {
        self.catalog.read().await.active().clone()
    }

    // == Schedules ==
    pub async fn create_schedule(&self, spec: ScheduleSpec) -> Result<TaskSchedule> {
        let schedule = TaskSchedule::from_spec(spec, self.clock.now())?;
        let schedule = self.catalog.write().await.create_schedule(schedule)?;
        self.mark_dirty();
        Ok(schedule)
    }

    pub async fn list_schedules(&self) -> Vec<TaskSchedule> {
        self.catalog.read().await.list_schedules()
    }

    // == Alerts ==
    /// Raises an alert by hand. Returns None when an open alert with the
    /// same source and severity already exists.
    pub async fn create_alert(&self, spec: AlertSpec) -> Result<Option<CacheAlert>> {
        if spec.title.trim().is_empty() {
            return Err(CacheError::Validation("Alert title cannot be empty".to_string()));
        }
        let alert = self.alerts.write().await.raise(spec, self.clock.now());
        if alert.is_some() {
            self.mark_dirty();
        }
        Ok(alert)
    }

    pub async fn acknowledge_alert(&self, id: &str, actor: &str) -> Result<CacheAlert> {
        let alert = self
            .alerts
            .write()
            .await
            .acknowledge(id, actor, self.clock.now())?;
        self.mark_dirty();
        Ok(alert)
    }

    pub async fn resolve_alert(&self, id: &str, actor: &str) -> Result<CacheAlert> {
        let alert = self
            .alerts
            .write()
            .await
            .resolve(id, actor, self.clock.now())?;
        self.mark_dirty();
        Ok(alert)
    }

    pub async fn list_alerts(&self) -> Vec<CacheAlert> {
        self.alerts.read().await.list()
    }

    pub async fn register_threshold(&self, threshold: AlertThreshold) -> Result<()> {
        self.alerts.write().await.register_threshold(threshold)?;
        self.mark_dirty();
        Ok(())
    }

    pub async fn list_thresholds(&self) -> Vec<AlertThreshold> {
        self.alerts.read().await.thresholds().to_vec()
    }
}

#[cfg(test)]
mod tests;
