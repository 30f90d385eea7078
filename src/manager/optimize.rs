//! Optimization task execution and schedule runs.
//!
//! Executors check the cancel flag between entries and take the store lock
//! per entry, so a long task never starves lookups. Hook work (compression,
//! fetches) happens with no lock held.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use super::CacheManager;
use crate::cache::Priority;
use crate::error::{CacheError, Result};
use crate::optimization::{OptimizationTask, TaskSpec, TaskType};

/// Bytes the executor set out to work on, and whether it stopped early.
struct RunOutcome {
    targeted_bytes: u64,
    cancelled: bool,
}

impl CacheManager {
    // == Create / Query ==
    pub async fn create_optimization_task(&self, spec: TaskSpec) -> Result<OptimizationTask> {
        {
            let catalog = self.catalog.read().await;
            for id in [&spec.target.strategy_id, &spec.target.target_strategy_id]
                .into_iter()
                .flatten()
            {
                catalog.strategy(id)?;
            }
        }
        let task = OptimizationTask::from_spec(spec, self.clock.now())?;
        info!(id = %task.id, task_type = %task.task_type, "Optimization task created");
        self.tasks.write().await.insert(task.clone());
        self.mark_dirty();
        Ok(task)
    }

    pub async fn get_optimization_task(&self, id: &str) -> Result<OptimizationTask> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn list_optimization_tasks(&self) -> Vec<OptimizationTask> {
        self.tasks.read().await.list()
    }

    /// A pending task is cancelled at once; a running one stops before its
    /// next entry.
    pub async fn cancel_optimization_task(&self, id: &str) -> Result<OptimizationTask> {
        let task = self.tasks.write().await.cancel(id, self.clock.now())?;
        info!(id, status = %task.status, "Cancellation requested");
        self.mark_dirty();
        Ok(task)
    }

    // == Execute ==
    /// Runs a pending task to completion, cancellation or failure.
    pub async fn execute_optimization_task(&self, id: &str) -> Result<OptimizationTask> {
        let pending = self.get_optimization_task(id).await?;
        let keys = self.task_keys(&pending).await;
        let total = match pending.task_type {
            TaskType::Defragmentation => 1,
            _ => keys.len() as u64,
        };

        let (mut task, cancel) = self
            .tasks
            .write()
            .await
            .begin(id, total, self.clock.now())?;
        info!(id, task_type = %task.task_type, total, "Optimization task started");

        let outcome = match task.task_type {
            TaskType::Cleanup => self.run_cleanup(&mut task, keys, &cancel).await,
            TaskType::Compression => self.run_compression(&mut task, keys, &cancel).await,
            TaskType::Preload => self.run_preload(&mut task, keys, &cancel).await,
            TaskType::Migration => self.run_migration(&mut task, keys, &cancel).await,
            TaskType::Defragmentation => self.run_defragmentation(&mut task).await,
        };

        task.finish(outcome.cancelled, outcome.targeted_bytes, self.clock.now());
        if task.results.errors.is_empty() {
            info!(
                id,
                status = %task.status,
                processed = task.results.entries_processed,
                freed = task.results.space_freed,
                "Optimization task finished"
            );
        } else {
            warn!(id, status = %task.status, errors = ?task.results.errors, "Optimization task finished with errors");
        }

        self.tasks.write().await.complete(task.clone());
        self.mark_dirty();
        Ok(task)
    }

    /// Keys a task will visit, fixed when it starts.
    async fn task_keys(&self, task: &OptimizationTask) -> Vec<String> {
        if task.task_type == TaskType::Preload {
            return task.target.keys.clone();
        }
        let store = self.store.read().await;
        let mut keys: Vec<String> = store
            .iter()
            .filter(|e| task.target.matches(e))
            .filter(|e| match task.task_type {
                TaskType::Cleanup => e.status.is_reclaimable(),
                TaskType::Compression => !e.metadata.compression,
                TaskType::Migration => task
                    .target
                    .target_strategy_id
                    .as_ref()
                    .map_or(false, |to| to != &e.strategy_id),
                _ => true,
            })
            .map(|e| e.key.clone())
            .collect();
        keys.sort();
        keys
    }

    // == Cleanup ==
    async fn run_cleanup(
        &self,
        task: &mut OptimizationTask,
        keys: Vec<String>,
        cancel: &AtomicBool,
    ) -> RunOutcome {
        let mut targeted_bytes = 0;
        for key in keys {
            if cancel.load(Ordering::SeqCst) {
                return RunOutcome { targeted_bytes, cancelled: true };
            }
            let mut store = self.store.write().await;
            let reclaimable = store
                .peek(&key)
                .map_or(false, |e| e.status.is_reclaimable());
            if reclaimable {
                if let Some(entry) = store.remove(&key) {
                    targeted_bytes += entry.size;
                    task.results.entries_processed += 1;
                    task.results.space_freed += entry.size;
                }
            }
            drop(store);
            task.progress.advance();
        }
        RunOutcome { targeted_bytes, cancelled: false }
    }

    // == Compression ==
    async fn run_compression(
        &self,
        task: &mut OptimizationTask,
        keys: Vec<String>,
        cancel: &AtomicBool,
    ) -> RunOutcome {
        let mut targeted_bytes = 0;
        for key in keys {
            if cancel.load(Ordering::SeqCst) {
                return RunOutcome { targeted_bytes, cancelled: true };
            }

            let snapshot = {
                let store = self.store.read().await;
                store
                    .peek(&key)
                    .filter(|e| !e.metadata.compression)
                    .map(|e| (serde_json::to_vec(&e.payload), e.metadata.checksum.clone(), e.size))
            };
            let Some((bytes, checksum, size)) = snapshot else {
                task.progress.advance();
                continue;
            };
            targeted_bytes += size;

            let compressed = bytes
                .map_err(CacheError::from)
                .and_then(|bytes| self.compressor.compress(&bytes));
            match compressed {
                Ok(out) if out.len() as u64 > size => {
                    task.results.errors.push(format!(
                        "{}: compressor '{}' produced {} bytes from {}",
                        key,
                        self.compressor.name(),
                        out.len(),
                        size
                    ));
                }
                Ok(out) => {
                    let saved = self
                        .store
                        .write()
                        .await
                        .commit_compression(&key, &checksum, out.len() as u64);
                    if let Some(saved) = saved {
                        task.results.entries_processed += 1;
                        task.results.space_freed += saved;
                    }
                }
                Err(e) => task.results.errors.push(format!("{}: {}", key, e)),
            }
            task.progress.advance();
        }
        RunOutcome { targeted_bytes, cancelled: false }
    }

    // == Preload ==
    async fn run_preload(
        &self,
        task: &mut OptimizationTask,
        keys: Vec<String>,
        cancel: &AtomicBool,
    ) -> RunOutcome {
        let Some(fetcher) = self.fetcher.clone() else {
            task.results
                .errors
                .push("no fetcher configured for preload".to_string());
            return RunOutcome { targeted_bytes: 0, cancelled: false };
        };

        for key in keys {
            if cancel.load(Ordering::SeqCst) {
                return RunOutcome { targeted_bytes: 0, cancelled: true };
            }
            let written = match fetcher.fetch(&key).await {
                Ok(fetched) => {
                    let mut options = fetched.options;
                    options.priority = Some(Priority::High);
                    self.put(&key, fetched.payload, options).await
                }
                Err(e) => Err(e),
            };
            match written {
                Ok(_) => task.results.entries_processed += 1,
                Err(e) => task.results.errors.push(format!("{}: {}", key, e)),
            }
            task.progress.advance();
        }
        RunOutcome { targeted_bytes: 0, cancelled: false }
    }

    // == Migration ==
    async fn run_migration(
        &self,
        task: &mut OptimizationTask,
        keys: Vec<String>,
        cancel: &AtomicBool,
    ) -> RunOutcome {
        let Some(to) = task.target.target_strategy_id.clone() else {
            task.results
                .errors
                .push("migration needs a target strategy".to_string());
            return RunOutcome { targeted_bytes: 0, cancelled: false };
        };
        let limits = match self.limits_of(&to).await {
            Ok(limits) => limits,
            Err(e) => {
                task.results.errors.push(e.to_string());
                return RunOutcome { targeted_bytes: 0, cancelled: false };
            }
        };

        let mut cancelled = false;
        for key in keys {
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            if self.store.write().await.reassign_strategy(&key, &to) {
                task.results.entries_processed += 1;
            }
            task.progress.advance();
        }

        // Entries already moved stay moved, so the target's caps apply either way
        let outcome = self
            .store
            .write()
            .await
            .enforce_capacity(&to, limits, self.clock.now(), None);
        task.results.space_freed += outcome.bytes_freed;
        if outcome.still_over {
            task.results.errors.push(
                CacheError::CapacityExceeded(format!("strategy '{}' is over its caps after migration", to))
                    .to_string(),
            );
        }
        RunOutcome { targeted_bytes: 0, cancelled }
    }

    // == Defragmentation ==
    async fn run_defragmentation(&self, task: &mut OptimizationTask) -> RunOutcome {
        let (entries, drift) = {
            let mut store = self.store.write().await;
            let drift = store.compact();
            (store.len() as u64, drift)
        };
        if drift > 0 {
            warn!(drift, "Size counter drift corrected");
        }
        task.results.entries_processed = entries;
        task.results.space_freed = drift;
        task.progress.advance();
        RunOutcome { targeted_bytes: 0, cancelled: false }
    }

    // == Schedules ==
    /// Creates and runs a task for every due schedule in the active set.
    pub async fn run_due_schedules(&self) -> Vec<OptimizationTask> {
        let due = self
            .catalog
            .write()
            .await
            .take_due_schedules(self.clock.now());

        let mut ran = Vec::new();
        for schedule in due {
            let result: Result<OptimizationTask> = async {
                let mut task = OptimizationTask::from_spec(schedule.task.clone(), self.clock.now())?;
                task.schedule_id = Some(schedule.id.clone());
                let id = task.id.clone();
                self.tasks.write().await.insert(task);
                self.execute_optimization_task(&id).await
            }
            .await;

            match result {
                Ok(task) => ran.push(task),
                Err(e) => warn!(schedule = %schedule.id, error = %e, "Scheduled task could not run"),
            }
        }
        if !ran.is_empty() {
            self.mark_dirty();
        }
        ran
    }
}
