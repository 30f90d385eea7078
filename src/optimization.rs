//! Optimization Scheduler types
//!
//! Maintenance jobs (cleanup, compression, preload, migration,
//! defragmentation) tracked as tasks with progress and results, plus the
//! recurring schedules the scheduler loop turns into tasks.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{CacheEntry, EntryType, MAX_DURATION_SECS};
use crate::error::{CacheError, Result};

// == Task Type ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Cleanup,
    Compression,
    Preload,
    Migration,
    Defragmentation,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::Cleanup => "cleanup",
            TaskType::Compression => "compression",
            TaskType::Preload => "preload",
            TaskType::Migration => "migration",
            TaskType::Defragmentation => "defragmentation",
        };
        f.write_str(name)
    }
}

// == Task Status ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

// == Progress & Results ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: u64,
    pub completed: u64,
    pub percentage: f64,
}

impl TaskProgress {
    pub fn start(total: u64) -> Self {
        Self {
            total,
            completed: 0,
            percentage: if total == 0 { 100.0 } else { 0.0 },
        }
    }

    pub fn advance(&mut self) {
        self.completed += 1;
        self.percentage = if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64 * 100.0).min(100.0)
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResults {
    pub entries_processed: u64,
    /// Bytes released by removal or compression
    pub space_freed: u64,
    /// Percent of the targeted bytes that were freed
    pub performance_gain: f64,
    pub errors: Vec<String>,
}

// == Target ==
/// Which entries a task applies to. Unset filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTarget {
    /// Explicit keys; required for preload
    pub keys: Vec<String>,
    pub strategy_id: Option<String>,
    pub entry_type: Option<EntryType>,
    pub tags: Vec<String>,
    /// Destination strategy for migration
    pub target_strategy_id: Option<String>,
}

impl TaskTarget {
    pub fn matches(&self, entry: &CacheEntry) -> bool {
        (self.keys.is_empty() || self.keys.iter().any(|k| k == &entry.key))
            && self
                .strategy_id
                .as_ref()
                .map_or(true, |id| id == &entry.strategy_id)
            && self.entry_type.map_or(true, |t| t == entry.entry_type)
            && (self.tags.is_empty() || entry.has_any_tag(&self.tags))
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub task_type: TaskType,
    #[serde(default)]
    pub target: TaskTarget,
}

impl TaskSpec {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            name: None,
            task_type,
            target: TaskTarget::default(),
        }
    }

    pub fn with_target(mut self, target: TaskTarget) -> Self {
        self.target = target;
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.task_type {
            TaskType::Preload if self.target.keys.is_empty() => Err(CacheError::Validation(
                "Preload tasks need at least one key".to_string(),
            )),
            TaskType::Migration if self.target.target_strategy_id.is_none() => {
                Err(CacheError::Validation(
                    "Migration tasks need a target_strategy_id".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

// == Optimization Task ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationTask {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub target: TaskTarget,
    pub progress: TaskProgress,
    pub results: TaskResults,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the scheduler created this task from a schedule
    pub schedule_id: Option<String>,
}

impl OptimizationTask {
    pub fn from_spec(spec: TaskSpec, now: DateTime<Utc>) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: spec
                .name
                .unwrap_or_else(|| format!("{} task", spec.task_type)),
            task_type: spec.task_type,
            status: TaskStatus::Pending,
            target: spec.target,
            progress: TaskProgress::default(),
            results: TaskResults::default(),
            created_at: now,
            started_at: None,
            completed_at: None,
            schedule_id: None,
        })
    }

    /// Closes out the task: failed if any error was recorded.
    pub fn finish(&mut self, cancelled: bool, targeted_bytes: u64, now: DateTime<Utc>) {
        self.status = if cancelled {
            TaskStatus::Cancelled
        } else if self.results.errors.is_empty() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.results.performance_gain = if targeted_bytes == 0 {
            0.0
        } else {
            self.results.space_freed as f64 / targeted_bytes as f64 * 100.0
        };
        self.completed_at = Some(now);
    }
}

// == Task Registry ==
/// Task records plus the cancellation flags of tasks that are running.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, OptimizationTask>,
    cancel_flags: HashMap<String, Arc<AtomicBool>>,
}

impl TaskRegistry {
    pub fn from_tasks(tasks: Vec<OptimizationTask>) -> Self {
        let tasks = tasks
            .into_iter()
            .map(|mut task| {
                // A task cannot survive a restart mid-run
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Failed;
                    task.results
                        .errors
                        .push("interrupted by engine restart".to_string());
                }
                (task.id.clone(), task)
            })
            .collect();
        Self {
            tasks,
            cancel_flags: HashMap::new(),
        }
    }

    pub fn insert(&mut self, task: OptimizationTask) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Result<&OptimizationTask> {
        self.tasks
            .get(id)
            .ok_or_else(|| CacheError::NotFound(format!("optimization task '{}'", id)))
    }

    /// Moves a pending task to running and hands back its cancel flag.
    pub fn begin(&mut self, id: &str, total: u64, now: DateTime<Utc>) -> Result<(OptimizationTask, Arc<AtomicBool>)> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| CacheError::NotFound(format!("optimization task '{}'", id)))?;

        if task.status != TaskStatus::Pending {
            return Err(CacheError::Validation(format!(
                "Task '{}' is {} and cannot be executed",
                id, task.status
            )));
        }

        task.status = TaskStatus::Running;
        task.started_at = Some(now);
        task.progress = TaskProgress::start(total);

        let flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags.insert(id.to_string(), flag.clone());
        Ok((task.clone(), flag))
    }

    /// Stores the final state of a task that was running.
    pub fn complete(&mut self, task: OptimizationTask) {
        self.cancel_flags.remove(&task.id);
        self.tasks.insert(task.id.clone(), task);
    }

    /// Cancels a pending task at once, or asks a running one to stop.
    /// Terminal tasks are returned unchanged.
    pub fn cancel(&mut self, id: &str, now: DateTime<Utc>) -> Result<OptimizationTask> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| CacheError::NotFound(format!("optimization task '{}'", id)))?;

        match task.status {
            TaskStatus::Pending => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
            }
            TaskStatus::Running => {
                if let Some(flag) = self.cancel_flags.get(id) {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            _ => {}
        }
        Ok(task.clone())
    }

    pub fn list(&self) -> Vec<OptimizationTask> {
        let mut tasks: Vec<OptimizationTask> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }
}

// == Task Schedule ==
/// A recurring task template run by the scheduler loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSchedule {
    pub id: String,
    pub name: String,
    pub task: TaskSpec,
    pub interval_secs: u64,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub name: String,
    pub task: TaskSpec,
    pub interval_secs: i64,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl TaskSchedule {
    pub fn from_spec(spec: ScheduleSpec, now: DateTime<Utc>) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(CacheError::Validation("Schedule name cannot be empty".to_string()));
        }
        if spec.interval_secs <= 0 || spec.interval_secs > MAX_DURATION_SECS {
            return Err(CacheError::Validation(format!(
                "Schedule interval must be between 1 and {} seconds (got {})",
                MAX_DURATION_SECS, spec.interval_secs
            )));
        }
        spec.task.validate()?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            task: spec.task,
            interval_secs: spec.interval_secs as u64,
            enabled: spec.enabled.unwrap_or(true),
            last_run_at: None,
            next_run_at: next_run(now, spec.interval_secs as u64),
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && now >= self.next_run_at
    }

    pub fn mark_run(&mut self, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.next_run_at = next_run(now, self.interval_secs);
    }
}

/// `now + interval`, saturating at the latest representable time.
fn next_run(now: DateTime<Utc>, interval_secs: u64) -> DateTime<Utc> {
    i64::try_from(interval_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|interval| now.checked_add_signed(interval))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
