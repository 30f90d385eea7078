//! Background Tasks Module
//!
//! Periodic loops that run for the lifetime of a started `CacheManager`.
//!
//! # Tasks
//! - Sweep: expires entries past their max age and enforces strategy caps
//! - Scheduler: runs optimization tasks from due schedules
//! - Metrics: records a metrics sample and evaluates alerts
//! - Persist: flushes changed state to the persistence backend
//!
//! Every loop stops when the shutdown channel flips to `true`.

mod metrics;
mod persist;
mod scheduler;
mod sweep;

use std::time::Duration;

use tokio::sync::watch;

pub use metrics::spawn_metrics_task;
pub use persist::spawn_persist_task;
pub use scheduler::spawn_scheduler_task;
pub use sweep::spawn_sweep_task;

/// Sleeps for one interval. Returns false once shutdown has been signalled.
async fn tick(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let stopped = tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = shutdown.changed() => true,
    };
    !stopped && !*shutdown.borrow()
}

fn interval_of(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
