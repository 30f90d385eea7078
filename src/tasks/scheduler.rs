//! Schedule Runner Task

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::{interval_of, tick};
use crate::manager::CacheManager;

/// Spawns the loop that turns due schedules into executed tasks.
pub fn spawn_scheduler_task(
    manager: Arc<CacheManager>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = interval_of(interval_secs);

    tokio::spawn(async move {
        info!("Starting scheduler task with interval of {} seconds", interval.as_secs());

        while tick(interval, &mut shutdown).await {
            let ran = manager.run_due_schedules().await;
            for task in &ran {
                info!(
                    schedule = task.schedule_id.as_deref().unwrap_or_default(),
                    task = %task.id,
                    status = %task.status,
                    "Scheduled task ran"
                );
            }
        }

        info!("Scheduler task stopped");
    })
}
