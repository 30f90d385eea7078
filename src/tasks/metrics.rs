//! Metrics and Alert Evaluation Task

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{interval_of, tick};
use crate::manager::CacheManager;

/// Spawns the loop that samples metrics, refreshes strategy health and
/// evaluates alert conditions.
pub fn spawn_metrics_task(
    manager: Arc<CacheManager>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = interval_of(interval_secs);

    tokio::spawn(async move {
        info!("Starting metrics task with interval of {} seconds", interval.as_secs());

        while tick(interval, &mut shutdown).await {
            let metrics = manager.refresh_metrics().await;
            let raised = manager.evaluate_with(&metrics).await;
            debug!(
                hit_rate = metrics.stats.hit_rate,
                memory_pressure = metrics.memory_pressure,
                alerts = raised.len(),
                "Metrics refreshed"
            );
        }

        info!("Metrics task stopped");
    })
}
