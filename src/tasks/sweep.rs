//! Expiry and Eviction Sweep Task

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{interval_of, tick};
use crate::manager::CacheManager;

/// Spawns the loop that expires entries and enforces strategy caps.
///
/// Returns a JoinHandle that completes once shutdown has been signalled.
pub fn spawn_sweep_task(
    manager: Arc<CacheManager>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = interval_of(interval_secs);

    tokio::spawn(async move {
        info!("Starting sweep task with interval of {} seconds", interval.as_secs());

        while tick(interval, &mut shutdown).await {
            let report = manager.sweep_once().await;
            if report.expired == 0 && report.evicted == 0 {
                debug!("Sweep: nothing expired or evicted");
            }
        }

        info!("Sweep task stopped");
    })
}
