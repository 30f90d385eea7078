//! Persistence Flush Task

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{interval_of, tick};
use crate::manager::CacheManager;

/// Spawns the loop that saves state whenever it has changed.
///
/// A failed save is logged and retried on the next tick.
pub fn spawn_persist_task(
    manager: Arc<CacheManager>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = interval_of(interval_secs);

    tokio::spawn(async move {
        info!("Starting persistence task with interval of {} seconds", interval.as_secs());

        while tick(interval, &mut shutdown).await {
            if let Err(e) = manager.flush_if_dirty().await {
                warn!(error = %e, "Persistence flush failed");
            }
        }

        info!("Persistence task stopped");
    })
}
