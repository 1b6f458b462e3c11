//! Background sweep: proposal cleanup and the timelock queue

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::VaultExecutor;

impl VaultExecutor {
    /// Spawn the sweep loop; it stops when `shutdown` is cancelled
    pub fn spawn_background(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.run_sweep(shutdown).await })
    }

    async fn run_sweep(&self, shutdown: CancellationToken) {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        info!(interval_secs = period.as_secs(), "Starting proposal sweep");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep_once().await,
                _ = shutdown.cancelled() => {
                    info!("Proposal sweep shutting down");
                    break;
                }
            }
        }
    }

    /// One cleanup + ready-queue pass
    pub async fn sweep_once(&self) {
        let removed = self.manager.cleanup();
        let results = self.process_ready_queue().await;
        let executed = results.iter().filter(|(_, r)| r.is_ok()).count();
        debug!(
            removed,
            ready = results.len(),
            executed,
            "Sweep complete"
        );
    }
}
