use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::coordinator::SettlementCoordinator;

/// Handle to stop and join the sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Request graceful shutdown and wait for the task to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(error = %err, "abandonment sweeper task ended abnormally");
            }
        }
    }
}

/// Background loop calling [`SettlementCoordinator::sweep_abandoned`] every
/// `interval`.
#[derive(Debug)]
pub struct AbandonmentSweeper;

impl AbandonmentSweeper {
    pub fn spawn(coordinator: Arc<SettlementCoordinator>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "abandonment sweeper started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(err) = coordinator.sweep_abandoned(Utc::now()).await {
                            warn!(reason = err.reason_code(), error = %err, "abandonment sweep failed");
                        }
                    }
                }
            }
            info!("abandonment sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}
