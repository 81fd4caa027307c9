//! Lifecycle tasks - background loops next to the worker pool
//!
//! Handles:
//! - Pending-delivery sweep
//! - Release of abandoned delivery claims
//! - Periodic worker stats log

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tw_config::DeliveryConfig;
use tw_delivery::{DeliveryRunner, DeliveryTracker};

use crate::pool::WorkerPool;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub sweep_interval: Duration,
    pub sweep_batch_size: usize,
    /// Claims older than this are returned to the sweep
    pub claim_timeout: Duration,
    pub stale_claim_interval: Duration,
    pub stats_interval: Duration,
}

impl LifecycleConfig {
    pub fn from_delivery(config: &DeliveryConfig) -> Self {
        Self {
            sweep_interval: config.sweep_interval(),
            sweep_batch_size: config.sweep_batch_size,
            claim_timeout: config.claim_timeout(),
            stale_claim_interval: config.claim_timeout() / 2,
            stats_interval: Duration::from_secs(60),
        }
    }
}

pub struct LifecycleTasks {
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl LifecycleTasks {
    pub fn start(
        runner: Arc<DeliveryRunner>,
        tracker: Arc<DeliveryTracker>,
        pool: Arc<WorkerPool>,
        config: LifecycleConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        // Pending-delivery sweep
        {
            let cancel = cancel.clone();
            let interval = config.sweep_interval;
            let limit = config.sweep_batch_size;
            tasks.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Delivery sweep shutting down");
                            break;
                        }
                        _ = ticker.tick() => {
                            match runner.sweep(limit).await {
                                Ok(summary) => debug!(examined = summary.examined, "Delivery sweep tick"),
                                Err(e) => error!(error = %e, "Delivery sweep failed"),
                            }
                        }
                    }
                }
            });
        }

        // Stale claim release
        {
            let cancel = cancel.clone();
            let interval = config.stale_claim_interval.max(Duration::from_secs(1));
            let claim_timeout = config.claim_timeout;
            tasks.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Stale claim release shutting down");
                            break;
                        }
                        _ = ticker.tick() => {
                            match tracker.release_stale(claim_timeout).await {
                                Ok(0) => {}
                                Ok(released) => warn!(released, "Released abandoned delivery claims"),
                                Err(e) => error!(error = %e, "Stale claim release failed"),
                            }
                        }
                    }
                }
            });
        }

        // Stats log
        {
            let cancel = cancel.clone();
            let interval = config.stats_interval;
            tasks.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let stats = pool.stats();
                            info!(
                                running = stats.running,
                                received = stats.received,
                                acked = stats.acked,
                                requeued = stats.requeued,
                                discarded = stats.discarded,
                                active = stats.active,
                                "Worker stats"
                            );
                        }
                    }
                }
            });
        }

        tasks.close();
        Self { cancel, tasks }
    }

    /// Cancel the loops and wait for a running sweep to finish.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let stopped = tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok();
        if !stopped {
            warn!("Lifecycle tasks did not stop in time");
        }
        stopped
    }
}
