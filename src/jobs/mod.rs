use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::metrics;

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        info!("Starting background job scheduler");

        let handles = vec![
            tokio::spawn(Self::expired_mute_cleanup_job(Arc::clone(&self))),
            tokio::spawn(Self::counter_audit_job(Arc::clone(&self))),
        ];

        info!("Background jobs started");
        handles
    }

    /// Cleanup expired mutes (runs every 5 minutes)
    async fn expired_mute_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let start = Instant::now();

            match tasks::cleanup_expired_mutes(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!(count, "cleaned up expired mutes");
                    }
                    metrics::record_background_job(
                        "mute_cleanup",
                        "success",
                        start.elapsed().as_secs_f64(),
                    );
                }
                Err(e) => {
                    error!("Failed to cleanup expired mutes: {}", e);
                    metrics::record_background_job(
                        "mute_cleanup",
                        "failure",
                        start.elapsed().as_secs_f64(),
                    );
                }
            }
        }
    }

    /// Compare counters with the ledger and repair drift (runs hourly)
    async fn counter_audit_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let start = Instant::now();

            match tasks::audit_counters(&scheduler.context).await {
                Ok(_) => metrics::record_background_job(
                    "counter_audit",
                    "success",
                    start.elapsed().as_secs_f64(),
                ),
                Err(e) => {
                    error!("Counter audit failed: {}", e);
                    metrics::record_background_job(
                        "counter_audit",
                        "failure",
                        start.elapsed().as_secs_f64(),
                    );
                }
            }
        }
    }
}
