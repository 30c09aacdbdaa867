//! Failover monitor: reclaims work from workers that stopped heartbeating.
//!
//! A worker past its TTL gets every job in its running set requeued at the
//! default priority, its slot counter zeroed, and its in-flight run rows
//! marked failed. The worker hash itself is kept; a returning worker
//! re-registers and resumes under the same identity.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::kernel::{CoordStore, EventBus, EventKind};
use crate::models::JobRun;

const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Priority given to requeued jobs reclaimed from a dead worker.
const REQUEUE_PRIORITY: f64 = 5.0;

pub struct FailoverMonitor {
    coord: CoordStore,
    db: PgPool,
    events: EventBus,
    heartbeat_ttl: Duration,
}

impl FailoverMonitor {
    pub fn new(coord: CoordStore, db: PgPool, events: EventBus, heartbeat_ttl: Duration) -> Self {
        Self {
            coord,
            db,
            events,
            heartbeat_ttl,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(ttl_secs = self.heartbeat_ttl.as_secs(), "failover monitor starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "error in failover sweep");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            }
        }

        info!("failover monitor stopped");
    }

    pub async fn sweep_once(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp() as f64 - self.heartbeat_ttl.as_secs_f64();
        for domain in self.coord.domains().await? {
            for worker_id in self.coord.stale_workers(&domain, cutoff).await? {
                if let Err(e) = self.reclaim_worker(&domain, &worker_id).await {
                    error!(
                        worker_id = %worker_id,
                        domain = %domain,
                        error = %e,
                        "failed to reclaim worker"
                    );
                }
            }
        }
        Ok(())
    }

    async fn reclaim_worker(&self, domain: &str, worker_id: &str) -> Result<()> {
        let jobs = self.coord.running_jobs(domain, worker_id).await?;
        if !jobs.is_empty() {
            warn!(
                worker_id = %worker_id,
                domain = %domain,
                count = jobs.len(),
                "requeuing jobs from offline worker"
            );
        }

        for job_id in jobs {
            self.coord.clear_job_running(domain, &job_id).await?;
            self.coord
                .push_pending(domain, &job_id, REQUEUE_PRIORITY)
                .await?;
            self.coord.remove_running(domain, worker_id, &job_id).await?;
            self.events.publish(
                EventKind::JobRequeued,
                json!({"job_id": job_id, "worker_id": worker_id, "domain": domain}),
            );
        }

        self.coord.reset_worker_offline(domain, worker_id).await?;
        // Drop the stale score so the worker is not reprocessed every sweep;
        // a returning worker re-adds itself on its next beat.
        self.coord.drop_heartbeat(domain, worker_id).await?;

        let orphaned = JobRun::mark_worker_lost(domain, worker_id, &self.db).await?;
        if orphaned > 0 {
            info!(
                worker_id = %worker_id,
                domain = %domain,
                count = orphaned,
                "marked orphaned runs as failed"
            );
        }

        Ok(())
    }
}
