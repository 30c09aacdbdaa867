//! Schedule ticker: wakes due recurring jobs and enqueues them.
//!
//! Multiple tickers may run concurrently; the compare-and-set on
//! `next_run_at` guarantees each due instant is enqueued exactly once. A
//! ticker advances one step per iteration, so a long outage skips to the
//! next occurrence instead of flooding the queue with missed ticks.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::kernel::{CoordStore, EventBus, EventKind};
use crate::models::JobDefinition;
use crate::schedule;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Due jobs handled per domain per tick.
const DUE_BATCH: i64 = 100;

pub struct ScheduleTicker {
    coord: CoordStore,
    db: PgPool,
    events: EventBus,
}

impl ScheduleTicker {
    pub fn new(coord: CoordStore, db: PgPool, events: EventBus) -> Self {
        Self { coord, db, events }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("schedule ticker starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if let Err(e) = self.tick_once().await {
                error!(error = %e, "error in schedule tick");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
            }
        }

        info!("schedule ticker stopped");
    }

    /// Scan every domain for due recurring jobs, advance each schedule with
    /// a compare-and-set, and enqueue the winners.
    pub async fn tick_once(&self) -> Result<()> {
        let now = Utc::now();
        for domain in self.coord.domains().await? {
            let due = JobDefinition::find_due(&domain, now, DUE_BATCH, &self.db).await?;
            for job in due {
                let Some(expected) = job.schedule.0.next_run_at else {
                    continue;
                };
                let advanced = match schedule::advance(&job.schedule.0, now) {
                    Ok(advanced) => advanced,
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "cannot advance schedule; skipping");
                        continue;
                    }
                };

                // Losing the CAS means another ticker already advanced and
                // enqueued this instant.
                if !JobDefinition::advance_schedule_cas(job.id, expected, &advanced, &self.db)
                    .await?
                {
                    continue;
                }

                self.coord
                    .push_pending(&domain, &job.id.to_string(), job.priority as f64)
                    .await?;
                self.events.publish(
                    EventKind::JobScheduled,
                    json!({
                        "job_id": job.id,
                        "mode": job.schedule.0.mode.as_str(),
                        "next_run_at": advanced.next_run_at,
                        "domain": domain,
                    }),
                );
                info!(
                    job_id = %job.id,
                    domain = %domain,
                    next_run_at = ?advanced.next_run_at,
                    "enqueued due recurring job"
                );
            }
        }
        Ok(())
    }
}
