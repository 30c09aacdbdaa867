//! Dispatcher: pops the highest-priority pending job across all domains and
//! routes it to the least-loaded eligible worker's queue.
//!
//! The dispatcher is stateless; everything it needs lives in the
//! coordination store and the definition table, so any number of control
//! planes could run it (the blocking pop hands each job to exactly one).

use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::kernel::{CoordStore, EventBus, EventKind};
use crate::models::{JobDefinition, WorkerInfo};

use super::affinity::passes_affinity;
use super::selection::select_best_worker;

/// How long a single multi-key priority pop blocks.
const POP_TIMEOUT_SECS: f64 = 2.0;

/// Back-off after an error or an undispatchable job.
const RETRY_SLEEP: Duration = Duration::from_secs(1);

/// Workers currently eligible to receive new jobs in a domain: fresh
/// heartbeat, administratively online, a free slot, and (when the domain has
/// a token) a matching token hash.
pub async fn list_online_workers(
    coord: &CoordStore,
    domain: &str,
    ttl: Duration,
) -> Result<Vec<WorkerInfo>> {
    let now = chrono::Utc::now();
    let expected_hash = coord.domain_token_hash(domain).await?;

    let mut workers = Vec::new();
    for worker_id in coord.list_worker_ids(domain).await? {
        let Some(fields) = coord.worker_fields(domain, &worker_id).await? else {
            continue;
        };
        let mut worker = WorkerInfo::from_hash(domain, &worker_id, &fields);
        worker.last_heartbeat = coord.last_heartbeat(domain, &worker_id).await?;

        if !worker.is_alive(now, ttl.as_secs()) || worker.state != "online" || !worker.has_free_slot()
        {
            continue;
        }
        if let (Some(expected), Some(actual)) = (&expected_hash, &worker.domain_token_hash) {
            if expected != actual {
                continue;
            }
        }
        workers.push(worker);
    }
    Ok(workers)
}

pub struct Dispatcher {
    coord: CoordStore,
    db: PgPool,
    events: EventBus,
    heartbeat_ttl: Duration,
}

impl Dispatcher {
    pub fn new(coord: CoordStore, db: PgPool, events: EventBus, heartbeat_ttl: Duration) -> Self {
        Self {
            coord,
            db,
            events,
            heartbeat_ttl,
        }
    }

    /// Run until shutdown. Errors are logged and swallowed; the loop never
    /// exits on a single failure.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(ttl_secs = self.heartbeat_ttl.as_secs(), "dispatcher starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if let Err(e) = self.dispatch_once().await {
                error!(error = %e, "error in dispatch loop");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_SLEEP) => {}
                }
            }
        }

        info!("dispatcher stopped");
    }

    /// One pop-and-route step. Returns without dispatching when the pop
    /// times out, the definition is gone, or no worker qualifies.
    pub async fn dispatch_once(&self) -> Result<()> {
        let domains = self.coord.domains().await?;
        let Some((pop_domain, job_id, priority)) =
            self.coord.pop_pending_max(&domains, POP_TIMEOUT_SECS).await?
        else {
            return Ok(());
        };

        let Ok(id) = Uuid::parse_str(&job_id) else {
            error!(job_id = %job_id, "malformed job id in pending queue; dropping");
            return Ok(());
        };
        let Some(job) = JobDefinition::find_by_id(id, &self.db).await? else {
            error!(job_id = %job_id, domain = %pop_domain, "popped job with no definition; dropping");
            return Ok(());
        };

        // The definition is authoritative for the domain.
        let domain = job.domain.clone();

        let candidates: Vec<WorkerInfo> =
            list_online_workers(&self.coord, &domain, self.heartbeat_ttl)
                .await?
                .into_iter()
                .filter(|worker| passes_affinity(&job, worker))
                .collect();

        let Some(worker) = select_best_worker(&candidates) else {
            // Keep the original priority so starvation stays bounded by the
            // priority discipline.
            warn!(job_id = %job_id, domain = %domain, "no eligible worker; requeuing");
            self.coord.push_pending(&domain, &job_id, priority).await?;
            self.events.publish(
                EventKind::JobPending,
                json!({"job_id": job_id, "reason": "no_worker", "domain": domain}),
            );
            tokio::time::sleep(RETRY_SLEEP).await;
            return Ok(());
        };

        self.coord
            .push_worker_queue(&domain, &worker.worker_id, &job_id)
            .await?;
        self.events.publish(
            EventKind::JobDispatched,
            json!({"job_id": job_id, "worker_id": worker.worker_id, "domain": domain}),
        );
        info!(job_id = %job_id, worker_id = %worker.worker_id, domain = %domain, "dispatched job");

        Ok(())
    }
}
