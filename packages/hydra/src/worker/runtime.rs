//! Worker runtime: the per-node executor process.
//!
//! One runtime registers a worker identity, heartbeats in the background,
//! pops its per-worker FIFO, and runs each job inside a pool bounded by
//! `max_concurrency`. Slot accounting is atomic on the coordination store
//! and reconciled against the live active set on every heartbeat, so drift
//! never outlives one heartbeat interval.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::common::hash_token;
use crate::config::WorkerConfig;
use crate::kernel::{CoordStore, LogChunk};
use crate::models::{JobDefinition, JobRun, RunStatus, WorkerInfo};

use super::completion::evaluate_completion;
use super::executor::{self, ExecContext, OutputLine};
use super::git_source;

const INTAKE_TIMEOUT_SECS: f64 = 2.0;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Effective working directory: an explicit absolute workdir wins, a
/// relative one resolves against the source checkout base when present.
fn resolve_workdir(configured: Option<&str>, base: Option<&Path>) -> Option<PathBuf> {
    match (configured, base) {
        (None, None) => None,
        (None, Some(base)) => Some(base.to_path_buf()),
        (Some(workdir), None) => Some(PathBuf::from(workdir)),
        (Some(workdir), Some(base)) => {
            let path = Path::new(workdir);
            if path.is_absolute() {
                Some(path.to_path_buf())
            } else {
                Some(base.join(path))
            }
        }
    }
}

pub struct WorkerRuntime {
    coord: CoordStore,
    db: PgPool,
    config: WorkerConfig,
    active: RwLock<HashSet<Uuid>>,
    limiter: Arc<Semaphore>,
}

impl WorkerRuntime {
    pub fn new(coord: CoordStore, db: PgPool, config: WorkerConfig) -> Arc<Self> {
        let limiter = Arc::new(Semaphore::new(config.max_concurrency));
        Arc::new(Self {
            coord,
            db,
            config,
            active: RwLock::new(HashSet::new()),
            limiter,
        })
    }

    /// Write the worker hash and join the domain set.
    pub async fn register(&self) -> Result<()> {
        let info = WorkerInfo {
            worker_id: self.config.worker_id.clone(),
            domain: self.config.domain.clone(),
            os: std::env::consts::OS.to_string(),
            tags: self.config.tags.clone(),
            allowed_users: self.config.allowed_users.clone(),
            queues: self.config.queues.clone(),
            max_concurrency: self.config.max_concurrency as i64,
            current_running: 0,
            status: "online".to_string(),
            state: self.config.state.clone(),
            hostname: self.config.hostname.clone(),
            ip: self.config.ip.clone(),
            subnet: self.config.subnet.clone(),
            deployment_type: self.config.deployment_type.clone(),
            run_user: self.config.run_user.clone(),
            cpu_count: std::thread::available_parallelism()
                .ok()
                .map(|n| n.get() as i64),
            pid: Some(std::process::id() as i64),
            domain_token_hash: Some(hash_token(&self.config.domain_token)),
            last_heartbeat: None,
            running_jobs: Vec::new(),
        };
        self.coord
            .register_worker(&self.config.domain, &self.config.worker_id, &info.to_hash())
            .await
    }

    /// Run until shutdown: register, heartbeat, and feed the bounded pool
    /// from the per-worker queue. In-flight jobs drain before returning.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        self.register().await?;
        info!(
            worker_id = %self.config.worker_id,
            domain = %self.config.domain,
            max_concurrency = self.config.max_concurrency,
            state = %self.config.state,
            "worker starting"
        );

        let heartbeat = tokio::spawn(Self::heartbeat_loop(self.clone(), shutdown.child_token()));

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let popped = self
                .coord
                .pop_worker_queue(
                    &self.config.domain,
                    &self.config.worker_id,
                    INTAKE_TIMEOUT_SECS,
                )
                .await;

            let job_id = match popped {
                Ok(Some(raw)) => match Uuid::parse_str(&raw) {
                    Ok(id) => id,
                    Err(_) => {
                        error!(job_id = %raw, "malformed job id in worker queue; dropping");
                        continue;
                    }
                },
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "failed to pop worker queue");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            // Blocks while all slots are busy, which also stops intake.
            let Ok(permit) = self.limiter.clone().acquire_owned().await else {
                break;
            };
            let runtime = self.clone();
            tokio::spawn(async move {
                runtime.run_job(job_id).await;
                drop(permit);
            });
        }

        // Wait for running jobs to finish (with timeout).
        let started = tokio::time::Instant::now();
        while !self.active.read().await.is_empty() && started.elapsed() < DRAIN_TIMEOUT {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        heartbeat.abort();
        let _ = heartbeat.await;

        info!(worker_id = %self.config.worker_id, "worker stopped");
        Ok(())
    }

    async fn heartbeat_loop(runtime: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = runtime.beat_once().await {
                warn!(error = %e, "heartbeat failed");
            }
        }
    }

    /// One beat: refresh the heartbeat score, reconcile `current_running`
    /// with the live active set, and touch the running marker of each
    /// active job.
    pub async fn beat_once(&self) -> Result<()> {
        let now = now_secs();
        let active: Vec<Uuid> = self.active.read().await.iter().copied().collect();
        self.coord
            .heartbeat(
                &self.config.domain,
                &self.config.worker_id,
                now,
                active.len() as i64,
            )
            .await?;
        for job_id in active {
            self.coord
                .refresh_job_running(
                    &self.config.domain,
                    &job_id.to_string(),
                    &self.config.worker_id,
                    now,
                )
                .await?;
        }
        Ok(())
    }

    /// Full lifecycle of one dispatched job: claim a slot, record the run,
    /// execute with retries, persist the outcome, release everything.
    async fn run_job(&self, job_id: Uuid) {
        let domain = self.config.domain.clone();
        let worker_id = self.config.worker_id.clone();

        let job = match JobDefinition::find_by_id(job_id, &self.db).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(job_id = %job_id, "dispatched job has no definition; skipping");
                return;
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to load job definition");
                return;
            }
        };

        self.active.write().await.insert(job_id);
        let job_key = job_id.to_string();

        let slot = match self.coord.incr_running(&domain, &worker_id, 1).await {
            Ok(value) => (value - 1).max(0) as i32,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to reserve slot");
                self.active.write().await.remove(&job_id);
                return;
            }
        };
        if let Err(e) = self.coord.add_running(&domain, &worker_id, &job_key).await {
            warn!(job_id = %job_id, error = %e, "failed to add running marker");
        }
        if let Err(e) = self
            .coord
            .set_job_running(&domain, &job_key, &worker_id, &job.job_user, now_secs())
            .await
        {
            warn!(job_id = %job_id, error = %e, "failed to write running hash");
        }

        if let Err(e) = self.execute_job(&job, slot).await {
            error!(job_id = %job_id, error = %e, "job execution failed");
        }

        if let Err(e) = self.coord.clear_job_running(&domain, &job_key).await {
            warn!(job_id = %job_id, error = %e, "failed to clear running hash");
        }
        if let Err(e) = self
            .coord
            .remove_running(&domain, &worker_id, &job_key)
            .await
        {
            warn!(job_id = %job_id, error = %e, "failed to remove running marker");
        }
        if let Err(e) = self.coord.incr_running(&domain, &worker_id, -1).await {
            warn!(job_id = %job_id, error = %e, "failed to release slot");
        }
        self.active.write().await.remove(&job_id);
    }

    async fn execute_job(&self, job: &JobDefinition, slot: i32) -> Result<()> {
        let now = Utc::now();
        let queue_latency_ms = (now - job.created_at).num_milliseconds().max(0) as f64;

        let run = JobRun {
            id: Uuid::new_v4(),
            job_id: job.id,
            domain: job.domain.clone(),
            run_user: job.job_user.clone(),
            worker_id: Some(self.config.worker_id.clone()),
            status: RunStatus::Running,
            start_ts: Some(now),
            scheduled_ts: Some(now),
            end_ts: None,
            returncode: None,
            stdout: String::new(),
            stderr: String::new(),
            slot: Some(slot),
            attempt: 1,
            retries_remaining: job.retries,
            schedule_mode: job.schedule.0.mode.as_str().to_string(),
            executor_type: job.executor.0.type_name().to_string(),
            queue_latency_ms: Some(queue_latency_ms),
            completion_reason: None,
        }
        .insert(&self.db)
        .await?;

        let checkout = match &job.source {
            Some(source) => match git_source::fetch_git_source(&source.0).await {
                Ok(checkout) => Some(checkout),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "source fetch failed");
                    JobRun::finish(
                        run.id,
                        RunStatus::Failed,
                        None,
                        "",
                        &format!("failed to fetch source: {e}"),
                        1,
                        "source fetch failed",
                        &self.db,
                    )
                    .await?;
                    return Ok(());
                }
            },
            None => None,
        };

        let ctx = ExecContext {
            timeout: (job.timeout_seconds > 0)
                .then(|| Duration::from_secs(job.timeout_seconds as u64)),
            workdir: resolve_workdir(
                job.executor.0.workdir(),
                checkout.as_ref().map(|c| c.base.as_path()),
            ),
        };

        let attempts = job.retries.max(0) + 1;
        let mut attempts_used = 0;
        let mut success = false;
        let mut reason = String::new();
        let mut returncode: Option<i32> = None;
        let mut stdout = String::new();
        let mut stderr = String::new();

        for _ in 0..attempts {
            let (tx, rx) = mpsc::channel::<OutputLine>(256);
            let forwarder = self.spawn_log_forwarder(run.id, job.id, rx);
            let outcome = executor::execute(&job.executor.0, &ctx, Some(tx)).await;
            let _ = forwarder.await;
            attempts_used += 1;

            match outcome {
                Ok(out) => {
                    let (ok, why) =
                        evaluate_completion(&job.completion.0, out.returncode, &out.stdout, &out.stderr);
                    returncode = Some(out.returncode);
                    stdout = out.stdout;
                    stderr = out.stderr;
                    reason = why;
                    if ok {
                        success = true;
                        break;
                    }
                }
                Err(e) => {
                    returncode = None;
                    stdout.clear();
                    stderr = e.to_string();
                    reason = format!("executor error: {e}");
                }
            }
        }

        let status = if success {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        JobRun::finish(
            run.id,
            status,
            returncode,
            &stdout,
            &stderr,
            attempts_used,
            &reason,
            &self.db,
        )
        .await?;

        if success {
            info!(
                job_id = %job.id,
                run_id = %run.id,
                attempts = attempts_used,
                "job succeeded"
            );
        } else {
            warn!(
                job_id = %job.id,
                run_id = %run.id,
                attempts = attempts_used,
                reason = %reason,
                "job failed"
            );
        }

        Ok(())
    }

    /// Wrap each output line in the log envelope, append it to the capped
    /// history, and publish it for live subscribers.
    fn spawn_log_forwarder(
        &self,
        run_id: Uuid,
        job_id: Uuid,
        mut rx: mpsc::Receiver<OutputLine>,
    ) -> JoinHandle<()> {
        let coord = self.coord.clone();
        let domain = self.config.domain.clone();
        let worker_id = self.config.worker_id.clone();
        tokio::spawn(async move {
            let run_key = run_id.to_string();
            while let Some(line) = rx.recv().await {
                let chunk =
                    LogChunk::new(run_id, job_id, &worker_id, &domain, line.stream, line.text);
                let Ok(payload) = serde_json::to_string(&chunk) else {
                    continue;
                };
                if let Err(e) = coord.append_log_chunk(&domain, &run_key, &payload).await {
                    warn!(run_id = %run_id, error = %e, "failed to publish log chunk");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workdir_resolution() {
        assert_eq!(resolve_workdir(None, None), None);
        assert_eq!(
            resolve_workdir(Some("/abs"), None),
            Some(PathBuf::from("/abs"))
        );
        assert_eq!(
            resolve_workdir(None, Some(Path::new("/checkout"))),
            Some(PathBuf::from("/checkout"))
        );
        assert_eq!(
            resolve_workdir(Some("sub"), Some(Path::new("/checkout"))),
            Some(PathBuf::from("/checkout/sub"))
        );
        assert_eq!(
            resolve_workdir(Some("/abs"), Some(Path::new("/checkout"))),
            Some(PathBuf::from("/abs"))
        );
    }
}
