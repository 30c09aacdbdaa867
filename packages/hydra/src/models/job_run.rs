//! Job run model: one execution attempt-set on a worker.
//!
//! A run row is created when the worker starts executing and updated once
//! when the attempt-set ends; it is append-only after that.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "run_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub domain: String,
    #[serde(rename = "user")]
    pub run_user: String,
    pub worker_id: Option<String>,
    pub status: RunStatus,
    pub start_ts: Option<DateTime<Utc>>,
    pub scheduled_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub returncode: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Concurrency slot index occupied on the worker.
    pub slot: Option<i32>,
    pub attempt: i32,
    pub retries_remaining: i32,
    pub schedule_mode: String,
    pub executor_type: String,
    pub queue_latency_ms: Option<f64>,
    pub completion_reason: Option<String>,
}

const COLUMNS: &str = "id, job_id, domain, run_user, worker_id, status, start_ts, scheduled_ts, \
                       end_ts, returncode, stdout, stderr, slot, attempt, retries_remaining, \
                       schedule_mode, executor_type, queue_latency_ms, completion_reason";

impl JobRun {
    /// Insert a run in `running` status as the worker picks the job up.
    pub async fn insert(&self, db: &PgPool) -> Result<Self> {
        let run = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO job_runs (
                id, job_id, domain, run_user, worker_id, status, start_ts, scheduled_ts,
                end_ts, returncode, stdout, stderr, slot, attempt, retries_remaining,
                schedule_mode, executor_type, queue_latency_ms, completion_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(self.id)
        .bind(self.job_id)
        .bind(&self.domain)
        .bind(&self.run_user)
        .bind(&self.worker_id)
        .bind(self.status)
        .bind(self.start_ts)
        .bind(self.scheduled_ts)
        .bind(self.end_ts)
        .bind(self.returncode)
        .bind(&self.stdout)
        .bind(&self.stderr)
        .bind(self.slot)
        .bind(self.attempt)
        .bind(self.retries_remaining)
        .bind(&self.schedule_mode)
        .bind(&self.executor_type)
        .bind(self.queue_latency_ms)
        .bind(&self.completion_reason)
        .fetch_one(db)
        .await?;

        Ok(run)
    }

    /// Record the outcome of the attempt-set. Idempotent by run id.
    #[allow(clippy::too_many_arguments)]
    pub async fn finish(
        id: Uuid,
        status: RunStatus,
        returncode: Option<i32>,
        stdout: &str,
        stderr: &str,
        attempts_used: i32,
        completion_reason: &str,
        db: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_runs
            SET status = $1, returncode = $2, stdout = $3, stderr = $4,
                attempt = $5, completion_reason = $6, end_ts = NOW()
            WHERE id = $7
            "#,
        )
        .bind(status)
        .bind(returncode)
        .bind(stdout)
        .bind(stderr)
        .bind(attempts_used)
        .bind(completion_reason)
        .bind(id)
        .execute(db)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Option<Self>> {
        let run =
            sqlx::query_as::<_, Self>(&format!("SELECT {COLUMNS} FROM job_runs WHERE id = $1"))
                .bind(id)
                .fetch_optional(db)
                .await?;

        Ok(run)
    }

    pub async fn list_for_job(job_id: Uuid, limit: i64, db: &PgPool) -> Result<Vec<Self>> {
        let runs = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS} FROM job_runs
            WHERE job_id = $1
            ORDER BY start_ts DESC NULLS LAST
            LIMIT $2
            "#
        ))
        .bind(job_id)
        .bind(limit)
        .fetch_all(db)
        .await?;

        Ok(runs)
    }

    /// Run history, scoped to a domain unless `domain` is `None` (admin).
    pub async fn list(domain: Option<&str>, limit: i64, db: &PgPool) -> Result<Vec<Self>> {
        let runs = match domain {
            Some(d) => {
                sqlx::query_as::<_, Self>(&format!(
                    r#"
                    SELECT {COLUMNS} FROM job_runs
                    WHERE domain = $1
                    ORDER BY start_ts DESC NULLS LAST
                    LIMIT $2
                    "#
                ))
                .bind(d)
                .bind(limit)
                .fetch_all(db)
                .await?
            }
            None => {
                sqlx::query_as::<_, Self>(&format!(
                    r#"
                    SELECT {COLUMNS} FROM job_runs
                    ORDER BY start_ts DESC NULLS LAST
                    LIMIT $1
                    "#
                ))
                .bind(limit)
                .fetch_all(db)
                .await?
            }
        };

        Ok(runs)
    }

    /// Mark a lost worker's in-flight runs as failed during failover.
    pub async fn mark_worker_lost(domain: &str, worker_id: &str, db: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE job_runs
            SET status = 'failed', completion_reason = 'worker_lost', end_ts = NOW()
            WHERE domain = $1 AND worker_id = $2 AND status = 'running'
            "#,
        )
        .bind(domain)
        .bind(worker_id)
        .execute(db)
        .await?;

        Ok(result.rows_affected())
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_ts, self.end_ts) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// History listings include output tails rather than full buffers.
    pub fn stdout_tail(&self) -> String {
        tail(&self.stdout)
    }

    pub fn stderr_tail(&self) -> String {
        tail(&self.stderr)
    }
}

const TAIL_CHARS: usize = 2000;

fn tail(text: &str) -> String {
    if text.len() <= TAIL_CHARS {
        return text.to_string();
    }
    // Respect char boundaries when slicing.
    let mut start = text.len() - TAIL_CHARS;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run() -> JobRun {
        JobRun {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            domain: "prod".to_string(),
            run_user: "alice".to_string(),
            worker_id: Some("worker-1".to_string()),
            status: RunStatus::Running,
            start_ts: None,
            scheduled_ts: None,
            end_ts: None,
            returncode: None,
            stdout: String::new(),
            stderr: String::new(),
            slot: Some(0),
            attempt: 1,
            retries_remaining: 0,
            schedule_mode: "immediate".to_string(),
            executor_type: "shell".to_string(),
            queue_latency_ms: Some(12.0),
            completion_reason: None,
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::from_str::<RunStatus>("\"failed\"").unwrap(),
            RunStatus::Failed
        );
    }

    #[test]
    fn duration_requires_both_endpoints() {
        let mut run = sample_run();
        assert_eq!(run.duration_ms(), None);

        let start = Utc::now();
        run.start_ts = Some(start);
        run.end_ts = Some(start + chrono::Duration::milliseconds(1500));
        assert_eq!(run.duration_ms(), Some(1500));
    }

    #[test]
    fn tail_keeps_short_output_intact() {
        let mut run = sample_run();
        run.stdout = "ok".to_string();
        assert_eq!(run.stdout_tail(), "ok");
    }

    #[test]
    fn tail_truncates_long_output() {
        let mut run = sample_run();
        run.stdout = "x".repeat(5000);
        assert_eq!(run.stdout_tail().len(), TAIL_CHARS);
    }

    #[test]
    fn tail_respects_utf8_boundaries() {
        let mut run = sample_run();
        run.stderr = "é".repeat(3000);
        let tail = run.stderr_tail();
        assert!(tail.len() <= TAIL_CHARS);
        assert!(tail.chars().all(|c| c == 'é'));
    }

    #[test]
    fn run_serializes_user_field_name() {
        let run = sample_run();
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["user"], "alice");
        assert!(json.get("run_user").is_none());
    }
}
