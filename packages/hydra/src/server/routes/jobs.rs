//! Job definition endpoints: submit, read, update, validate, manual runs,
//! and run history.

use axum::extract::{Extension, Path, State};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::kernel::EventKind;
use crate::models::{
    JobCreate, JobDefinition, JobRun, JobValidationResult, ScheduleConfig, ScheduleMode,
};
use crate::schedule;
use crate::server::app::AppState;
use crate::server::auth::AuthContext;
use crate::server::error::ApiError;

/// Scope check: non-admin callers only see their own domain's jobs.
fn scoped(job: JobDefinition, ctx: &AuthContext) -> Result<JobDefinition, ApiError> {
    if !ctx.is_admin && job.domain != ctx.domain {
        return Err(ApiError::NotFound("job"));
    }
    Ok(job)
}

async fn find_scoped(
    id: Uuid,
    ctx: &AuthContext,
    state: &AppState,
) -> Result<JobDefinition, ApiError> {
    let job = JobDefinition::find_by_id(id, &state.db)
        .await?
        .ok_or(ApiError::NotFound("job"))?;
    scoped(job, ctx)
}

/// Rebuild a validation payload from a stored definition.
fn as_create(job: &JobDefinition) -> JobCreate {
    JobCreate {
        name: job.name.clone(),
        job_user: job.job_user.clone(),
        source: job.source.as_ref().map(|s| s.0.clone()),
        affinity: job.affinity.0.clone(),
        executor: job.executor.0.clone(),
        retries: job.retries,
        timeout_seconds: job.timeout_seconds,
        priority: job.priority,
        schedule: job.schedule.0.clone(),
        completion: job.completion.0.clone(),
    }
}

async fn insert_and_enqueue(
    payload: JobCreate,
    ctx: &AuthContext,
    state: &AppState,
) -> Result<JobDefinition, ApiError> {
    let now = Utc::now();
    let validation = payload.validate(now);
    if !validation.valid {
        return Err(ApiError::Validation(validation.errors));
    }

    let initialized = schedule::initialize(&payload.schedule, now)
        .map_err(|e| ApiError::Validation(vec![e.to_string()]))?;
    let job = payload
        .into_definition(ctx.domain.clone(), initialized)
        .insert(&state.db)
        .await?;

    // Make sure the dispatcher enumerates this domain.
    state.coord.add_domain(&job.domain).await?;

    state.events.publish(
        EventKind::JobSubmitted,
        json!({"job_id": job.id, "name": job.name, "domain": job.domain}),
    );

    if job.schedule.0.mode == ScheduleMode::Immediate {
        state
            .coord
            .push_pending(&job.domain, &job.id.to_string(), job.priority as f64)
            .await?;
        state.events.publish(
            EventKind::JobEnqueued,
            json!({"job_id": job.id, "priority": job.priority, "domain": job.domain}),
        );
    }

    Ok(job)
}

/// POST /jobs/ — validate, insert, enqueue if immediate.
pub async fn submit_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<JobCreate>,
) -> Result<Json<JobDefinition>, ApiError> {
    let job = insert_and_enqueue(payload, &ctx, &state).await?;
    Ok(Json(job))
}

/// POST /jobs/adhoc — one-shot definition, always enqueued.
pub async fn submit_adhoc(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(mut payload): Json<JobCreate>,
) -> Result<Json<JobDefinition>, ApiError> {
    // One-shot: immediate dispatch, never picked up by the ticker again.
    let adhoc_schedule = ScheduleConfig {
        mode: ScheduleMode::Immediate,
        enabled: false,
        ..Default::default()
    };
    payload.schedule = adhoc_schedule.clone();

    let validation = payload.validate(Utc::now());
    if !validation.valid {
        return Err(ApiError::Validation(validation.errors));
    }

    let job = payload
        .into_definition(ctx.domain.clone(), adhoc_schedule)
        .insert(&state.db)
        .await?;

    state.coord.add_domain(&job.domain).await?;
    state
        .coord
        .push_pending(&job.domain, &job.id.to_string(), job.priority as f64)
        .await?;
    state.events.publish(
        EventKind::JobSubmitted,
        json!({"job_id": job.id, "name": job.name, "domain": job.domain, "adhoc": true}),
    );
    state.events.publish(
        EventKind::JobEnqueued,
        json!({"job_id": job.id, "priority": job.priority, "domain": job.domain}),
    );

    Ok(Json(job))
}

/// GET /jobs/ — definitions in the caller's domain (admin: all).
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<JobDefinition>>, ApiError> {
    let domain = if ctx.is_admin {
        None
    } else {
        Some(ctx.domain.as_str())
    };
    let jobs = JobDefinition::list(domain, &state.db).await?;
    Ok(Json(jobs))
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobDefinition>, ApiError> {
    let job = find_scoped(id, &ctx, &state).await?;
    Ok(Json(job))
}

/// PUT /jobs/:id — partial update with re-validation and schedule
/// re-initialization.
pub async fn update_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(update): Json<crate::models::JobUpdate>,
) -> Result<Json<JobDefinition>, ApiError> {
    let mut job = find_scoped(id, &ctx, &state).await?;
    job.apply_update(update);

    let now = Utc::now();
    let validation = as_create(&job).validate(now);
    if !validation.valid {
        return Err(ApiError::Validation(validation.errors));
    }
    let initialized = schedule::initialize(&job.schedule.0, now)
        .map_err(|e| ApiError::Validation(vec![e.to_string()]))?;
    job.schedule = sqlx::types::Json(initialized);

    let job = job.update(&state.db).await?;
    state.events.publish(
        EventKind::JobUpdated,
        json!({"job_id": job.id, "domain": job.domain}),
    );
    Ok(Json(job))
}

/// POST /jobs/validate — dry-run validation of a payload.
pub async fn validate_payload(
    Json(payload): Json<JobCreate>,
) -> Json<JobValidationResult> {
    Json(payload.validate(Utc::now()))
}

/// POST /jobs/:id/validate — re-validate a stored definition.
pub async fn validate_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobValidationResult>, ApiError> {
    let job = find_scoped(id, &ctx, &state).await?;
    Ok(Json(as_create(&job).validate(Utc::now())))
}

/// POST /jobs/:id/run — enqueue a manual run at the job's priority.
pub async fn run_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let job = find_scoped(id, &ctx, &state).await?;
    state
        .coord
        .push_pending(&job.domain, &job.id.to_string(), job.priority as f64)
        .await?;
    state.events.publish(
        EventKind::JobManualRun,
        json!({"job_id": job.id, "priority": job.priority, "domain": job.domain}),
    );
    Ok(Json(json!({"ok": true, "job_id": job.id})))
}

/// History entries carry tails and duration instead of full output buffers.
pub fn normalize_run(run: &JobRun) -> Value {
    json!({
        "id": run.id,
        "job_id": run.job_id,
        "domain": run.domain,
        "user": run.run_user,
        "worker_id": run.worker_id,
        "status": run.status,
        "start_ts": run.start_ts,
        "scheduled_ts": run.scheduled_ts,
        "end_ts": run.end_ts,
        "returncode": run.returncode,
        "stdout_tail": run.stdout_tail(),
        "stderr_tail": run.stderr_tail(),
        "slot": run.slot,
        "attempt": run.attempt,
        "retries_remaining": run.retries_remaining,
        "schedule_mode": run.schedule_mode,
        "executor_type": run.executor_type,
        "queue_latency_ms": run.queue_latency_ms,
        "completion_reason": run.completion_reason,
        "duration_ms": run.duration_ms(),
    })
}

/// GET /jobs/:id/runs
pub async fn job_runs(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let job = find_scoped(id, &ctx, &state).await?;
    let runs = JobRun::list_for_job(job.id, 200, &state.db).await?;
    Ok(Json(runs.iter().map(normalize_run).collect()))
}
