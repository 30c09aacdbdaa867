//! Queue overview: top pending entries with scores plus upcoming schedules.

use std::collections::HashMap;

use axum::extract::{Extension, State};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::JobDefinition;
use crate::server::app::AppState;
use crate::server::auth::AuthContext;
use crate::server::error::ApiError;

const PENDING_LIMIT: isize = 100;
const UPCOMING_LIMIT: i64 = 50;

/// GET /queue/overview
pub async fn queue_overview(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Value>, ApiError> {
    let domain = ctx.domain.clone();

    let entries = state.coord.pending_top(&domain, PENDING_LIMIT).await?;
    let ids: Vec<Uuid> = entries
        .iter()
        .filter_map(|(job_id, _)| Uuid::parse_str(job_id).ok())
        .collect();
    let jobs_by_id: HashMap<Uuid, JobDefinition> = JobDefinition::find_many(&ids, &state.db)
        .await?
        .into_iter()
        .map(|job| (job.id, job))
        .collect();

    let pending: Vec<Value> = entries
        .iter()
        .map(|(job_id, score)| {
            let job = Uuid::parse_str(job_id).ok().and_then(|id| jobs_by_id.get(&id));
            json!({
                "job_id": job_id,
                "priority": score,
                "name": job.map(|j| j.name.clone()).unwrap_or_else(|| job_id.clone()),
                "user": job.map(|j| j.job_user.clone()).unwrap_or_default(),
            })
        })
        .collect();

    let scope = if ctx.is_admin {
        None
    } else {
        Some(domain.as_str())
    };
    let upcoming: Vec<Value> = JobDefinition::find_upcoming(scope, Utc::now(), UPCOMING_LIMIT, &state.db)
        .await?
        .into_iter()
        .map(|job| {
            json!({
                "job_id": job.id,
                "name": job.name,
                "priority": job.priority,
                "next_run_at": job.schedule.0.next_run_at,
            })
        })
        .collect();

    Ok(Json(json!({"pending": pending, "upcoming": upcoming})))
}
