//! Worker registry endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::WorkerInfo;
use crate::server::app::AppState;
use crate::server::auth::AuthContext;
use crate::server::error::ApiError;

async fn load_worker(
    state: &AppState,
    domain: &str,
    worker_id: &str,
) -> Result<Option<WorkerInfo>, ApiError> {
    let Some(fields) = state.coord.worker_fields(domain, worker_id).await? else {
        return Ok(None);
    };
    let mut worker = WorkerInfo::from_hash(domain, worker_id, &fields);
    worker.last_heartbeat = state.coord.last_heartbeat(domain, worker_id).await?;
    worker.running_jobs = state.coord.running_jobs(domain, worker_id).await?;
    Ok(Some(worker))
}

/// GET /workers/ — workers in the caller's domain (admin: all domains).
pub async fn list_workers(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<WorkerInfo>>, ApiError> {
    let domains = if ctx.is_admin {
        state.coord.domains().await?
    } else {
        vec![ctx.domain.clone()]
    };

    let mut workers = Vec::new();
    for domain in domains {
        for worker_id in state.coord.list_worker_ids(&domain).await? {
            if let Some(worker) = load_worker(&state, &domain, &worker_id).await? {
                workers.push(worker);
            }
        }
    }
    Ok(Json(workers))
}

#[derive(Deserialize)]
pub struct SetStatePayload {
    pub state: String,
}

#[derive(Deserialize)]
pub struct StateQuery {
    pub domain: Option<String>,
}

/// POST /workers/:id/state — set online | draining | disabled.
///
/// Draining and disabled stop new dispatches; running jobs continue. Admin
/// callers may target another domain via `?domain=`.
pub async fn set_worker_state(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(worker_id): Path<String>,
    Query(query): Query<StateQuery>,
    Json(payload): Json<SetStatePayload>,
) -> Result<Json<Value>, ApiError> {
    let new_state = payload.state.to_lowercase();
    if !matches!(new_state.as_str(), "online" | "draining" | "disabled") {
        return Err(ApiError::BadRequest(format!(
            "invalid state '{}'",
            payload.state
        )));
    }

    let mut domain = ctx.domain.clone();
    if !state.coord.worker_exists(&domain, &worker_id).await? {
        let fallback = ctx
            .is_admin
            .then_some(query.domain)
            .flatten()
            .filter(|d| *d != domain);
        match fallback {
            Some(alt) if state.coord.worker_exists(&alt, &worker_id).await? => domain = alt,
            _ => return Err(ApiError::NotFound("worker")),
        }
    }

    state
        .coord
        .set_worker_state(&domain, &worker_id, &new_state)
        .await?;
    Ok(Json(json!({"ok": true, "state": new_state})))
}
