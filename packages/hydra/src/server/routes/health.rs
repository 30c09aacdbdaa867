//! Health endpoint: lightweight queue and worker stats for the caller's
//! domain. Exempt from auth enforcement, so the domain falls back to `prod`
//! when no token is presented.

use axum::extract::{Extension, State};
use axum::Json;
use serde::Serialize;

use crate::server::app::AppState;
use crate::server::auth::AuthContext;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    workers: usize,
    pending_jobs: i64,
}

pub async fn health_handler(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
) -> Json<HealthResponse> {
    let domain = ctx
        .map(|Extension(inner)| inner.domain)
        .unwrap_or_else(|| "prod".to_string());

    // Health stays best-effort: a store hiccup reads as zero, not a 500.
    let workers = state
        .coord
        .list_worker_ids(&domain)
        .await
        .map(|ids| ids.len())
        .unwrap_or(0);
    let pending_jobs = state.coord.pending_count(&domain).await.unwrap_or(0);

    Json(HealthResponse {
        status: "ok".to_string(),
        workers,
        pending_jobs,
    })
}
