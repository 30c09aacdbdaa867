//! Run endpoints: fetch run documents, stream logs with history replay, and
//! list run history.

use std::convert::Infallible;

use axum::extract::{Extension, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use uuid::Uuid;

use crate::models::JobRun;
use crate::server::app::AppState;
use crate::server::auth::AuthContext;
use crate::server::error::ApiError;

use super::jobs::normalize_run;

async fn find_scoped_run(
    id: Uuid,
    ctx: &AuthContext,
    state: &AppState,
) -> Result<JobRun, ApiError> {
    let run = JobRun::find_by_id(id, &state.db)
        .await?
        .ok_or(ApiError::NotFound("run"))?;
    if !ctx.is_admin && run.domain != ctx.domain {
        return Err(ApiError::Forbidden);
    }
    Ok(run)
}

/// GET /runs/:id — the full run document plus computed duration.
pub async fn get_run(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let run = find_scoped_run(id, &ctx, &state).await?;
    let mut doc = serde_json::to_value(&run).map_err(anyhow::Error::from)?;
    doc["duration_ms"] = serde_json::to_value(run.duration_ms()).unwrap_or(Value::Null);
    Ok(Json(doc))
}

/// GET /runs/:id/stream — SSE: replay the capped history, then live chunks.
pub async fn stream_run_logs(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Sse<ReceiverStream<Result<Event, Infallible>>>, ApiError> {
    let run = find_scoped_run(id, &ctx, &state).await?;
    let domain = run.domain.clone();
    let run_key = run.id.to_string();

    // Subscribe before reading history so no chunk falls between the two;
    // a chunk landing in both is an accepted duplicate.
    let mut pubsub = state.coord.subscribe_logs(&domain, &run_key).await?;
    let history = state.coord.log_history(&domain, &run_key).await?;

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);
    tokio::spawn(async move {
        for raw in history {
            if tx
                .send(Ok(Event::default().event("log_chunk").data(raw)))
                .await
                .is_err()
            {
                return;
            }
        }
        let mut messages = pubsub.on_message();
        while let Some(message) = messages.next().await {
            let Ok(payload) = message.get_payload::<String>() else {
                continue;
            };
            if tx
                .send(Ok(Event::default().event("log_chunk").data(payload)))
                .await
                .is_err()
            {
                break;
            }
        }
        debug!(run_id = %run_key, "log stream subscriber disconnected");
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

/// GET /history/ — normalized run history for the caller's domain (admin:
/// all domains).
pub async fn list_history(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let domain = if ctx.is_admin {
        None
    } else {
        Some(ctx.domain.as_str())
    };
    let runs = JobRun::list(domain, 200, &state.db).await?;
    Ok(Json(runs.iter().map(normalize_run).collect()))
}
