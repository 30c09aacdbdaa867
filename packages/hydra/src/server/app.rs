//! Application setup: shared state and the axum router.

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::kernel::{CoordStore, EventBus};

use super::auth::auth_middleware;
use super::routes::{admin, events, health, jobs, queue, runs, workers};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub coord: CoordStore,
    pub events: EventBus,
    pub config: Config,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/jobs/", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/jobs/validate", post(jobs::validate_payload))
        .route("/jobs/adhoc", post(jobs::submit_adhoc))
        .route("/jobs/:id", get(jobs::get_job).put(jobs::update_job))
        .route("/jobs/:id/validate", post(jobs::validate_job))
        .route("/jobs/:id/run", post(jobs::run_job))
        .route("/jobs/:id/runs", get(jobs::job_runs))
        .route("/queue/overview", get(queue::queue_overview))
        .route("/workers/", get(workers::list_workers))
        .route("/workers/:id/state", post(workers::set_worker_state))
        .route("/runs/:id", get(runs::get_run))
        .route("/runs/:id/stream", get(runs::stream_run_logs))
        .route("/history/", get(runs::list_history))
        .route("/events/stream", get(events::event_stream))
        .route("/health", get(health::health_handler))
        .route(
            "/admin/domains",
            get(admin::list_domains).post(admin::create_domain),
        )
        .route(
            "/admin/domains/:domain",
            put(admin::update_domain).delete(admin::delete_domain),
        )
        .route("/admin/domains/:domain/token", post(admin::rotate_token))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
