// Main entry point for the control plane: HTTP API, dispatcher, schedule
// ticker, and failover monitor in one process.

use anyhow::{Context, Result};
use hydra_core::kernel::{CoordStore, EventBus};
use hydra_core::scheduler::{Dispatcher, FailoverMonitor, ScheduleTicker};
use hydra_core::server::{build_app, AppState};
use hydra_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hydra_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Hydra scheduler");

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Connecting to database...");
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("Failed to run migrations")?;

    let coord = CoordStore::connect(&config.redis_url)
        .await
        .context("Failed to connect to coordination store")?;
    let events = EventBus::new();

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal");
        signal_token.cancel();
    });

    // Control-plane services
    tokio::spawn(
        Dispatcher::new(
            coord.clone(),
            db.clone(),
            events.clone(),
            config.heartbeat_ttl,
        )
        .run(shutdown.clone()),
    );
    tokio::spawn(ScheduleTicker::new(coord.clone(), db.clone(), events.clone()).run(shutdown.clone()));
    tokio::spawn(
        FailoverMonitor::new(
            coord.clone(),
            db.clone(),
            events.clone(),
            config.heartbeat_ttl,
        )
        .run(shutdown.clone()),
    );

    let state = AppState {
        db,
        coord,
        events,
        config: config.clone(),
    };
    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting API on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("Server error")?;

    Ok(())
}
