// Main entry point for a worker node

use anyhow::{Context, Result};
use hydra_core::kernel::CoordStore;
use hydra_core::worker::WorkerRuntime;
use hydra_core::WorkerConfig;
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

    let config = WorkerConfig::from_env().context("Failed to load worker configuration")?;
    tracing::info!(
        worker_id = %config.worker_id,
        domain = %config.domain,
        "Starting Hydra worker"
    );

    let db = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let coord = CoordStore::connect(&config.redis_url)
        .await
        .context("Failed to connect to coordination store")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal");
        signal_token.cancel();
    });

    WorkerRuntime::new(coord, db, config).run(shutdown).await
}
