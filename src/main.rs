mod api;
mod config;
mod engine;
mod error;
mod geo;
mod models;
mod observability;
mod registry;
mod service;
mod state;
mod store;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let pool = store::connect(&config.db);
    store::migrate_with_retry(&pool, 15, Duration::from_secs(2)).await?;
    tracing::info!("database ready");

    let shared_state = Arc::new(state::AppState::new(&config, pool));
    let app = api::rest::router(shared_state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.map_err(|err| {
        error::AppError::Infrastructure(format!("failed to bind {bind_addr}: {err}"))
    })?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Infrastructure(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
