mod api;
mod config;
mod db;
mod errors;
mod jobs;
mod models;
mod state;

use crate::config::Config;
use crate::errors::ApiError;
use crate::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.data_dir).map_err(|_| ApiError::Internal)?;

    let db = db::connect(&config.db_url()).await?;
    db::init_schema(&db).await?;

    let interrupted = db::fail_interrupted_jobs(&db).await?;
    if interrupted > 0 {
        tracing::warn!(interrupted, "marked unfinished proof jobs as failed");
    }

    let addr = config.addr.clone();
    let state = AppState::new(db, config);

    // Load (or generate) circuit artifacts in the background so the first
    // request does not pay for it.
    let warm = state.clone();
    tokio::spawn(async move {
        if let Err(e) = warm.ensure_zk().await {
            tracing::error!(error = %e, "failed to prepare circuit artifacts");
        }
    });

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|_| ApiError::Internal)?;

    tracing::info!(%addr, "backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|_| ApiError::Internal)?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("ctrl-c handler unavailable; shutting down");
    }
    tracing::info!("shutdown requested");
}
