use std::time::Duration;

use anyhow::Context;
use schedule_server::{app, init_tracing, AppState, Seed, ServerConfig, TracingConfig};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("Invalid SCHEDULE_* environment")?;
    init_tracing(TracingConfig::default().with_format(config.log_format))?;

    let seed = match &config.seed_file {
        Some(path) => Seed::from_file(path)?,
        None => Seed::default(),
    };
    let state = AppState::in_memory(config.scheduling.clone(), seed).await;

    let holds = state.holds.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = holds.purge_expired().await;
            if purged > 0 {
                debug!(purged, "purged expired holds");
            }
        }
    });

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "schedule-server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("schedule-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
