use std::sync::Arc;

use anyhow::Context;

use dentaflow_api::app::{self, AppServices};
use dentaflow_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may be set directly.
    let _ = dotenvy::dotenv();
    dentaflow_observability::init();

    let config = ApiConfig::from_env().context("invalid configuration")?;
    if config.booking_clinic_id.is_none() {
        tracing::warn!("BOOKING_CLINIC_ID not set; online bookings will be refused");
    }

    let services = Arc::new(AppServices::new(&config).context("failed to start services")?);
    let app = app::router(&config, services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    services.shutdown();
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
