use std::sync::Arc;

use anyhow::Context;

use orderflow_api::app::{build_app, services::build_services};
use orderflow_infra::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    orderflow_observability::init();

    let config = Config::load().context("loading configuration")?;
    let services = Arc::new(build_services(&config).await?);

    let dispatcher = if config.run_dispatcher {
        Some(services.dispatcher.clone().spawn(config.dispatch_interval()))
    } else {
        tracing::info!("background dispatcher disabled; use POST /internal/process");
        None
    };

    let app = build_app(services);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(handle) = dispatcher {
        handle.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
