use std::sync::Arc;

use anyhow::Context;

use relayq_infra::{QueueConfig, Scheduler};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relayq_observability::init();

    let config = QueueConfig::from_env().context("invalid queue configuration")?;
    let bind_addr =
        std::env::var("RELAYQ_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

    let services = Arc::new(relayq_api::app::services::build_services(&config).await?);
    let scheduler = Scheduler::spawn(
        services.queue.clone(),
        config.collect_interval,
        config.reap_interval,
    );

    let app = relayq_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
