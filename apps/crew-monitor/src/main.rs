// [[AgentOps]]/apps/crew-monitor/src/main.rs
// Purpose: Entry point. Loads config, syncs with the backend crew, then serves the pipeline view.
// Architecture: Application Boot
// Dependencies: Axum, Tower, Tokio

mod backend;
mod checklist;
mod config;
mod events;
mod observability;
mod phase;
mod runtime;
mod server;
mod stages;
mod store;
mod stream;
mod summary;
mod view;

use anyhow::Context;
use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::runtime::CrewRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("crew_monitor=debug".parse()?)
                .add_directive("tower_http=trace".parse()?),
        )
        .init();

    tracing::info!("Initializing AgentOps crew monitor...");

    let config = MonitorConfig::from_env().context("Invalid configuration")?;
    let runtime = Arc::new(CrewRuntime::new(config.clone()));

    // === BACKEND SYNC ===
    // Follow a crew that is already running, or show the last outcome
    if config.sync_on_boot {
        if let Err(e) = runtime.sync_from_backend().await {
            tracing::warn!("Backend sync skipped: {}", e);
        }
    }

    let app = server::router(runtime);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Crew monitor listening on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
