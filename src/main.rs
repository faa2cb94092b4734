use anyhow::{Context, Result};
use dispatch::api::create_api_router;
use dispatch::config::load_from_env;
use dispatch::DispatchEngine;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dispatch=info".into()),
        )
        .init();

    info!("Dispatch engine starting...");

    let config = load_from_env().context("Failed to load configuration")?;
    let bind_addr = config.api.bind_addr.clone();
    let snapshots_enabled = config.snapshot.enabled;

    let engine = Arc::new(DispatchEngine::new(config).context("Failed to initialize engine")?);

    // Restore state from the newest readable snapshot
    match engine.recover() {
        Ok(true) => info!("State recovered from snapshot"),
        Ok(false) => info!("Starting with empty state"),
        Err(e) => error!(error = %e, "Recovery failed, starting with empty state"),
    }

    let snapshot_manager = Arc::new(engine.snapshot_manager());
    let snapshot_task = {
        let manager = Arc::clone(&snapshot_manager);
        tokio::spawn(async move {
            if let Err(e) = manager.run_snapshot_loop().await {
                error!(error = %e, "Snapshot loop exited");
            }
        })
    };

    let app = create_api_router(Arc::clone(&engine)).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(bind_addr = %bind_addr, "Dispatch API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    // Graceful shutdown
    snapshot_task.abort();
    engine.shutdown().await;

    if snapshots_enabled {
        match snapshot_manager.create_and_save_snapshot() {
            Ok(path) => info!(path = %path.display(), "Final snapshot saved"),
            Err(e) => error!(error = %e, "Failed to save final snapshot"),
        }
    }

    info!("Dispatch engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl_c signal");
    }
    info!("Shutdown signal received");
}
