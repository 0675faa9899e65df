//! Nodeflow server - runs the event loop and the HTTP API.
//!
//! Configuration is via environment variables (see `nodeflow::config`):
//! - NODEFLOW_STATE_FILE: Snapshot file for program state (default: in memory only)
//! - NODEFLOW_EXECUTOR_SHARDS: Executor shard count (default: 4)
//! - NODEFLOW_WEBAPP_ENABLED: Set to "true" or "1" to enable the HTTP API
//! - NODEFLOW_WEBAPP_ADDR: HTTP API address (default: 0.0.0.0:24219)
//! - RUST_LOG: Log filter (default: nodeflow=info,nodeflow_server=info)

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

use nodeflow::{MemoryBackend, ProgramClient, RuntimeConfig, WebappServer, runloop_supervisor};
use nodeflow_observability_setup::ObservabilityOptions;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    nodeflow_observability_setup::init(ObservabilityOptions {
        default_directive: "nodeflow=info,nodeflow_server=info".to_string(),
        ..ObservabilityOptions::default()
    });

    let config = RuntimeConfig::from_env()?;
    info!(
        executor_shards = config.executor_shards,
        event_batch_size = config.event_batch_size,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        state_file = ?config.state_file,
        "starting nodeflow server"
    );

    let backend = match &config.state_file {
        Some(path) => MemoryBackend::with_snapshot(path)
            .with_context(|| format!("failed to open state file {}", path.display()))?,
        None => MemoryBackend::new(),
    };

    let webapp = WebappServer::start(config.webapp.clone(), ProgramClient::new(backend.clone()))
        .await?;

    let shutdown = CancellationToken::new();
    let runloop = tokio::spawn(runloop_supervisor(
        backend,
        config.runloop(),
        shutdown.clone(),
    ));

    wait_for_shutdown().await?;
    info!("shutdown signal received - stopping run loop");
    shutdown.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, runloop).await;

    if let Some(webapp) = webapp {
        webapp.shutdown().await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal as unix_signal};

        let mut terminate = unix_signal(SignalKind::terminate())?;
        select! {
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received");
            }
            _ = terminate.recv() => {
                info!("SIGTERM received");
            }
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Ctrl+C received");
        Ok(())
    }
}
