//! nomad-logger
//!
//! Generates log shipper configuration for the allocations running on a
//! Nomad node.
//!
//! - **Poller**: lists the node's allocations every check interval and
//!   rewrites the shipper config when it changes
//! - **Metrics server**: exposes the allocation gauge for Prometheus

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nomad_logger::config::Config;
use nomad_logger::metrics::{self, Metrics};
use nomad_logger::{shipper, NomadClient, Poller, ShellRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize tracing (prefer RUST_LOG, fallback to LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        nomad_address = %config.nomad_address,
        log_shipper = ?config.log_shipper,
        target_file = %config.target_file().display(),
        check_interval_secs = config.check_interval,
        "Starting nomad-logger"
    );

    let mut client = NomadClient::new(
        &config.nomad_address,
        config.nomad_token.as_deref(),
        config.nomad_node_id.clone(),
    )?;
    if client.node_id().is_empty() {
        client
            .resolve_node_id_from_env()
            .await
            .context("No nomad node id found")?;
    }
    info!(node_id = %client.node_id(), "Using node");

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let shipper = shipper::from_config(&config, Arc::new(ShellRunner))?;
    let poller = Poller::new(
        Arc::new(client),
        shipper,
        Arc::clone(&metrics),
        config.poll_interval(),
    );

    if config.once {
        let outcome = poller.poll_once().await?;
        info!(written = outcome.is_written(), "Single poll cycle complete");
        return Ok(());
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { poller.run(shutdown_rx).await }
    });

    let app = metrics::router(metrics, &config.metrics_path);
    let listener = tokio::net::TcpListener::bind(config.metrics_addr()).await?;
    info!(addr = %config.metrics_addr(), path = %config.metrics_path, "Serving metrics");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Metrics server exited"),
                Ok(Err(e)) => error!(error = %e, "Metrics server error"),
                Err(e) => error!(error = %e, "Metrics server task panicked"),
            }
        }
    }

    // Signal shutdown to the poll loop
    let _ = shutdown_tx.send(true);
    if let Err(e) = poller_handle.await {
        error!(error = %e, "Poll loop task panicked");
    }

    info!("nomad-logger shutdown complete");
    Ok(())
}
