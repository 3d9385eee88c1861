//! ServiceHub background worker.
//!
//! Connects to `PostgreSQL`, applies the ledger schema and runs the release
//! scheduler until Ctrl+C or SIGTERM. Configuration comes from the
//! environment (a `.env` file is honoured), see `EngineConfig::from_env`.

use anyhow::Context;
use servicehub_core::config::EngineConfig;
use servicehub_core::environment::SystemClock;
use servicehub_postgres::PgLedgerStore;
use servicehub_runtime::ReleaseScheduler;
use servicehub_runtime::metrics::MetricsServer;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("reading .env");
        }
    }

    let config = EngineConfig::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        persistence_mode = ?config.persistence_mode,
        release_interval_secs = config.release_interval_secs,
        release_batch_size = config.release_batch_size,
        "Starting ServiceHub worker"
    );

    match config.metrics_addr.parse() {
        Ok(addr) => MetricsServer::new(addr)
            .start()
            .context("starting metrics exporter")?,
        Err(e) => warn!(
            addr = %config.metrics_addr,
            error = %e,
            "Invalid metrics address, exporter disabled"
        ),
    }

    let store = PgLedgerStore::from_config(&config)
        .await
        .context("connecting to PostgreSQL")?;
    store.migrate().await.context("applying ledger schema")?;
    info!("Ledger store ready");

    let scheduler = ReleaseScheduler::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.release_interval(),
        config.release_batch_size,
    );
    let handle = scheduler.start();

    shutdown_signal().await;
    info!("Shutdown signal received, stopping release scheduler");
    handle.shutdown().await;

    info!("Worker stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
