//! `keyshift` entry point.
//!
//! Opens the configured stores, migrates unified secrets into the secrets
//! plugin when it is selected, and reports which store serves secrets. The
//! run is cancelled on Ctrl-C, SIGTERM, or when the startup timeout elapses.

use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use keyshift_server::bootstrap::{self, ActiveStore};
use keyshift_server::config::MigratorConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = MigratorConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(config = ?config, "keyshift starting");

    let cancel = CancellationToken::new();
    let watchdog = tokio::spawn(cancel_on_signal_or_timeout(
        cancel.clone(),
        Duration::from_secs(config.startup_timeout_secs),
    ));

    let backends = bootstrap::open_backends(&config, &cancel)
        .await
        .context("failed to open storage")?;
    let report = bootstrap::start(&config, backends, &cancel)
        .await
        .context("startup failed")?;
    watchdog.abort();

    match report.active {
        ActiveStore::Plugin { plugin_id } => {
            info!(plugin = %plugin_id, outcome = ?report.outcome, "secrets served by plugin");
        }
        ActiveStore::Unified => {
            info!(outcome = ?report.outcome, "secrets served by unified store");
        }
    }
    Ok(())
}

async fn cancel_on_signal_or_timeout(cancel: CancellationToken, timeout: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("shutdown signal received, cancelling startup"),
        () = terminate => info!("shutdown signal received, cancelling startup"),
        () = tokio::time::sleep(timeout) => {
            warn!(timeout_secs = timeout.as_secs(), "startup timed out, cancelling");
        }
    }
    cancel.cancel();
}
