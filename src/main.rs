//! Trestle Relayer - dual-direction lock/mint bridge relayer
//!
//! Watches the origin chain for `Deposit` events and mints on the remote
//! chain, and watches the remote chain for `Burn` events and unlocks on the
//! origin chain. Each direction is confirmation-gated, idempotent per event
//! id, and resumes from a crash-safe watermark.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod error;
mod events;
mod metrics;
mod relay;
mod state;

use api::{AppState, TransferIndex};
use chain::{ChainClient, EvmChainClient};
use config::Settings;
use ethers::signers::LocalWallet;
use events::Direction;
use metrics::MetricsServer;
use relay::{ChainWatcher, EventVerifier, SubmissionExecutor, WatcherTiming};
use state::{FileProgressStore, ProgressStore};

/// How long shutdown waits for the watchers to finish their in-flight
/// iteration before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Trestle Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        origin = %settings.origin.name,
        remote = %settings.remote.name,
        "Loaded configuration"
    );

    // Load the relayer signing key
    let key = std::env::var(&settings.wallet.private_key_env).with_context(|| {
        format!(
            "Relayer private key not found in ${}",
            settings.wallet.private_key_env
        )
    })?;
    let wallet: LocalWallet = key
        .trim()
        .parse()
        .context("Invalid relayer private key")?;

    // Load crash-safe relay progress
    let store = Arc::new(FileProgressStore::load(
        &settings.state.path,
        settings.relayer.processed_retention,
    )?);

    // Chain clients
    let origin = Arc::new(EvmChainClient::new(&settings.origin, wallet.clone())?);
    let remote = Arc::new(EvmChainClient::new(&settings.remote, wallet)?);
    info!(relayer = ?origin.wallet_address(), "Relayer wallet loaded");

    // Both chains must answer at startup; anything less is unrecoverable.
    let origin_height = origin
        .current_height()
        .await
        .with_context(|| format!("Cannot reach chain {}", settings.origin.name))?;
    let remote_height = remote
        .current_height()
        .await
        .with_context(|| format!("Cannot reach chain {}", settings.remote.name))?;
    info!(origin_height, remote_height, "Chain connections established");

    let transfers = Arc::new(TransferIndex::new());
    let shutdown = Arc::new(RwLock::new(false));

    let timing = WatcherTiming {
        poll_interval: settings.relayer.poll_interval(),
        scan_delay: settings.relayer.scan_delay(),
        rate_limit_backoff: settings.relayer.rate_limit_backoff(),
    };

    let origin_client: Arc<dyn ChainClient> = origin.clone();
    let remote_client: Arc<dyn ChainClient> = remote.clone();
    let progress: Arc<dyn ProgressStore> = store.clone();

    // Deposit direction: origin chain -> mint on remote
    let deposit_watcher = Arc::new(ChainWatcher::new(
        Direction::Deposit,
        origin_client.clone(),
        EventVerifier::new(
            origin_client.clone(),
            settings.origin.confirmation_blocks,
            settings.relayer.poll_interval(),
        ),
        SubmissionExecutor::new(remote_client.clone(), progress.clone(), transfers.clone()),
        progress.clone(),
        settings.origin.start_block,
        timing.clone(),
        shutdown.clone(),
    ));

    // Burn direction: remote chain -> unlock on origin
    let burn_watcher = Arc::new(ChainWatcher::new(
        Direction::Burn,
        remote_client.clone(),
        EventVerifier::new(
            remote_client.clone(),
            settings.remote.confirmation_blocks,
            settings.relayer.poll_interval(),
        ),
        SubmissionExecutor::new(origin_client.clone(), progress.clone(), transfers.clone()),
        progress.clone(),
        settings.remote.start_block,
        timing,
        shutdown.clone(),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let app_state = AppState {
            store: progress.clone(),
            transfers: transfers.clone(),
            chains: vec![
                (settings.origin.name.clone(), origin_client.clone()),
                (settings.remote.name.clone(), remote_client.clone()),
            ],
            process_started: chrono::Utc::now(),
        };
        let host = settings.api.host.clone();
        let port = settings.api.port;
        async move {
            if let Err(e) = api::run_server(&host, port, app_state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start the two direction watchers
    let deposit_handle = tokio::spawn({
        let watcher = deposit_watcher.clone();
        async move { watcher.run().await }
    });
    let burn_handle = tokio::spawn({
        let watcher = burn_watcher.clone();
        async move { watcher.run().await }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let chains = vec![
            (settings.origin.name.clone(), origin_client.clone()),
            (settings.remote.name.clone(), remote_client.clone()),
        ];
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                for (name, client) in &chains {
                    let healthy = client.current_height().await.is_ok();
                    metrics::record_chain_health(name, healthy);
                    if !healthy {
                        warn!("Chain {} health check failed", name);
                    }
                }
            }
        }
    });

    info!("Trestle Relayer is running");
    info!(
        "API server: http://{}:{}",
        settings.api.host, settings.api.port
    );
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Cooperative stop: the watchers observe the flag at the top of their
    // next iteration; in-flight RPC calls are allowed to complete.
    *shutdown.write().await = true;

    let watchers = futures::future::join_all(vec![deposit_handle, burn_handle]);
    if tokio::time::timeout(SHUTDOWN_GRACE, watchers).await.is_err() {
        warn!("Watchers did not stop within grace period");
    }

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Trestle Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,trestle_relayer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
