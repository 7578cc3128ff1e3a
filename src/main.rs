// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relational_deposit_sweeper::blockchain::{EvmBroadcaster, ExplorerClient};
use relational_deposit_sweeper::config::SweeperConfig;
use relational_deposit_sweeper::error::StartupError;
use relational_deposit_sweeper::keys::SealedKeyCipher;
use relational_deposit_sweeper::storage::SweepDatabase;
use relational_deposit_sweeper::sweeper::{
    ConfirmationEngine, ForwardingOrchestrator, SweepScheduler, Sweeper,
};

const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    init_tracing();

    let config = SweeperConfig::from_env()?;
    info!(
        treasury = %config.treasury_address,
        explorer = %config.explorer_api_url,
        data_dir = %config.data_dir.display(),
        interval_secs = config.sweep_interval.as_secs(),
        "Starting deposit sweeper"
    );

    std::fs::create_dir_all(&config.data_dir)?;
    let db = Arc::new(SweepDatabase::open(&config.database_path())?);

    let ledger = Arc::new(ExplorerClient::new(
        config.explorer_api_url.clone(),
        config.explorer_api_key.clone(),
        config.explorer_chain_id,
        config.ledger_timeout,
    )?);
    let broadcaster = Arc::new(EvmBroadcaster::new(config.chain())?);
    let cipher = Arc::new(SealedKeyCipher::from_base64(&config.key_encryption_key)?);

    let forwarding = Arc::new(ForwardingOrchestrator::new(
        Arc::clone(&db),
        cipher,
        broadcaster,
        config.treasury_address.clone(),
        config.broadcast_timeout,
    ));
    let confirmations = ConfirmationEngine::new(
        Arc::clone(&db),
        ledger,
        Arc::clone(&forwarding),
        config.ledger_concurrency,
        config.ledger_timeout,
    );
    let sweeper = Arc::new(Sweeper::new(confirmations, forwarding));

    let shutdown = CancellationToken::new();
    let scheduler = tokio::spawn(
        SweepScheduler::new(sweeper, config.sweep_interval).run(shutdown.clone()),
    );

    shutdown_signal().await;
    info!("Shutdown signal received");
    shutdown.cancel();

    if let Err(e) = scheduler.await {
        warn!(error = %e, "Sweep scheduler task ended abnormally");
    }
    info!("Deposit sweeper stopped");
    Ok(())
}

/// `RUST_LOG` filter (default `info`), `LOG_FORMAT=json` for JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
