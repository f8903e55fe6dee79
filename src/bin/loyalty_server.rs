//! loyalty-server: loyalty points backend
//!
//! Serves the user REST API and runs the accrual worker in the background.
//!
//! ## Configuration
//! - `config.yaml` / `--config` / `LOYALTY_CONFIG`: YAML configuration
//! - `LOYALTY__<SECTION>__<KEY>`: per-key overrides
//! - `-a` / `RUN_ADDRESS`: listen address
//! - `-d` / `DATABASE_URI`: database URI
//! - `-r` / `ACCRUAL_SYSTEM_ADDRESS`: accrual service address
//! - `LOYALTY_LOG`: tracing filter (default: info)

use std::sync::Arc;

use backon::Retryable;
use clap::Parser;
use tracing::{info, warn};

use loyalty::clients::HttpAccrualClient;
use loyalty::config::{CliArgs, Config};
use loyalty::handlers::{serve, AppState, TokenIssuer};
use loyalty::services::{AccrualWorker, LoyaltyService};
use loyalty::storage::init_storage;
use loyalty::utils::bootstrap::{init_tracing, shutdown_signal};
use loyalty::utils::retry::{is_retryable_storage, startup_backoff};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = CliArgs::parse().with_legacy_env();
    let config = Config::from_args(&args)?;

    info!(
        address = %config.server.address,
        storage = %config.storage.uri,
        accrual = %config.accrual.address,
        "loyalty-server starting"
    );

    let store = (|| async { init_storage(&config.storage).await })
        .retry(startup_backoff())
        .when(is_retryable_storage)
        .notify(|e, delay| warn!(error = %e, retry_in = ?delay, "Storage not ready"))
        .await?;

    let service = LoyaltyService::new(store);

    let worker = if config.worker.enabled {
        let client = Arc::new(HttpAccrualClient::new(&config.accrual)?);
        let worker = Arc::new(AccrualWorker::new(service.clone(), client, &config.worker));
        Some(worker.spawn())
    } else {
        info!("Accrual worker disabled");
        None
    };

    let state = AppState {
        service,
        tokens: TokenIssuer::new(&config.auth),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.address).await?;
    let served = serve(state, listener, shutdown_signal()).await;

    if let Some(handle) = worker {
        if tokio::time::timeout(config.server.shutdown_timeout(), handle.shutdown())
            .await
            .is_err()
        {
            warn!("Accrual worker did not stop within the shutdown timeout");
        }
    }

    served?;
    info!("loyalty-server stopped");
    Ok(())
}
