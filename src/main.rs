//! Backchannel daemon entrypoint.
//!
//! Wires configuration, logging, the SQLite delivery store, the Mezon
//! transport, and the delivery queue pump, then runs until ctrl-c. On
//! shutdown the pump is given a bounded window to settle in-flight
//! sends before the process exits.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use backchannel::config::BotConfig;
use backchannel::logging;
use backchannel::queue::DeliveryQueue;
use backchannel::store::SqliteDeliveryStore;
use backchannel::transport::MezonTransport;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = BotConfig::load().context("failed to load configuration")?;
    let _logging_guard = logging::init_daemon(Path::new(&config.logging.dir))
        .context("failed to initialise logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "backchannel starting");

    let store = Arc::new(
        SqliteDeliveryStore::open(Path::new(&config.database.path))
            .await
            .context("failed to open delivery store")?,
    );
    let transport = Arc::new(MezonTransport::new(config.transport.clone()));
    let queue = DeliveryQueue::new(transport, store, config.queue.clone());

    let pump = queue.start();
    info!("delivery queue running; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    // Let in-flight sends settle before killing the pump.
    let deadline = tokio::time::Instant::now()
        .checked_add(SHUTDOWN_TIMEOUT)
        .unwrap_or_else(tokio::time::Instant::now);
    while !queue.is_idle().await {
        if tokio::time::Instant::now() >= deadline {
            warn!("shutdown timeout exceeded; abandoning queued deliveries");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    pump.abort();
    info!("backchannel stopped");
    Ok(())
}
