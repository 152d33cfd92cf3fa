use anyhow::Result;
use log::error;
use tokio::sync::broadcast;

use growatt_bridge::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    let config = ConfigWrapper::new(options.config_file.clone())?;
    config.apply_options(&options);

    growatt_bridge::init_logging(&config.loglevel());

    let (shutdown_tx, _) = broadcast::channel(1);
    let shutdown_rx = shutdown_tx.subscribe();

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        if let Err(e) = shutdown_tx_clone.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    });

    let app_handle = tokio::spawn(growatt_bridge::app(shutdown_rx, config));

    if let Err(e) = app_handle.await? {
        error!("Application error: {}", e);
        std::process::exit(255);
    }

    Ok(())
}
