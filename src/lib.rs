pub mod channels;       // Inter-component communication channels
pub mod config;         // Configuration management
pub mod coordinator;    // Record fan-out to sinks, frame statistics
pub mod datalog_writer; // JSON lines record log
pub mod error;          // Error types
pub mod growatt;        // Growatt datalogger protocol
pub mod mqtt;           // MQTT client and messaging
pub mod options;        // Command line options parsing
pub mod prelude;        // Common imports and types
pub mod proxy;          // Datalogger listener and cloud relay
pub mod sink;           // Record consumers

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use std::sync::Arc;

/// Sets up env_logger with `level` as the default filter; RUST_LOG still
/// wins when set. Safe to call more than once.
pub fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
}

pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, config: ConfigWrapper) -> Result<()> {
    info!("growatt-bridge {} starting", CARGO_PKG_VERSION);
    config.log_summary();

    let layouts = Arc::new(Layouts::load_dir(config.layouts())?);
    debug!("layouts: {:?}", layouts.names());

    let channels = Channels::new();

    let mut coordinator = Coordinator::new(channels.clone());

    let mqtt = Mqtt::new(config.clone(), channels.clone());
    if config.mqtt().enabled() {
        coordinator.add_sink(Arc::new(mqtt.clone()));
    }

    if let Some(path) = config.datalog_file() {
        coordinator.add_sink(Arc::new(DatalogWriter::new(&path)?));
    }

    if coordinator.sink_count() == 0 {
        warn!("no sinks configured, decoded records will only be logged");
    }

    let stats = coordinator.stats.clone();
    let proxy = Proxy::new(config.clone(), layouts, channels.clone(), stats.clone());
    let listener = proxy.bind().await?;

    let coordinator_clone = coordinator.clone();
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator_clone.start().await {
            error!("Coordinator task failed: {}", e);
        }
    });

    let mqtt_clone = mqtt.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start().await {
            error!("MQTT task failed: {}", e);
        }
    });

    let proxy_clone = proxy.clone();
    let proxy_handle = tokio::spawn(async move {
        if let Err(e) = proxy_clone.start(listener).await {
            error!("Proxy task failed: {}", e);
        }
    });

    let _ = shutdown_rx.recv().await;
    info!("Shutdown signal received, stopping components...");

    proxy.stop();
    coordinator.stop();
    mqtt.stop().await?;

    for (name, handle) in [
        ("proxy", proxy_handle),
        ("coordinator", coordinator_handle),
        ("mqtt", mqtt_handle),
    ] {
        if let Err(e) = handle.await {
            error!("Error waiting for {} task: {}", name, e);
        }
    }

    if let Ok(stats) = stats.lock() {
        stats.print_summary();
    }

    info!("Application shutdown complete");
    Ok(())
}
