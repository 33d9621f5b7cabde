mod engine;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediagen_core::{load_config, validate_config, LogFormat, SanitizedConfig};

use engine::Engine;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Logging may not be initialized yet if the config failed to load.
        eprintln!("Fatal error: {:#}", e);
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("MEDIAGEN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("mediagen.toml"));

    // Load configuration
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    init_logging(config.logging.format);
    info!("mediagen-worker {} starting", VERSION);
    info!("Configuration loaded from {:?}", config_path);
    info!(
        "Effective configuration: {}",
        serde_json::to_string(&SanitizedConfig::from(&config)).unwrap_or_default()
    );

    let metrics_config = config.metrics.clone();
    let engine = Arc::new(Engine::build(config)?);

    match engine.orchestrator().stats() {
        Ok(stats) => info!(
            pending = stats.pending,
            running = stats.running,
            failed = stats.failed,
            total = stats.total,
            "Job store opened"
        ),
        Err(e) => error!("Failed to read job statistics: {}", e),
    }

    engine.start().await;

    // Metrics textfile exporter
    let (metrics_shutdown_tx, _) = broadcast::channel(1);
    let exporter = metrics_config.map(|metrics_config| {
        metrics::spawn_textfile_exporter(
            Arc::clone(&engine),
            metrics_config,
            metrics_shutdown_tx.subscribe(),
        )
    });

    info!("Worker running, waiting for shutdown signal");
    shutdown_signal().await;

    info!("Stopping worker...");
    engine.stop().await;

    if let Some(exporter) = exporter {
        let _ = metrics_shutdown_tx.send(());
        let _ = exporter.await;
    }

    info!("Worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}
