//! Prometheus metrics for the worker process.
//!
//! This module provides:
//! - Job counts by status and queue depth (collected dynamically)
//! - Worker pool running state
//! - Periodic export to a textfile for a node exporter collector

use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{self, Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mediagen_core::config::MetricsConfig;
use mediagen_core::JobStatus;

use crate::engine::Engine;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// Job Metrics (collected dynamically)
// =============================================================================

/// Jobs by current status.
pub static JOBS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("mediagen_jobs_by_status", "Current job count by status"),
        &["status"],
    )
    .unwrap()
});

/// Messages held by the queue, including leased ones.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("mediagen_queue_depth", "Number of messages in the queue").unwrap()
});

// =============================================================================
// Worker Metrics
// =============================================================================

/// Worker pool running state (1 = running, 0 = stopped).
pub static WORKER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mediagen_worker_running",
        "Whether the worker pool is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Configured worker concurrency.
pub static WORKER_CONCURRENCY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mediagen_worker_concurrency",
        "Number of parallel worker tasks",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(JOBS_BY_STATUS.clone()))
        .unwrap();
    registry.register(Box::new(QUEUE_DEPTH.clone())).unwrap();
    registry
        .register(Box::new(WORKER_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(WORKER_CONCURRENCY.clone()))
        .unwrap();

    // Core metrics (orchestrator, executor, store, sweep)
    for metric in mediagen_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Refresh gauges from the current engine state.
pub async fn collect_dynamic_metrics(engine: &Engine) {
    WORKER_RUNNING.set(if engine.is_running() { 1 } else { 0 });
    WORKER_CONCURRENCY.set(engine.config().worker.concurrency as i64);

    match engine.store().status_counts() {
        Ok(counts) => {
            for status in JobStatus::ALL {
                let count = counts.get(&status).copied().unwrap_or(0);
                JOBS_BY_STATUS
                    .with_label_values(&[status.as_str()])
                    .set(count);
            }
        }
        Err(e) => warn!("Failed to collect job counts: {}", e),
    }

    match engine.queue().depth().await {
        Ok(depth) => QUEUE_DEPTH.set(depth as i64),
        Err(e) => warn!("Failed to read queue depth: {}", e),
    }
}

/// Write the exposition to `path`, replacing it atomically.
pub async fn write_textfile(path: &Path) -> std::io::Result<()> {
    let body = encode_metrics().map_err(std::io::Error::other)?;

    let tmp_path = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp_path, body).await?;
    tokio::fs::rename(&tmp_path, path).await
}

/// Periodically collect and export metrics until `shutdown` fires. A final
/// export runs on shutdown so the file reflects the stopped state.
pub fn spawn_textfile_exporter(
    engine: std::sync::Arc<Engine>,
    config: MetricsConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(config.interval_secs);
        info!("Metrics textfile exporter started ({:?})", config.textfile_path);
        loop {
            let stop = tokio::select! {
                _ = shutdown.recv() => true,
                _ = tokio::time::sleep(interval) => false,
            };

            collect_dynamic_metrics(&engine).await;
            match write_textfile(&config.textfile_path).await {
                Ok(()) => debug!("Metrics written to {:?}", config.textfile_path),
                Err(e) => warn!("Failed to write metrics textfile: {}", e),
            }

            if stop {
                break;
            }
        }
        info!("Metrics textfile exporter stopped");
    })
}
