//! Wiring of the core components for one worker process.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use mediagen_core::{
    ArtifactStorage, CancellationHub, Config, FsArtifactStorage, GenerationExecutor,
    GenerationProvider, HttpProvider, JobOrchestrator, JobStatus, JobStore, MemoryQueue,
    QueueBackend, QueueTransport, ReconciliationSweep, RetryPolicy, SqliteJobStore, SqliteQueue,
    WorkerPool,
};

/// Everything a running worker owns.
pub struct Engine {
    config: Config,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueTransport>,
    hub: CancellationHub,
    pool: WorkerPool,
    sweep: Option<ReconciliationSweep>,
}

impl Engine {
    /// Build the engine with the HTTP provider from `[provider]`.
    pub fn build(config: Config) -> Result<Self> {
        let provider_config = config
            .provider
            .clone()
            .context("The worker needs a [provider] section")?;
        info!("Using generation provider at {}", provider_config.endpoint);

        let provider =
            HttpProvider::new(provider_config).context("Failed to create HTTP provider")?;
        Self::with_provider(config, Arc::new(provider))
    }

    /// Build the engine around an already constructed provider.
    pub fn with_provider(config: Config, provider: Arc<dyn GenerationProvider>) -> Result<Self> {
        let store: Arc<dyn JobStore> = Arc::new(
            SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
        );
        info!("Job store initialized at {:?}", config.database.path);

        let queue: Arc<dyn QueueTransport> = match config.queue.backend {
            QueueBackend::Sqlite => Arc::new(
                SqliteQueue::new(
                    &config.database.path,
                    config.queue.visibility_timeout(),
                    config.queue.poll_interval(),
                )
                .context("Failed to create SQLite queue")?,
            ),
            QueueBackend::Memory => {
                Arc::new(MemoryQueue::new(config.queue.visibility_timeout()))
            }
        };
        info!("Queue backend: {:?}", config.queue.backend);

        let storage: Arc<dyn ArtifactStorage> =
            Arc::new(FsArtifactStorage::new(config.storage.root.clone()));
        info!("Artifact storage at {:?}", config.storage.root);

        let hub = CancellationHub::new();
        let executor = GenerationExecutor::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&provider),
            storage,
            RetryPolicy::from_config(&config.retry),
            config.executor.clone(),
        )
        .with_cancellation_hub(hub.clone())
        .with_update_callback(Arc::new(|job_id: &str, status: JobStatus, progress: u8| {
            debug!(job_id = %job_id, status = %status, progress, "Job updated");
        }));
        info!(provider = provider.name(), "Generation executor initialized");

        let pool = WorkerPool::new(
            Arc::clone(&queue),
            Arc::new(executor),
            config.worker.clone(),
        );

        let sweep = if config.sweep.enabled {
            Some(ReconciliationSweep::new(
                Arc::clone(&store),
                Arc::clone(&queue),
                config.sweep.clone(),
                config.executor.global_timeout(),
            ))
        } else {
            info!("Reconciliation sweep disabled");
            None
        };

        Ok(Self {
            config,
            store,
            queue,
            hub,
            pool,
            sweep,
        })
    }

    pub async fn start(&self) {
        self.pool.start().await;
        if let Some(sweep) = &self.sweep {
            sweep.start().await;
        }
    }

    /// Stop consuming and wait for in-flight executions.
    pub async fn stop(&self) {
        if let Some(sweep) = &self.sweep {
            sweep.stop().await;
        }
        self.pool.stop().await;
    }

    /// Orchestrator sharing this engine's store, queue and cancellation hub.
    pub fn orchestrator(&self) -> JobOrchestrator {
        JobOrchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            self.config.orchestrator.clone(),
            &self.config.retry,
        )
        .with_cancellation_hub(self.hub.clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn QueueTransport> {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }
}
