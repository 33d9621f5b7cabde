pub mod config;
pub mod executor;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod storage;
pub mod sweep;
pub mod testing;
pub mod worker;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, LogFormat,
    QueueBackend, SanitizedConfig,
};
pub use executor::{
    CancellationHub, ExecutionOutcome, ExecutorConfig, ExecutorError, GenerationExecutor,
    JobUpdateCallback,
};
pub use job::{Job, JobError, JobFilter, JobStatus, JobStore, SqliteJobStore};
pub use orchestrator::{
    JobOrchestrator, JobPage, JobStats, ListJobsQuery, OrchestratorConfig, OrchestratorError,
    SubmitRequest,
};
pub use provider::{GenerationProvider, HttpProvider, ProviderConfig, ProviderError};
pub use queue::{MemoryQueue, QueueError, QueueTransport, SqliteQueue};
pub use retry::{RetryConfig, RetryPolicy};
pub use storage::{ArtifactStorage, FsArtifactStorage, StorageError};
pub use sweep::{ReconciliationSweep, SweepConfig, SweepReport};
pub use worker::{WorkerConfig, WorkerPool};
