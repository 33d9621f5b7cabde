//! Generation executor: runs one attempt per queue delivery.
//!
//! The executor loads the job, claims it with a conditional `pending ->
//! running` update, calls the provider, stores the artifact and records the
//! outcome. Transient failures are rescheduled through the retry policy with a
//! delayed queue message; everything else ends in `failed`.

mod cancel;
mod config;
mod runner;
mod types;

pub use cancel::CancellationHub;
pub use config::ExecutorConfig;
pub use runner::GenerationExecutor;
pub use types::{
    DiscardReason, ExecutionOutcome, ExecutorError, FailureKind, JobUpdateCallback,
};
