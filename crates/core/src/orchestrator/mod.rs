//! Job orchestrator: the caller-facing side of the engine.
//!
//! Submissions are validated, persisted as `pending` and published to the
//! queue. Status reads, listings, cancel and retry all go through the job
//! store; cancel and retry are conditional transitions, so they never
//! overwrite a concurrent executor step.

mod config;
mod service;
mod types;
mod validation;

pub use config::OrchestratorConfig;
pub use service::JobOrchestrator;
pub use types::{JobPage, JobStats, ListJobsQuery, OrchestratorError, SubmitRequest};
pub use validation::validate_request;
