//! Types for the job orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{Job, JobError, JobStatus, Parameters};
use crate::queue::QueueError;

/// Errors that can occur in orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The request was rejected before any state was created.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(String),

    /// The operation is not legal from the job's current status.
    #[error("cannot {operation} job {job_id} in status {current}")]
    InvalidState {
        job_id: String,
        current: JobStatus,
        operation: &'static str,
    },

    /// Job store error.
    #[error("job store error: {0}")]
    Store(#[from] JobError),

    /// Queue transport error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl OrchestratorError {
    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        OrchestratorError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// A request to generate media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub model: Option<String>,
}

/// Query for listing jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    /// Page size; clamped to the configured bounds.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Snapshot returned by a previous page. Rows created after it are
    /// excluded, so a traversal never sees a row twice.
    pub snapshot_at: Option<DateTime<Utc>>,
}

/// One page of jobs, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    /// Matching jobs at the snapshot, across all pages.
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub snapshot_at: DateTime<Utc>,
}

impl JobPage {
    /// Returns true if another page follows this one.
    pub fn has_more(&self) -> bool {
        self.offset + (self.jobs.len() as i64) < self.total
    }

    /// Query for the following page, pinned to the same snapshot.
    pub fn next_query(&self, status: Option<JobStatus>) -> ListJobsQuery {
        ListJobsQuery {
            status,
            limit: Some(self.limit),
            offset: Some(self.offset + self.limit),
            snapshot_at: Some(self.snapshot_at),
        }
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}
