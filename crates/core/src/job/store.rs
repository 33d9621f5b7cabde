//! Job storage trait and types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Job, JobStatus, Transition};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(String),

    /// A job with this id already exists.
    #[error("job already exists: {0}")]
    AlreadyExists(String),

    /// The requested edge does not exist in the state machine.
    #[error("illegal transition '{transition}' from status {from}")]
    InvalidTransition {
        from: JobStatus,
        transition: &'static str,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The stored status matched and the transition was written.
    Applied(Job),
    /// The stored status did not match the expected one; nothing was written.
    Rejected { current: JobStatus },
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }

    /// The updated job, if the transition was applied.
    pub fn applied(self) -> Option<Job> {
        match self {
            UpdateOutcome::Applied(job) => Some(job),
            UpdateOutcome::Rejected { .. } => None,
        }
    }
}

/// Filter for querying jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    /// Filter by status.
    pub status: Option<JobStatus>,
    /// Only jobs created at or before this instant.
    pub created_at_or_before: Option<DateTime<Utc>>,
    /// Only jobs whose `scheduled_at` is strictly before this instant.
    pub scheduled_before: Option<DateTime<Utc>>,
    /// Only jobs whose `updated_at` is strictly before this instant.
    pub updated_before: Option<DateTime<Utc>>,
    /// Only jobs whose `started_at` is strictly before this instant.
    pub started_before: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            created_at_or_before: None,
            scheduled_before: None,
            updated_before: None,
            started_before: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Pin the traversal to jobs that existed at `snapshot`.
    pub fn with_snapshot(mut self, snapshot: DateTime<Utc>) -> Self {
        self.created_at_or_before = Some(snapshot);
        self
    }

    pub fn scheduled_before(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_before = Some(at);
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    pub fn started_before(mut self, at: DateTime<Utc>) -> Self {
        self.started_before = Some(at);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for job storage backends.
///
/// Every status change goes through [`JobStore::conditional_update`]; there is
/// no blind write path.
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    fn create(&self, job: &Job) -> Result<(), JobError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<Job>, JobError>;

    /// List jobs matching the filter, newest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError>;

    /// Count jobs matching the filter (limit/offset ignored).
    fn count(&self, filter: &JobFilter) -> Result<i64, JobError>;

    /// Apply `transition` if the stored status equals `expected`.
    ///
    /// Returns `InvalidTransition` without touching the store if the edge does
    /// not exist from `expected`, `NotFound` if the job is unknown.
    fn conditional_update(
        &self,
        id: &str,
        expected: JobStatus,
        transition: Transition,
    ) -> Result<UpdateOutcome, JobError>;

    /// Raise the progress of a running job. Lower values are ignored.
    ///
    /// Returns false if the job is not running.
    fn update_progress(&self, id: &str, progress: u8) -> Result<bool, JobError>;

    /// Move `scheduled_at` of a pending job. Returns false if it is not pending.
    fn reschedule_pending(&self, id: &str, scheduled_at: DateTime<Utc>)
        -> Result<bool, JobError>;

    /// Number of jobs per status.
    fn status_counts(&self) -> Result<HashMap<JobStatus, i64>, JobError>;

    /// Delete completed and cancelled jobs that finished before `cutoff`.
    fn purge_finished(&self, cutoff: DateTime<Utc>) -> Result<usize, JobError>;
}
