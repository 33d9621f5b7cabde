//! Job types and the lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generation parameters forwarded to the provider verbatim.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker (first attempt or a scheduled retry).
    Pending,
    /// A worker is executing an attempt.
    Running,
    /// Artifact generated and stored.
    Completed,
    /// Gave up: retries exhausted, permanent rejection or timeout.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if no worker will touch the job again.
    ///
    /// `failed` counts as terminal for execution purposes; only an explicit
    /// retry moves it back to `pending`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Returns true if the job can be cancelled from this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// Returns true if an explicit retry is legal from this status.
    pub fn can_retry(&self) -> bool {
        matches!(self, JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// A stored generation artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Opaque locator returned by the artifact storage.
    pub locator: String,
    /// MIME type of the artifact.
    pub content_type: String,
    /// Size of the artifact in bytes.
    pub size_bytes: u64,
}

/// A single edge of the job state machine, together with the fields it writes.
///
/// The store applies a transition only if the job's stored status equals the
/// expected prior status, in a single statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// pending -> running. Increments `attempt_count`, sets `started_at` on the
    /// first attempt.
    Start,
    /// running -> completed with the stored artifact.
    Complete { artifact: ArtifactRef },
    /// running -> pending after a transient failure; the next delivery is due
    /// at `scheduled_at`.
    Requeue { scheduled_at: DateTime<Utc> },
    /// running -> failed with a sanitized error detail.
    Fail { error_detail: String },
    /// pending|running -> cancelled.
    Cancel,
    /// failed -> pending. Clears the previous run (explicit retry).
    Reset { scheduled_at: DateTime<Utc> },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Complete { .. } => "complete",
            Transition::Requeue { .. } => "requeue",
            Transition::Fail { .. } => "fail",
            Transition::Cancel => "cancel",
            Transition::Reset { .. } => "reset",
        }
    }

    /// Status the job is in after the transition.
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Start => JobStatus::Running,
            Transition::Complete { .. } => JobStatus::Completed,
            Transition::Requeue { .. } => JobStatus::Pending,
            Transition::Fail { .. } => JobStatus::Failed,
            Transition::Cancel => JobStatus::Cancelled,
            Transition::Reset { .. } => JobStatus::Pending,
        }
    }

    /// Returns true if this edge exists from `from`.
    pub fn allowed_from(&self, from: JobStatus) -> bool {
        match self {
            Transition::Start => from == JobStatus::Pending,
            Transition::Complete { .. } | Transition::Requeue { .. } | Transition::Fail { .. } => {
                from == JobStatus::Running
            }
            Transition::Cancel => from.can_cancel(),
            Transition::Reset { .. } => from.can_retry(),
        }
    }
}

/// A media generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub prompt: String,
    pub parameters: Parameters,
    /// Model identifier forwarded to the provider, if the caller chose one.
    pub model: Option<String>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub result_locator: Option<String>,
    pub result_content_type: Option<String>,
    pub result_size_bytes: Option<u64>,
    pub error_detail: Option<String>,
    /// Completion percentage, 0-100.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Start of the first attempt.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// When the latest execution message becomes deliverable.
    pub scheduled_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh pending job.
    pub fn new(
        prompt: impl Into<String>,
        parameters: Parameters,
        model: Option<String>,
        max_attempts: u32,
    ) -> Self {
        let now = super::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            prompt: prompt.into(),
            parameters,
            model,
            attempt_count: 0,
            max_attempts,
            result_locator: None,
            result_content_type: None,
            result_size_bytes: None,
            error_detail: None,
            progress: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            scheduled_at: now,
        }
    }

    /// Number of retries already consumed, counting the current attempt as
    /// the first one.
    pub fn retries_used(&self) -> u32 {
        self.attempt_count.saturating_sub(1)
    }

    /// Returns true if another `Start` would exceed the attempt ceiling.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count > self.max_attempts
    }
}
