//! Executor outcome and failure types.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::job::{JobError, JobStatus};
use crate::provider::ProviderError;
use crate::retry::FailureClass;
use crate::storage::StorageError;

/// Longest provider reason carried into a job's error detail.
const MAX_PUBLIC_REASON: usize = 200;

/// Callback invoked on every status or progress change: `(job_id, status, progress)`.
pub type JobUpdateCallback = Arc<dyn Fn(&str, JobStatus, u8) + Send + Sync>;

/// Infrastructure failures that prevent the executor from recording a result.
///
/// The delivery should not be acknowledged; it will be redelivered.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("job store error: {0}")]
    Store(#[from] JobError),
}

/// Why a delivery was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The job no longer exists.
    NotFound,
    /// The job already reached a terminal status.
    Terminal,
    /// Another worker holds the job.
    AlreadyRunning,
    /// The job changed between read and write.
    Conflict,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::NotFound => "not_found",
            DiscardReason::Terminal => "terminal",
            DiscardReason::AlreadyRunning => "already_running",
            DiscardReason::Conflict => "conflict",
        }
    }
}

/// Result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Artifact stored, job completed.
    Completed,
    /// Transient failure; a delayed message was published for the next attempt.
    Retrying { attempt: u32, delay: Duration },
    /// Job marked failed.
    Failed { attempt: u32 },
    /// Job was cancelled during the attempt; any result was discarded.
    Cancelled,
    /// Delivery ignored; the job was not modified.
    Discarded(DiscardReason),
    /// Delivery arrived before the job's scheduled time; the scheduled
    /// message will follow.
    Deferred,
}

/// Classified failure of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    TransientProvider(String),
    PermanentProvider(String),
    Storage { reason: String, transient: bool },
    AttemptTimeout,
    /// A previous attempt stopped without recording its result.
    Abandoned,
    GlobalTimeout,
}

impl From<ProviderError> for FailureKind {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Transient { reason } => FailureKind::TransientProvider(reason),
            ProviderError::Permanent { reason } => FailureKind::PermanentProvider(reason),
        }
    }
}

impl From<StorageError> for FailureKind {
    fn from(e: StorageError) -> Self {
        FailureKind::Storage {
            transient: e.is_transient(),
            reason: e.to_string(),
        }
    }
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransientProvider(_) => "transient_provider",
            FailureKind::PermanentProvider(_) => "permanent_provider",
            FailureKind::Storage { .. } => "storage",
            FailureKind::AttemptTimeout => "attempt_timeout",
            FailureKind::Abandoned => "abandoned",
            FailureKind::GlobalTimeout => "global_timeout",
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            FailureKind::TransientProvider(_)
            | FailureKind::AttemptTimeout
            | FailureKind::Abandoned => FailureClass::Transient,
            FailureKind::Storage { transient: true, .. } => FailureClass::Transient,
            FailureKind::Storage { transient: false, .. }
            | FailureKind::PermanentProvider(_)
            | FailureKind::GlobalTimeout => FailureClass::Permanent,
        }
    }

    /// Internal description for logs. May contain backend details.
    pub fn internal_reason(&self) -> String {
        match self {
            FailureKind::TransientProvider(reason) | FailureKind::PermanentProvider(reason) => {
                reason.clone()
            }
            FailureKind::Storage { reason, .. } => reason.clone(),
            FailureKind::AttemptTimeout => "attempt timed out".to_string(),
            FailureKind::Abandoned => "attempt stopped without recording a result".to_string(),
            FailureKind::GlobalTimeout => "job exceeded its global timeout".to_string(),
        }
    }

    /// Caller-facing error detail stored on a failed job.
    pub fn public_detail(&self, attempts: u32) -> String {
        match self {
            FailureKind::TransientProvider(_) => format!(
                "Generation provider unavailable, gave up after {} attempt(s)",
                attempts
            ),
            FailureKind::PermanentProvider(reason) => {
                let reason = sanitize_reason(reason);
                if reason.is_empty() {
                    "Generation rejected by provider".to_string()
                } else {
                    format!("Generation rejected by provider: {}", reason)
                }
            }
            FailureKind::Storage { .. } => format!(
                "Failed to store generated artifact after {} attempt(s)",
                attempts
            ),
            FailureKind::AttemptTimeout => {
                format!("Generation timed out after {} attempt(s)", attempts)
            }
            FailureKind::Abandoned => {
                format!("Generation was interrupted, gave up after {} attempt(s)", attempts)
            }
            FailureKind::GlobalTimeout => {
                "Job exceeded the maximum allowed processing time".to_string()
            }
        }
    }
}

/// Strip control characters and bound the length of a provider reason.
pub(crate) fn sanitize_reason(reason: &str) -> String {
    let cleaned: String = reason
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_PUBLIC_REASON).collect()
}
