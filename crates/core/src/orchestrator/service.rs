//! Job orchestrator implementation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::validation::validate_request;
use super::{
    JobPage, JobStats, ListJobsQuery, OrchestratorConfig, OrchestratorError, SubmitRequest,
};
use crate::executor::CancellationHub;
use crate::job::{now, Job, JobError, JobFilter, JobStatus, JobStore, Transition, UpdateOutcome};
use crate::metrics;
use crate::queue::{QueueMessage, QueueTransport};
use crate::retry::RetryConfig;

/// Entry point for callers: submission, status queries, cancel and retry.
///
/// The orchestrator never executes jobs and never retries on behalf of the
/// caller; it writes the job record and publishes execution messages.
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueTransport>,
    config: OrchestratorConfig,
    max_attempts: u32,
    hub: Option<CancellationHub>,
}

impl JobOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueTransport>,
        config: OrchestratorConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
            max_attempts: retry.max_attempts,
            hub: None,
        }
    }

    /// Notify in-process executors immediately on cancel.
    pub fn with_cancellation_hub(mut self, hub: CancellationHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Validate and persist a new job, then publish its execution message.
    ///
    /// If publishing fails the job is still returned: it is durably
    /// `pending`, and the reconciliation sweep republishes it.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Job, OrchestratorError> {
        let request = validate_request(request, &self.config)?;
        let job = Job::new(
            request.prompt,
            request.parameters,
            request.model,
            self.max_attempts,
        );

        self.store.create(&job)?;
        metrics::JOBS_SUBMITTED.inc();
        info!(job_id = %job.id, model = ?job.model, "Job submitted");

        self.publish(&job.id).await;
        Ok(job)
    }

    /// Current snapshot of a job.
    pub fn get_status(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        self.store
            .get(job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))
    }

    /// List jobs newest first, optionally filtered by status.
    pub fn list_jobs(&self, query: ListJobsQuery) -> Result<JobPage, OrchestratorError> {
        let limit = query
            .limit
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1));
        let offset = query.offset.unwrap_or(0).max(0);
        let snapshot_at = query.snapshot_at.unwrap_or_else(now);

        let mut filter = JobFilter::new()
            .with_snapshot(snapshot_at)
            .with_limit(limit)
            .with_offset(offset);
        if let Some(status) = query.status {
            filter = filter.with_status(status);
        }

        let jobs = self.store.list(&filter)?;
        let total = self.store.count(&filter)?;

        Ok(JobPage {
            jobs,
            total,
            limit,
            offset,
            snapshot_at,
        })
    }

    /// Cancel a pending or running job.
    ///
    /// A running attempt notices on its next check and discards its result.
    pub fn cancel(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        let mut observed = self.get_status(job_id)?;

        for _ in 0..=self.config.cancel_retry_limit {
            if !observed.status.can_cancel() {
                break;
            }

            match self
                .store
                .conditional_update(job_id, observed.status, Transition::Cancel)
            {
                Ok(UpdateOutcome::Applied(job)) => {
                    if let Some(hub) = &self.hub {
                        hub.notify(job_id);
                    }
                    metrics::JOB_OUTCOMES.with_label_values(&["cancelled"]).inc();
                    info!(job_id = %job_id, previous = %observed.status, "Job cancelled");
                    return Ok(job);
                }
                Ok(UpdateOutcome::Rejected { current }) => {
                    metrics::TRANSITION_REJECTIONS
                        .with_label_values(&["cancel"])
                        .inc();
                    debug!(job_id = %job_id, current = %current, "Cancel raced with another transition, retrying");
                    observed = self.get_status(job_id)?;
                }
                Err(JobError::NotFound(_)) => {
                    return Err(OrchestratorError::NotFound(job_id.to_string()))
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(OrchestratorError::InvalidState {
            job_id: job_id.to_string(),
            current: observed.status,
            operation: "cancel",
        })
    }

    /// Re-run a failed job from scratch.
    pub async fn retry(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        let job = self.get_status(job_id)?;
        if !job.status.can_retry() {
            return Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                current: job.status,
                operation: "retry",
            });
        }

        let job = match self.store.conditional_update(
            job_id,
            JobStatus::Failed,
            Transition::Reset {
                scheduled_at: now(),
            },
        )? {
            UpdateOutcome::Applied(job) => job,
            UpdateOutcome::Rejected { current } => {
                metrics::TRANSITION_REJECTIONS
                    .with_label_values(&["reset"])
                    .inc();
                return Err(OrchestratorError::InvalidState {
                    job_id: job_id.to_string(),
                    current,
                    operation: "retry",
                });
            }
        };

        info!(job_id = %job_id, "Job reset for retry");
        self.publish(job_id).await;
        Ok(job)
    }

    /// Job counts per status.
    pub fn stats(&self) -> Result<JobStats, OrchestratorError> {
        let counts = self.store.status_counts()?;
        let count = |status: JobStatus| counts.get(&status).copied().unwrap_or(0);

        let stats = JobStats {
            pending: count(JobStatus::Pending),
            running: count(JobStatus::Running),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            cancelled: count(JobStatus::Cancelled),
            total: counts.values().sum(),
        };
        Ok(stats)
    }

    /// Delete completed and cancelled jobs that finished before `older_than`.
    pub fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize, OrchestratorError> {
        let purged = self.store.purge_finished(older_than)?;
        if purged > 0 {
            info!(purged = purged, cutoff = %older_than, "Purged finished jobs");
        }
        Ok(purged)
    }

    async fn publish(&self, job_id: &str) {
        if let Err(e) = self.queue.enqueue(QueueMessage::new(job_id), None).await {
            metrics::ENQUEUE_FAILURES.inc();
            warn!(
                job_id = %job_id,
                error = %e,
                "Failed to enqueue job; it stays pending until the sweep republishes it"
            );
        }
    }
}
