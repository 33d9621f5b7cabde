//! The generation executor.
//!
//! Runs one attempt of a job per delivery. Every state change is a
//! conditional update against the status the executor last observed, so a
//! duplicate delivery, a concurrent cancel or a sweep can never be
//! overwritten.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, sleep_until, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::cancel::signalled;
use super::{
    CancellationHub, DiscardReason, ExecutionOutcome, ExecutorConfig, ExecutorError, FailureKind,
    JobUpdateCallback,
};
use crate::job::{
    chrono_duration, now, ArtifactRef, Job, JobStatus, JobStore, Transition, UpdateOutcome,
};
use crate::metrics;
use crate::provider::{GenerationProvider, GenerationRequest};
use crate::queue::{QueueMessage, QueueTransport};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::storage::ArtifactStorage;

/// Progress reported right before the provider call.
const PROGRESS_STARTED: u8 = 10;
/// Progress reported once the provider returned an artifact.
const PROGRESS_GENERATED: u8 = 90;
/// Progress reported before writing to storage.
const PROGRESS_STORING: u8 = 95;

/// What a single attempt produced.
enum AttemptResult {
    Stored(ArtifactRef),
    Failed(FailureKind),
    /// The job left `running` while the attempt was in flight.
    Interrupted,
}

/// Executes generation jobs delivered by the queue.
pub struct GenerationExecutor {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueTransport>,
    provider: Arc<dyn GenerationProvider>,
    storage: Arc<dyn ArtifactStorage>,
    policy: RetryPolicy,
    config: ExecutorConfig,
    hub: Option<CancellationHub>,
    on_update: Option<JobUpdateCallback>,
}

impl GenerationExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueTransport>,
        provider: Arc<dyn GenerationProvider>,
        storage: Arc<dyn ArtifactStorage>,
        policy: RetryPolicy,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            queue,
            provider,
            storage,
            policy,
            config,
            hub: None,
            on_update: None,
        }
    }

    /// Receive in-process cancellations immediately instead of on the next poll.
    pub fn with_cancellation_hub(mut self, hub: CancellationHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Push status and progress changes to the embedding process.
    pub fn with_update_callback(mut self, callback: JobUpdateCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    /// Handle one delivery of `job_id`.
    pub async fn execute(&self, job_id: &str) -> Result<ExecutionOutcome, ExecutorError> {
        let Some(job) = self.store.get(job_id)? else {
            return Ok(self.discard(job_id, DiscardReason::NotFound));
        };

        match job.status {
            JobStatus::Pending => {}
            JobStatus::Running if self.is_abandoned(&job) => {
                return self.recover_abandoned(&job).await;
            }
            JobStatus::Running => return Ok(self.discard(job_id, DiscardReason::AlreadyRunning)),
            _ => return Ok(self.discard(job_id, DiscardReason::Terminal)),
        }

        let picked_up_at = now();
        if job.scheduled_at > picked_up_at {
            debug!(job_id = %job_id, scheduled_at = %job.scheduled_at, "Delivery arrived early, deferring");
            metrics::DELIVERIES_DISCARDED
                .with_label_values(&["deferred"])
                .inc();
            return Ok(ExecutionOutcome::Deferred);
        }

        // Subscribe before starting so a cancel issued right after the start
        // is not missed.
        let mut cancel_rx = self.hub.as_ref().map(CancellationHub::subscribe);

        let job = match self
            .store
            .conditional_update(job_id, JobStatus::Pending, Transition::Start)?
        {
            UpdateOutcome::Applied(job) => job,
            UpdateOutcome::Rejected { current } => {
                self.record_rejection("start", job_id, current);
                return Ok(self.discard(job_id, DiscardReason::Conflict));
            }
        };
        let attempt = job.attempt_count;
        self.notify(job_id, JobStatus::Running, job.progress);

        info!(job_id = %job_id, attempt = attempt, max_attempts = job.max_attempts, "Starting generation attempt");

        let deadline = self.global_deadline(&job);
        let remaining = (deadline - now()).to_std().unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            warn!(job_id = %job_id, "Job exceeded its global timeout before the attempt started");
            return self.fail(&job, FailureKind::GlobalTimeout).await;
        }

        let attempt_started = Instant::now();
        let result = self.run_attempt(&job, remaining, &mut cancel_rx).await;

        let outcome = match result {
            AttemptResult::Stored(artifact) => self.complete(&job, artifact).await?,
            AttemptResult::Interrupted => self.resolve_interrupted(job_id)?,
            AttemptResult::Failed(kind) => {
                metrics::ATTEMPT_FAILURES
                    .with_label_values(&[kind.as_str()])
                    .inc();
                warn!(
                    job_id = %job_id,
                    attempt = attempt,
                    kind = kind.as_str(),
                    reason = %kind.internal_reason(),
                    "Generation attempt failed"
                );
                self.handle_failure(&job, kind, deadline).await?
            }
        };

        let label = outcome_label(&outcome);
        metrics::JOB_ATTEMPTS.with_label_values(&[label]).inc();
        metrics::ATTEMPT_DURATION
            .with_label_values(&[label])
            .observe(attempt_started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    /// Run the provider call and the storage write, racing both against the
    /// attempt timeout, the remaining global budget and cancellation.
    async fn run_attempt(
        &self,
        job: &Job,
        remaining: Duration,
        cancel_rx: &mut Option<broadcast::Receiver<String>>,
    ) -> AttemptResult {
        let deadline = tokio::time::Instant::now() + remaining;
        let request = GenerationRequest {
            job_id: job.id.clone(),
            prompt: job.prompt.clone(),
            parameters: job.parameters.clone(),
            model: job.model.clone(),
        };

        self.report_progress(&job.id, PROGRESS_STARTED);

        let generated = tokio::select! {
            biased;
            _ = self.wait_until_not_running(&job.id, cancel_rx) => {
                return AttemptResult::Interrupted;
            }
            _ = sleep_until(deadline) => {
                return AttemptResult::Failed(FailureKind::GlobalTimeout);
            }
            result = timeout(self.config.attempt_timeout(), self.provider.generate(&request)) => result,
        };

        let artifact = match generated {
            Ok(Ok(artifact)) => artifact,
            Ok(Err(e)) => return AttemptResult::Failed(e.into()),
            Err(_) => return AttemptResult::Failed(FailureKind::AttemptTimeout),
        };

        debug!(
            job_id = %job.id,
            provider = self.provider.name(),
            size = artifact.bytes.len(),
            content_type = %artifact.content_type,
            "Provider returned artifact"
        );

        // Skip the storage write for a job that was cancelled meanwhile.
        if !self.still_running(&job.id) {
            return AttemptResult::Interrupted;
        }
        self.report_progress(&job.id, PROGRESS_GENERATED);
        self.report_progress(&job.id, PROGRESS_STORING);

        let stored = tokio::select! {
            biased;
            _ = self.wait_until_not_running(&job.id, cancel_rx) => {
                return AttemptResult::Interrupted;
            }
            _ = sleep_until(deadline) => {
                return AttemptResult::Failed(FailureKind::GlobalTimeout);
            }
            result = timeout(
                self.config.storage_timeout(),
                self.storage.store(&artifact.bytes, &artifact.content_type),
            ) => result,
        };

        match stored {
            Ok(Ok(locator)) => AttemptResult::Stored(ArtifactRef {
                locator,
                content_type: artifact.content_type,
                size_bytes: artifact.bytes.len() as u64,
            }),
            Ok(Err(e)) => AttemptResult::Failed(e.into()),
            Err(_) => AttemptResult::Failed(FailureKind::Storage {
                reason: "storage write timed out".to_string(),
                transient: true,
            }),
        }
    }

    async fn complete(
        &self,
        job: &Job,
        artifact: ArtifactRef,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let locator = artifact.locator.clone();
        match self.store.conditional_update(
            &job.id,
            JobStatus::Running,
            Transition::Complete { artifact },
        )? {
            UpdateOutcome::Applied(_) => {
                info!(job_id = %job.id, attempt = job.attempt_count, locator = %locator, "Job completed");
                metrics::JOB_OUTCOMES.with_label_values(&["completed"]).inc();
                self.notify(&job.id, JobStatus::Completed, 100);
                Ok(ExecutionOutcome::Completed)
            }
            UpdateOutcome::Rejected { current } => {
                // The stored artifact stays orphaned; the job never points at it.
                self.record_rejection("complete", &job.id, current);
                Ok(self.interrupted_outcome(&job.id, current))
            }
        }
    }

    async fn handle_failure(
        &self,
        job: &Job,
        kind: FailureKind,
        deadline: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let delay = match self.policy.decide(job.retries_used(), kind.class()) {
            RetryDecision::GiveUp => return self.fail(job, kind).await,
            RetryDecision::RetryAfter(delay) => self.policy.jittered(delay),
        };

        let scheduled_at = now() + chrono_duration(delay);
        if scheduled_at >= deadline {
            info!(job_id = %job.id, "Next attempt would start after the global deadline");
            return self.fail(job, FailureKind::GlobalTimeout).await;
        }

        match self.store.conditional_update(
            &job.id,
            JobStatus::Running,
            Transition::Requeue { scheduled_at },
        )? {
            UpdateOutcome::Applied(updated) => {
                self.notify(&job.id, JobStatus::Pending, updated.progress);
            }
            UpdateOutcome::Rejected { current } => {
                self.record_rejection("requeue", &job.id, current);
                return Ok(self.interrupted_outcome(&job.id, current));
            }
        }

        if let Err(e) = self
            .queue
            .enqueue(QueueMessage::new(job.id.clone()), Some(delay))
            .await
        {
            // The job is durably pending; the sweep re-publishes it.
            metrics::ENQUEUE_FAILURES.inc();
            warn!(job_id = %job.id, error = %e, "Failed to enqueue retry message");
        }

        info!(
            job_id = %job.id,
            attempt = job.attempt_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduled retry"
        );
        Ok(ExecutionOutcome::Retrying {
            attempt: job.attempt_count,
            delay,
        })
    }

    async fn fail(&self, job: &Job, kind: FailureKind) -> Result<ExecutionOutcome, ExecutorError> {
        let error_detail = kind.public_detail(job.attempt_count);
        match self.store.conditional_update(
            &job.id,
            JobStatus::Running,
            Transition::Fail {
                error_detail: error_detail.clone(),
            },
        )? {
            UpdateOutcome::Applied(updated) => {
                warn!(
                    job_id = %job.id,
                    attempt = job.attempt_count,
                    kind = kind.as_str(),
                    error_detail = %error_detail,
                    "Job failed"
                );
                metrics::JOB_OUTCOMES.with_label_values(&["failed"]).inc();
                self.notify(&job.id, JobStatus::Failed, updated.progress);
                Ok(ExecutionOutcome::Failed {
                    attempt: job.attempt_count,
                })
            }
            UpdateOutcome::Rejected { current } => {
                self.record_rejection("fail", &job.id, current);
                Ok(self.interrupted_outcome(&job.id, current))
            }
        }
    }

    /// A redelivery of a job whose attempt went silent, typically because a
    /// store write failed after `Start` or the worker died.
    fn is_abandoned(&self, job: &Job) -> bool {
        now() - job.updated_at > chrono_duration(self.config.abandon_after())
    }

    /// Treat the silent attempt as a transient failure so the retry policy
    /// decides between another attempt and failing the job.
    async fn recover_abandoned(&self, job: &Job) -> Result<ExecutionOutcome, ExecutorError> {
        let kind = FailureKind::Abandoned;
        metrics::ATTEMPT_FAILURES
            .with_label_values(&[kind.as_str()])
            .inc();
        warn!(
            job_id = %job.id,
            attempt = job.attempt_count,
            updated_at = %job.updated_at,
            "Previous attempt stopped without recording a result"
        );

        let deadline = self.global_deadline(job);
        let outcome = if now() >= deadline {
            self.fail(job, FailureKind::GlobalTimeout).await?
        } else {
            self.handle_failure(job, kind, deadline).await?
        };

        metrics::JOB_ATTEMPTS
            .with_label_values(&[outcome_label(&outcome)])
            .inc();
        Ok(outcome)
    }

    fn resolve_interrupted(&self, job_id: &str) -> Result<ExecutionOutcome, ExecutorError> {
        let current = self.store.get(job_id)?.map(|job| job.status);
        Ok(match current {
            Some(status) => self.interrupted_outcome(job_id, status),
            None => self.discard(job_id, DiscardReason::NotFound),
        })
    }

    fn interrupted_outcome(&self, job_id: &str, current: JobStatus) -> ExecutionOutcome {
        if current == JobStatus::Cancelled {
            info!(job_id = %job_id, "Job was cancelled during the attempt, result discarded");
            ExecutionOutcome::Cancelled
        } else {
            self.discard(job_id, DiscardReason::Conflict)
        }
    }

    /// Resolves once the job is observed outside `running`, through the hub or
    /// by polling the store.
    async fn wait_until_not_running(
        &self,
        job_id: &str,
        cancel_rx: &mut Option<broadcast::Receiver<String>>,
    ) {
        let mut ticker = interval(self.config.cancel_poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = signalled(cancel_rx, job_id) => {}
                _ = ticker.tick() => {}
            }
            if !self.still_running(job_id) {
                return;
            }
        }
    }

    /// Store read errors count as still running; the next poll retries.
    fn still_running(&self, job_id: &str) -> bool {
        match self.store.get(job_id) {
            Ok(Some(job)) => job.status == JobStatus::Running,
            Ok(None) => false,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to check job status");
                true
            }
        }
    }

    fn global_deadline(&self, job: &Job) -> DateTime<Utc> {
        let started = job.started_at.unwrap_or(job.created_at);
        started + chrono_duration(self.config.global_timeout())
    }

    fn report_progress(&self, job_id: &str, progress: u8) {
        match self.store.update_progress(job_id, progress) {
            Ok(true) => self.notify(job_id, JobStatus::Running, progress),
            Ok(false) => {}
            Err(e) => debug!(job_id = %job_id, error = %e, "Failed to record progress"),
        }
    }

    fn notify(&self, job_id: &str, status: JobStatus, progress: u8) {
        if let Some(callback) = &self.on_update {
            callback(job_id, status, progress);
        }
    }

    fn discard(&self, job_id: &str, reason: DiscardReason) -> ExecutionOutcome {
        debug!(job_id = %job_id, reason = reason.as_str(), "Discarding delivery");
        metrics::DELIVERIES_DISCARDED
            .with_label_values(&[reason.as_str()])
            .inc();
        ExecutionOutcome::Discarded(reason)
    }

    fn record_rejection(&self, transition: &str, job_id: &str, current: JobStatus) {
        debug!(job_id = %job_id, transition = transition, current = %current, "Conditional transition rejected");
        metrics::TRANSITION_REJECTIONS
            .with_label_values(&[transition])
            .inc();
    }
}

fn outcome_label(outcome: &ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::Completed => "completed",
        ExecutionOutcome::Retrying { .. } => "retrying",
        ExecutionOutcome::Failed { .. } => "failed",
        ExecutionOutcome::Cancelled => "cancelled",
        ExecutionOutcome::Discarded(_) | ExecutionOutcome::Deferred => "conflict",
    }
}
