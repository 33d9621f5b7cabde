//! Reconciliation sweep implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::FailureKind;
use crate::job::{
    chrono_duration, now, JobError, JobFilter, JobStatus, JobStore, Transition, UpdateOutcome,
};
use crate::metrics;
use crate::queue::{QueueMessage, QueueTransport};

use super::SweepConfig;

/// Detail recorded on jobs whose worker vanished mid-attempt.
pub const STALE_RUNNING_DETAIL: &str = "Worker stopped responding";

/// What a single sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Orphaned pending jobs that were re-enqueued.
    pub requeued: usize,
    /// Running jobs failed because they stopped making progress.
    pub stale_failed: usize,
    /// Running jobs failed because they exceeded the global timeout.
    pub timed_out: usize,
    /// Finished jobs deleted by retention.
    pub purged: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

struct SweepTask {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueTransport>,
    config: SweepConfig,
    global_timeout: Duration,
}

/// Repairs jobs that the normal message flow cannot recover.
///
/// Covers messages lost between the job write and the enqueue, workers that
/// died mid-attempt, and jobs running past the global timeout. Optionally
/// purges old finished jobs.
pub struct ReconciliationSweep {
    task: Arc<SweepTask>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReconciliationSweep {
    /// Create a new sweep. `global_timeout` is the executor's job budget.
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueTransport>,
        config: SweepConfig,
        global_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            task: Arc::new(SweepTask {
                store,
                queue,
                config,
                global_timeout,
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Run one sweep as of `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, JobError> {
        self.task.run_once(now).await
    }

    /// Start the periodic sweep loop.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Reconciliation sweep already running");
            return;
        }

        let task = Arc::clone(&self.task);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.task.config.interval();

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Reconciliation sweep started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Reconciliation sweep received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        match task.run_once(now()).await {
                            Ok(report) if !report.is_empty() => {
                                info!(
                                    requeued = report.requeued,
                                    stale_failed = report.stale_failed,
                                    timed_out = report.timed_out,
                                    purged = report.purged,
                                    "Reconciliation sweep repaired jobs"
                                );
                            }
                            Ok(_) => debug!("Reconciliation sweep found nothing to do"),
                            Err(e) => error!("Reconciliation sweep failed: {}", e),
                        }
                    }
                }
            }
            info!("Reconciliation sweep stopped");
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Stop the loop and wait for an in-flight sweep to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Reconciliation sweep not running");
            return;
        }

        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Reconciliation sweep task panicked: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl SweepTask {
    async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, JobError> {
        let mut report = SweepReport::default();

        // Timed-out jobs are usually stale as well; fail them first so they
        // carry the more specific detail.
        report.timed_out = self.fail_timed_out(now)?;
        report.stale_failed = self.fail_stale_running(now)?;
        report.requeued = self.requeue_orphaned(now).await?;

        if let Some(days) = self.config.retention_days {
            let cutoff = now - chrono::Duration::days(i64::from(days));
            report.purged = self.store.purge_finished(cutoff)?;
            if report.purged > 0 {
                metrics::SWEEP_ACTIONS
                    .with_label_values(&["purged"])
                    .inc_by(report.purged as u64);
            }
        }

        Ok(report)
    }

    async fn requeue_orphaned(&self, now: DateTime<Utc>) -> Result<usize, JobError> {
        let cutoff = now - chrono_duration(self.config.pending_grace());
        let filter = JobFilter::new()
            .with_status(JobStatus::Pending)
            .scheduled_before(cutoff)
            .with_limit(self.config.batch_size);

        let mut requeued = 0;
        for job in self.store.list(&filter)? {
            match self.queue.holds(&job.id).await {
                Ok(true) => {
                    debug!(job_id = %job.id, scheduled_at = %job.scheduled_at, "Pending job still queued, not re-enqueueing");
                    continue;
                }
                Ok(false) => {}
                // A duplicate message is harmless; a lost one is not.
                Err(e) => warn!(job_id = %job.id, error = %e, "Failed to check queue for job"),
            }

            // Started or cancelled in the meantime.
            if !self.store.reschedule_pending(&job.id, now)? {
                continue;
            }

            match self.queue.enqueue(QueueMessage::new(&job.id), None).await {
                Ok(()) => {
                    requeued += 1;
                    metrics::SWEEP_ACTIONS.with_label_values(&["requeued"]).inc();
                    info!(job_id = %job.id, scheduled_at = %job.scheduled_at, "Re-enqueued orphaned pending job");
                }
                Err(e) => {
                    metrics::ENQUEUE_FAILURES.inc();
                    warn!(job_id = %job.id, error = %e, "Failed to re-enqueue orphaned job");
                }
            }
        }

        Ok(requeued)
    }

    fn fail_stale_running(&self, now: DateTime<Utc>) -> Result<usize, JobError> {
        let cutoff = now - chrono_duration(self.config.stale_running());
        let filter = JobFilter::new()
            .with_status(JobStatus::Running)
            .updated_before(cutoff)
            .with_limit(self.config.batch_size);

        let mut failed = 0;
        for job in self.store.list(&filter)? {
            if self.fail_running(&job.id, STALE_RUNNING_DETAIL.to_string())? {
                failed += 1;
                metrics::SWEEP_ACTIONS
                    .with_label_values(&["stale_failed"])
                    .inc();
                warn!(job_id = %job.id, updated_at = %job.updated_at, "Failed stale running job");
            }
        }

        Ok(failed)
    }

    fn fail_timed_out(&self, now: DateTime<Utc>) -> Result<usize, JobError> {
        let cutoff = now - chrono_duration(self.global_timeout);
        let filter = JobFilter::new()
            .with_status(JobStatus::Running)
            .started_before(cutoff)
            .with_limit(self.config.batch_size);

        let mut failed = 0;
        for job in self.store.list(&filter)? {
            let detail = FailureKind::GlobalTimeout.public_detail(job.attempt_count);
            if self.fail_running(&job.id, detail)? {
                failed += 1;
                metrics::SWEEP_ACTIONS.with_label_values(&["timed_out"]).inc();
                warn!(job_id = %job.id, started_at = ?job.started_at, "Failed job past the global timeout");
            }
        }

        Ok(failed)
    }

    fn fail_running(&self, job_id: &str, error_detail: String) -> Result<bool, JobError> {
        match self.store.conditional_update(
            job_id,
            JobStatus::Running,
            Transition::Fail { error_detail },
        )? {
            UpdateOutcome::Applied(_) => {
                metrics::JOB_OUTCOMES.with_label_values(&["failed"]).inc();
                Ok(true)
            }
            UpdateOutcome::Rejected { current } => {
                metrics::TRANSITION_REJECTIONS
                    .with_label_values(&["fail"])
                    .inc();
                debug!(job_id = %job_id, current = %current, "Job left running before the sweep reached it");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration as ChronoDuration;

    use crate::job::{Job, Parameters, SqliteJobStore};
    use crate::queue::MemoryQueue;

    struct Fixture {
        store: Arc<SqliteJobStore>,
        queue: Arc<MemoryQueue>,
        sweep: ReconciliationSweep,
    }

    fn fixture(config: SweepConfig) -> Fixture {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
        let sweep = ReconciliationSweep::new(
            store.clone(),
            queue.clone(),
            config,
            Duration::from_secs(3600),
        );
        Fixture {
            store,
            queue,
            sweep,
        }
    }

    fn create_job(store: &SqliteJobStore) -> Job {
        let job = Job::new("sunset", Parameters::new(), None, 3);
        store.create(&job).unwrap();
        job
    }

    fn start_job(store: &SqliteJobStore) -> Job {
        let job = create_job(store);
        store
            .conditional_update(&job.id, JobStatus::Pending, Transition::Start)
            .unwrap()
            .applied()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_jobs_are_left_alone() {
        let f = fixture(SweepConfig::default());
        create_job(&f.store);
        start_job(&f.store);

        let report = f.sweep.run_once(Utc::now()).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(f.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_orphaned_pending_job_is_reenqueued() {
        let f = fixture(SweepConfig::default());
        let mut job = Job::new("sunset", Parameters::new(), None, 3);
        job.scheduled_at = Utc::now() - ChronoDuration::minutes(10);
        f.store.create(&job).unwrap();

        let at = now();
        let report = f.sweep.run_once(at).await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(f.queue.job_ids().await, vec![job.id.clone()]);

        let reloaded = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Pending);
        assert_eq!(reloaded.scheduled_at, at);

        // The bumped schedule keeps the next sweep from enqueueing it again.
        let report = f.sweep.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.requeued, 0);
    }

    #[tokio::test]
    async fn test_backlogged_pending_job_is_not_enqueued_twice() {
        let f = fixture(SweepConfig::default());
        let mut job = Job::new("sunset", Parameters::new(), None, 3);
        job.scheduled_at = now() - ChronoDuration::minutes(10);
        f.store.create(&job).unwrap();
        f.queue
            .enqueue(QueueMessage::new(&job.id), None)
            .await
            .unwrap();

        let report = f.sweep.run_once(now()).await.unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(f.queue.depth().await.unwrap(), 1);

        let reloaded = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(reloaded.scheduled_at, job.scheduled_at);
    }

    #[tokio::test]
    async fn test_stale_running_job_is_failed() {
        let f = fixture(SweepConfig::default());
        let job = start_job(&f.store);

        let report = f
            .sweep
            .run_once(Utc::now() + ChronoDuration::seconds(1000))
            .await
            .unwrap();
        assert_eq!(report.stale_failed, 1);
        assert_eq!(report.timed_out, 0);

        let reloaded = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Failed);
        assert_eq!(reloaded.error_detail.as_deref(), Some(STALE_RUNNING_DETAIL));
        assert!(reloaded.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_job_past_global_timeout_gets_timeout_detail() {
        let f = fixture(SweepConfig::default());
        let job = start_job(&f.store);

        let report = f
            .sweep
            .run_once(Utc::now() + ChronoDuration::seconds(4000))
            .await
            .unwrap();
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.stale_failed, 0);

        let reloaded = f.store.get(&job.id).unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Failed);
        assert_eq!(
            reloaded.error_detail.as_deref(),
            Some("Job exceeded the maximum allowed processing time")
        );
    }

    #[tokio::test]
    async fn test_retention_purges_finished_jobs() {
        let config = SweepConfig {
            retention_days: Some(7),
            ..Default::default()
        };
        let f = fixture(config);
        let cancelled = create_job(&f.store);
        f.store
            .conditional_update(&cancelled.id, JobStatus::Pending, Transition::Cancel)
            .unwrap();
        let pending = create_job(&f.store);

        let report = f.sweep.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.purged, 0);

        let report = f
            .sweep
            .run_once(Utc::now() + ChronoDuration::days(8))
            .await
            .unwrap();
        assert_eq!(report.purged, 1);
        assert!(f.store.get(&cancelled.id).unwrap().is_none());
        assert!(f.store.get(&pending.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_start_and_stop_loop() {
        let config = SweepConfig {
            interval_secs: 1,
            pending_grace_secs: 60,
            ..Default::default()
        };
        let f = fixture(config);
        let mut job = Job::new("sunset", Parameters::new(), None, 3);
        job.scheduled_at = Utc::now() - ChronoDuration::minutes(5);
        f.store.create(&job).unwrap();

        f.sweep.start().await;
        assert!(f.sweep.is_running());

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.queue.depth().await.unwrap() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        f.sweep.stop().await;
        assert!(!f.sweep.is_running());
    }
}
