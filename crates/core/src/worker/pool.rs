//! Worker pool implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::{ExecutionOutcome, GenerationExecutor};
use crate::queue::{Delivery, QueueError, QueueTransport};

use super::WorkerConfig;

/// Runs `concurrency` independent consumer tasks.
///
/// Each task takes one delivery at a time: dequeue, execute, ack. A delivery
/// whose execution hit a store fault is not acked, so the queue hands it out
/// again once its lease expires.
pub struct WorkerPool {
    queue: Arc<dyn QueueTransport>,
    executor: Arc<GenerationExecutor>,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn QueueTransport>,
        executor: Arc<GenerationExecutor>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            queue,
            executor,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the consumer tasks.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return;
        }

        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.config.concurrency {
            handles.push(self.spawn_worker(worker_id));
        }

        info!(concurrency = self.config.concurrency, "Worker pool started");
    }

    /// Stop taking new deliveries and wait for in-flight executions.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Worker pool not running");
            return;
        }

        info!("Stopping worker pool");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Worker task panicked: {}", e);
            }
        }

        info!("Worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn spawn_worker(&self, worker_id: usize) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let executor = Arc::clone(&self.executor);
        let running = Arc::clone(&self.running);
        let error_backoff = self.config.error_backoff();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!(worker_id, "Worker started");
            loop {
                let delivery = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    delivery = queue.dequeue() => delivery,
                };

                match delivery {
                    Ok(delivery) => {
                        process_delivery(worker_id, queue.as_ref(), &executor, delivery).await;
                    }
                    Err(QueueError::Closed) => {
                        info!(worker_id, "Queue closed, worker exiting");
                        break;
                    }
                    Err(e) => {
                        warn!(worker_id, error = %e, "Failed to dequeue");
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            _ = tokio::time::sleep(error_backoff) => {}
                        }
                    }
                }

                if !running.load(Ordering::Relaxed) {
                    break;
                }
            }
            debug!(worker_id, "Worker stopped");
        })
    }
}

async fn process_delivery(
    worker_id: usize,
    queue: &dyn QueueTransport,
    executor: &GenerationExecutor,
    delivery: Delivery,
) {
    let job_id = delivery.message.job_id.as_str();
    debug!(
        worker_id,
        job_id = %job_id,
        delivery_count = delivery.delivery_count,
        "Processing delivery"
    );

    match executor.execute(job_id).await {
        Ok(outcome) => {
            if let ExecutionOutcome::Discarded(reason) = &outcome {
                debug!(job_id = %job_id, reason = reason.as_str(), "Delivery discarded");
            }
            if let Err(e) = queue.ack(&delivery).await {
                // The lease expired; the redelivery will be discarded.
                warn!(job_id = %job_id, error = %e, "Failed to ack delivery");
            }
        }
        Err(e) => {
            error!(
                job_id = %job_id,
                error = %e,
                "Execution failed on a store error, leaving delivery for redelivery"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::executor::ExecutorConfig;
    use crate::job::{Job, JobStatus, JobStore, SqliteJobStore};
    use crate::queue::{MemoryQueue, QueueMessage};
    use crate::retry::RetryPolicy;
    use crate::testing::fixtures::square_parameters;
    use crate::testing::{MockProvider, MockStorage};

    struct Fixture {
        store: Arc<SqliteJobStore>,
        queue: Arc<MemoryQueue>,
        provider: MockProvider,
        pool: WorkerPool,
    }

    fn fixture(concurrency: usize) -> Fixture {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
        let provider = MockProvider::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Some(Duration::ZERO),
            jitter_ratio: 0.0,
        };
        let executor = GenerationExecutor::new(
            store.clone(),
            queue.clone(),
            Arc::new(provider.clone()),
            Arc::new(MockStorage::new()),
            policy,
            ExecutorConfig {
                cancel_poll_interval_ms: 20,
                ..Default::default()
            },
        );
        let pool = WorkerPool::new(
            queue.clone(),
            Arc::new(executor),
            WorkerConfig {
                concurrency,
                error_backoff_ms: 10,
            },
        );
        Fixture {
            store,
            queue,
            provider,
            pool,
        }
    }

    async fn submit(f: &Fixture) -> Job {
        let job = Job::new("sunset over the ocean", square_parameters(512), None, 3);
        f.store.create(&job).unwrap();
        f.queue
            .enqueue(QueueMessage::new(&job.id), None)
            .await
            .unwrap();
        job
    }

    async fn wait_for_status(store: &SqliteJobStore, id: &str, status: JobStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store.get(id).unwrap().unwrap().status == status {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_pool_completes_jobs_and_acks() {
        let f = fixture(3);
        let mut jobs = Vec::new();
        for _ in 0..5 {
            jobs.push(submit(&f).await);
        }

        f.pool.start().await;
        for job in &jobs {
            wait_for_status(&f.store, &job.id, JobStatus::Completed).await;
        }
        f.pool.stop().await;

        assert_eq!(f.provider.call_count().await, 5);
        assert_eq!(f.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_message_runs_job_once() {
        let f = fixture(2);
        let job = submit(&f).await;
        f.queue
            .enqueue(QueueMessage::new(&job.id), None)
            .await
            .unwrap();

        f.pool.start().await;
        wait_for_status(&f.store, &job.id, JobStatus::Completed).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.queue.depth().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        f.pool.stop().await;

        assert_eq!(f.provider.call_count().await, 1);
        assert_eq!(f.store.get(&job.id).unwrap().unwrap().attempt_count, 1);
    }

    #[tokio::test]
    async fn test_stop_idle_pool() {
        let f = fixture(2);
        f.pool.start().await;
        assert!(f.pool.is_running());

        tokio::time::timeout(Duration::from_secs(5), f.pool.stop())
            .await
            .unwrap();
        assert!(!f.pool.is_running());
    }

    #[tokio::test]
    async fn test_workers_exit_when_queue_closes() {
        let f = fixture(2);
        f.pool.start().await;
        f.queue.close().await;

        let handles: Vec<_> = f.pool.handles.lock().await.drain(..).collect();
        tokio::time::timeout(Duration::from_secs(5), join_all(handles))
            .await
            .unwrap();
    }
}
