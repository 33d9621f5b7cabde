//! In-process queue transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Delivery, QueueError, QueueMessage, QueueTransport};

/// Upper bound on a single idle wait; the loop re-checks after it.
const IDLE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Entry {
    id: u64,
    message: QueueMessage,
    visible_at: Instant,
    deliveries: u32,
    lease: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<Entry>,
    next_id: u64,
    closed: bool,
}

/// In-memory queue with delayed visibility and lease-based redelivery.
///
/// Suitable for tests and for embedding the engine in a single process.
#[derive(Debug)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    /// Stop delivering. Pending and future `dequeue` calls return `Closed`.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Job ids of all held messages, in enqueue order.
    pub async fn job_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .entries
            .iter()
            .map(|e| e.message.job_id.clone())
            .collect()
    }

    /// Lease the earliest visible entry, or report when the next one will be.
    fn try_lease(&self, inner: &mut Inner, now: Instant) -> Result<Delivery, Option<Instant>> {
        let candidate = inner
            .entries
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .min_by_key(|e| (e.visible_at, e.id));

        match candidate {
            Some(entry) => {
                let receipt = uuid::Uuid::new_v4().to_string();
                entry.visible_at = now + self.visibility_timeout;
                entry.deliveries += 1;
                entry.lease = Some(receipt.clone());
                Ok(Delivery {
                    message: entry.message.clone(),
                    message_id: entry.id.to_string(),
                    receipt,
                    delivery_count: entry.deliveries,
                })
            }
            None => Err(inner.entries.iter().map(|e| e.visible_at).min()),
        }
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn enqueue(
        &self,
        message: QueueMessage,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(QueueError::Closed);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push(Entry {
            id,
            message,
            visible_at: Instant::now() + delay.unwrap_or_default(),
            deliveries: 0,
            lease: None,
        });
        drop(inner);

        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        loop {
            let next_visible = {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(QueueError::Closed);
                }
                match self.try_lease(&mut inner, Instant::now()) {
                    Ok(delivery) => return Ok(delivery),
                    Err(next) => next,
                }
            };

            let wake_at = next_visible.unwrap_or_else(|| Instant::now() + IDLE_WAIT);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.entries.retain(|e| {
            !(e.id.to_string() == delivery.message_id
                && e.lease.as_deref() == Some(delivery.receipt.as_str()))
        });
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.inner.lock().await.entries.len())
    }

    async fn holds(&self, job_id: &str) -> Result<bool, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.iter().any(|e| e.message.job_id == job_id))
    }
}
