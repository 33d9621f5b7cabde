//! Queue message types and the transport trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from queue transports.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was closed; no further messages will be delivered.
    #[error("queue is closed")]
    Closed,

    /// Backing database failure.
    #[error("queue database error: {0}")]
    Database(String),

    /// A stored message could not be encoded or decoded.
    #[error("queue serialization error: {0}")]
    Serialization(String),
}

/// An execution message. Carries only the job id; everything else is read
/// from the job store at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: String,
}

impl QueueMessage {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
        }
    }
}

/// A leased message handed to a consumer.
///
/// The lease lasts for the transport's visibility timeout. A delivery that is
/// not acked before the lease expires becomes deliverable again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: QueueMessage,
    /// Transport-assigned message id.
    pub message_id: String,
    /// Lease token; an ack is honoured only while it matches the current lease.
    pub receipt: String,
    /// How many times this message has been handed out, including this one.
    pub delivery_count: u32,
}

/// Transport for execution messages with at-least-once delivery.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Publish a message, optionally hidden from consumers for `delay`.
    async fn enqueue(&self, message: QueueMessage, delay: Option<Duration>)
        -> Result<(), QueueError>;

    /// Wait for the next deliverable message and lease it.
    ///
    /// Must be cancel-safe: dropping the future before it resolves does not
    /// lose a message.
    async fn dequeue(&self) -> Result<Delivery, QueueError>;

    /// Remove a delivered message. Acks for an expired lease are ignored.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Number of messages held, delayed and in-flight included.
    async fn depth(&self) -> Result<usize, QueueError>;

    /// Whether a message for `job_id` is held, delayed and in-flight included.
    async fn holds(&self, job_id: &str) -> Result<bool, QueueError>;
}
