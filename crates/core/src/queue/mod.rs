//! Queue transport for execution messages.
//!
//! Delivery is at-least-once: a consumer leases a message, and if it is not
//! acked before the visibility timeout it is handed out again. The executor is
//! idempotent against duplicate deliveries, so consumers ack only after the
//! job's state has been durably written.

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;
pub use types::{Delivery, QueueError, QueueMessage, QueueTransport};
