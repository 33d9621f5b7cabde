//! Durable queue transport on a SQLite table.
//!
//! Producers and consumers may live in different processes as long as they
//! open the same database file. Leasing is a compare-and-swap on `visible_at`
//! inside an immediate transaction, so two consumers never hold the same
//! message at once.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::{Delivery, QueueError, QueueMessage, QueueTransport};
use crate::job::{chrono_duration, format_ts};

fn db_err(e: rusqlite::Error) -> QueueError {
    QueueError::Database(e.to_string())
}

/// SQLite-backed queue with polling consumers.
pub struct SqliteQueue {
    conn: Mutex<Connection>,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl SqliteQueue {
    /// Open (or create) the queue table in the database at `path`.
    pub fn new(
        path: &Path,
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, QueueError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            visibility_timeout,
            poll_interval,
        })
    }

    /// Create an in-memory queue (useful for testing).
    pub fn in_memory(
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            visibility_timeout,
            poll_interval,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                visible_at TEXT NOT NULL,
                deliveries INTEGER NOT NULL DEFAULT 0,
                lease_token TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_queue_messages_visible_at
                ON queue_messages(visible_at, id);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn
            .lock()
            .map_err(|_| QueueError::Database("connection lock poisoned".to_string()))
    }

    fn try_lease(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let now = Utc::now();
        let now_ts = format_ts(&now);

        let row: Option<(i64, String, u32)> = tx
            .query_row(
                "SELECT id, payload, deliveries FROM queue_messages \
                 WHERE visible_at <= ?1 ORDER BY visible_at, id LIMIT 1",
                params![now_ts],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err)?;

        let Some((id, payload, deliveries)) = row else {
            return Ok(None);
        };

        let receipt = uuid::Uuid::new_v4().to_string();
        let leased_until = format_ts(&(now + chrono_duration(self.visibility_timeout)));
        let written = tx
            .execute(
                "UPDATE queue_messages SET visible_at = ?1, deliveries = deliveries + 1, \
                 lease_token = ?2 WHERE id = ?3 AND visible_at <= ?4",
                params![leased_until, receipt, id, now_ts],
            )
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        if written == 0 {
            return Ok(None);
        }

        let message: QueueMessage = serde_json::from_str(&payload)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        Ok(Some(Delivery {
            message,
            message_id: id.to_string(),
            receipt,
            delivery_count: deliveries + 1,
        }))
    }
}

#[async_trait]
impl QueueTransport for SqliteQueue {
    async fn enqueue(
        &self,
        message: QueueMessage,
        delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        let payload =
            serde_json::to_string(&message).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let now = Utc::now();
        let visible_at = now + chrono_duration(delay.unwrap_or_default());

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO queue_messages (payload, enqueued_at, visible_at) VALUES (?1, ?2, ?3)",
            params![payload, format_ts(&now), format_ts(&visible_at)],
        )
        .map_err(db_err)?;

        debug!(job_id = %message.job_id, delay_ms = delay.map(|d| d.as_millis() as u64), "Enqueued message");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        loop {
            if let Some(delivery) = self.try_lease()? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let id: i64 = delivery
            .message_id
            .parse()
            .map_err(|_| QueueError::Database(format!("invalid message id: {}", delivery.message_id)))?;

        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM queue_messages WHERE id = ?1 AND lease_token = ?2",
            params![id, delivery.receipt],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM queue_messages", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count.max(0) as usize)
    }

    async fn holds(&self, job_id: &str) -> Result<bool, QueueError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM queue_messages WHERE json_extract(payload, '$.job_id') = ?1)",
            params![job_id],
            |row| row.get(0),
        )
        .map_err(db_err)
    }
}
