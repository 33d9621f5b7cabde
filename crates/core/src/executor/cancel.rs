//! In-process cancellation notifications.

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcasts the ids of cancelled jobs to executors in the same process.
///
/// Executors in other processes see cancellations by polling the store; the
/// hub only makes the in-process case immediate.
#[derive(Debug, Clone)]
pub struct CancellationHub {
    tx: broadcast::Sender<String>,
}

impl Default for CancellationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Announce that `job_id` was cancelled.
    pub fn notify(&self, job_id: &str) {
        // No subscribers just means no attempt is running here.
        let _ = self.tx.send(job_id.to_string());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

/// Wait until the hub reports `job_id`, or until messages were dropped and
/// the caller should re-check the store.
pub(crate) async fn signalled(rx: &mut Option<broadcast::Receiver<String>>, job_id: &str) {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };

    loop {
        match receiver.recv().await {
            Ok(id) if id == job_id => return,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => {
                *rx = None;
                return std::future::pending().await;
            }
        }
    }
}
