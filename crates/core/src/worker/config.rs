//! Worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of deliveries processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Pause after a transport error before dequeuing again (milliseconds).
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_error_backoff() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            error_backoff_ms: default_error_backoff(),
        }
    }
}

impl WorkerConfig {
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}
