//! Reconciliation sweep configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the periodic reconciliation sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Whether the worker runs the sweep at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Time between sweeps (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// A pending job whose message should have been delivered this long ago
    /// is considered orphaned and re-enqueued (seconds). Jobs whose message
    /// the queue still holds are left to it.
    #[serde(default = "default_pending_grace")]
    pub pending_grace_secs: u64,

    /// A running job not updated for this long is failed (seconds).
    /// Must exceed the attempt and storage timeouts combined.
    #[serde(default = "default_stale_running")]
    pub stale_running_secs: u64,

    /// Purge completed and cancelled jobs older than this many days.
    /// Unset keeps them forever.
    #[serde(default)]
    pub retention_days: Option<u32>,

    /// Maximum jobs handled per category in one sweep.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

fn default_pending_grace() -> u64 {
    300 // 5 minutes
}

fn default_stale_running() -> u64 {
    900 // 15 minutes
}

fn default_batch_size() -> i64 {
    100
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval(),
            pending_grace_secs: default_pending_grace(),
            stale_running_secs: default_stale_running(),
            retention_days: None,
            batch_size: default_batch_size(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn pending_grace(&self) -> Duration {
        Duration::from_secs(self.pending_grace_secs)
    }

    pub fn stale_running(&self) -> Duration {
        Duration::from_secs(self.stale_running_secs)
    }
}
