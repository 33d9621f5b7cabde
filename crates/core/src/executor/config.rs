//! Executor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the generation executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound for a single provider call (seconds).
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Upper bound for writing the artifact to storage (seconds).
    #[serde(default = "default_storage_timeout")]
    pub storage_timeout_secs: u64,

    /// Budget for the whole job, measured from the start of its first
    /// attempt (seconds). Exceeding it is terminal.
    #[serde(default = "default_global_timeout")]
    pub global_timeout_secs: u64,

    /// How often a running attempt checks the store for cancellation
    /// (milliseconds).
    #[serde(default = "default_cancel_poll_interval")]
    pub cancel_poll_interval_ms: u64,
}

fn default_attempt_timeout() -> u64 {
    300 // 5 minutes
}

fn default_storage_timeout() -> u64 {
    60
}

fn default_global_timeout() -> u64 {
    3600 // 1 hour
}

fn default_cancel_poll_interval() -> u64 {
    1000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout(),
            storage_timeout_secs: default_storage_timeout(),
            global_timeout_secs: default_global_timeout(),
            cancel_poll_interval_ms: default_cancel_poll_interval(),
        }
    }
}

impl ExecutorConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    /// Longest a live attempt goes without touching its job. A `running` job
    /// idle for longer has lost its worker.
    pub fn abandon_after(&self) -> Duration {
        self.attempt_timeout() + self.storage_timeout()
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_secs(self.global_timeout_secs)
    }

    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExecutorConfig::default();
        assert_eq!(config.attempt_timeout(), Duration::from_secs(300));
        assert_eq!(config.storage_timeout(), Duration::from_secs(60));
        assert_eq!(config.global_timeout(), Duration::from_secs(3600));
        assert_eq!(config.cancel_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.abandon_after(), Duration::from_secs(360));
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            attempt_timeout_secs = 30
        "#;
        let config: ExecutorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.attempt_timeout_secs, 30);
        assert_eq!(config.global_timeout_secs, 3600);
    }
}
