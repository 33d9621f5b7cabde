use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::ExecutorConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::provider::ProviderConfig;
use crate::retry::RetryConfig;
use crate::sweep::SweepConfig;
use crate::worker::WorkerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Generation backend. Required by the worker.
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    /// Textfile metrics export. Disabled when absent.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mediagen.db")
}

/// Available queue transports
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Durable table in the job database, shared across processes.
    #[default]
    Sqlite,
    /// In-process only; messages are lost on restart.
    Memory,
}

/// Queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    /// How long a dequeued message stays invisible before redelivery.
    /// Must exceed the attempt and storage timeouts combined.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    /// Poll interval of the SQLite transport when the queue is empty.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            visibility_timeout_secs: default_visibility_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_visibility_timeout() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    500
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("artifacts")
}

/// Metrics export configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// File the Prometheus text exposition is written to, for a node
    /// exporter textfile collector.
    pub textfile_path: PathBuf,
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    15
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub executor: ExecutorConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub sweep: SweepConfig,
    pub storage: StorageConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<SanitizedProviderConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

/// Sanitized provider config (API token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProviderConfig {
    pub endpoint: String,
    pub api_token_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            database: config.database.clone(),
            retry: config.retry.clone(),
            executor: config.executor.clone(),
            queue: config.queue.clone(),
            worker: config.worker.clone(),
            sweep: config.sweep.clone(),
            storage: config.storage.clone(),
            provider: config.provider.as_ref().map(|p| SanitizedProviderConfig {
                endpoint: p.endpoint.clone(),
                api_token_configured: p.api_token.as_deref().is_some_and(|t| !t.is_empty()),
                default_model: p.default_model.clone(),
                timeout_secs: p.timeout_secs,
            }),
            metrics: config.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "mediagen.db");
        assert_eq!(config.queue.backend, QueueBackend::Sqlite);
        assert_eq!(config.queue.visibility_timeout_secs, 600);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.storage.root.to_str().unwrap(), "artifacts");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.provider.is_none());
        assert!(config.metrics.is_none());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[database]
path = "/data/jobs.db"

[retry]
max_attempts = 5
base_delay_ms = 500

[executor]
attempt_timeout_secs = 60

[queue]
backend = "memory"
visibility_timeout_secs = 300

[worker]
concurrency = 8

[sweep]
enabled = false

[storage]
root = "/data/artifacts"

[provider]
endpoint = "http://localhost:9000/generate"
api_token = "secret-token"

[metrics]
textfile_path = "/var/lib/node_exporter/mediagen.prom"

[logging]
format = "json"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "/data/jobs.db");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 600_000); // default
        assert_eq!(config.executor.attempt_timeout_secs, 60);
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.worker.concurrency, 8);
        assert!(!config.sweep.enabled);
        assert_eq!(config.storage.root.to_str().unwrap(), "/data/artifacts");
        assert_eq!(config.logging.format, LogFormat::Json);

        let metrics = config.metrics.as_ref().unwrap();
        assert_eq!(metrics.interval_secs, 15);

        let provider = config.provider.as_ref().unwrap();
        assert_eq!(provider.api_token.as_deref(), Some("secret-token"));
    }

    #[test]
    fn test_unknown_queue_backend_fails() {
        let toml = r#"
[queue]
backend = "kafka"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_sanitized_config_hides_token() {
        let config = Config {
            provider: Some(ProviderConfig {
                endpoint: "http://localhost:9000/generate".to_string(),
                api_token: Some("secret-token".to_string()),
                default_model: None,
                timeout_secs: 30,
            }),
            ..Default::default()
        };

        let sanitized = SanitizedConfig::from(&config);
        let provider = sanitized.provider.as_ref().unwrap();
        assert_eq!(provider.endpoint, "http://localhost:9000/generate");
        assert!(provider.api_token_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret-token"));
    }

    #[test]
    fn test_sanitized_config_without_provider() {
        let sanitized = SanitizedConfig::from(&Config::default());
        assert!(sanitized.provider.is_none());
        assert_eq!(sanitized.database.path.to_str().unwrap(), "mediagen.db");
    }
}
