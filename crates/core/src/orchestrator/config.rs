//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the job orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Page size used when a listing does not ask for one.
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,

    /// Largest page a listing may request. Larger limits are clamped.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,

    /// Maximum prompt length in characters, after trimming.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    /// How many times `cancel` re-reads and retries when the job changes
    /// between the read and the conditional write.
    #[serde(default = "default_cancel_retry_limit")]
    pub cancel_retry_limit: u32,
}

fn default_page_size() -> i64 {
    100
}

fn default_max_page_size() -> i64 {
    1000
}

fn default_max_prompt_chars() -> usize {
    2000
}

fn default_cancel_retry_limit() -> u32 {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            max_prompt_chars: default_max_prompt_chars(),
            cancel_retry_limit: default_cancel_retry_limit(),
        }
    }
}
