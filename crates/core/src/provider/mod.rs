//! Generation provider capability.
//!
//! A provider turns a prompt and parameters into artifact bytes. Failures are
//! classified by the provider itself as transient (worth retrying) or
//! permanent (the request will never succeed).

mod config;
mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::Parameters;

pub use config::ProviderConfig;
pub use http::HttpProvider;

/// Errors from generation providers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Rate limits, timeouts, 5xx responses, connection failures.
    #[error("transient provider error: {reason}")]
    Transient { reason: String },

    /// Invalid input, content policy rejections, other 4xx responses.
    #[error("provider rejected the request: {reason}")]
    Permanent { reason: String },
}

impl ProviderError {
    pub fn transient(reason: impl Into<String>) -> Self {
        ProviderError::Transient {
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        ProviderError::Permanent {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            ProviderError::Transient { reason } | ProviderError::Permanent { reason } => reason,
        }
    }
}

/// Input for a single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub job_id: String,
    pub prompt: String,
    pub parameters: Parameters,
    pub model: Option<String>,
}

/// Bytes produced by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// A media generation backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the name of this provider implementation.
    fn name(&self) -> &str;

    /// Generate an artifact for the request.
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GeneratedArtifact, ProviderError>;
}
