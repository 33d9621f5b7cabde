//! Mock generation provider for testing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::provider::{GeneratedArtifact, GenerationProvider, GenerationRequest, ProviderError};

type ScriptedResult = Result<GeneratedArtifact, ProviderError>;

/// Mock implementation of the GenerationProvider trait.
///
/// Provides controllable behavior for testing:
/// - Script a sequence of responses, one per call
/// - Fall back to a default response once the script runs out
/// - Simulate slow generations
/// - Record every request for assertions
///
/// # Example
///
/// ```rust,ignore
/// use mediagen_core::provider::ProviderError;
/// use mediagen_core::testing::MockProvider;
///
/// let provider = MockProvider::new();
/// provider.push_error(ProviderError::transient("rate limited")).await;
///
/// // First call fails, second returns the default PNG artifact.
/// ```
#[derive(Debug, Clone)]
pub struct MockProvider {
    script: Arc<RwLock<VecDeque<ScriptedResult>>>,
    default_response: Arc<RwLock<ScriptedResult>>,
    requests: Arc<RwLock<Vec<GenerationRequest>>>,
    delay: Arc<RwLock<Duration>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a mock that returns a small PNG for every call.
    pub fn new() -> Self {
        Self {
            script: Arc::new(RwLock::new(VecDeque::new())),
            default_response: Arc::new(RwLock::new(Ok(super::fixtures::png_artifact()))),
            requests: Arc::new(RwLock::new(Vec::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Create a mock whose every call fails with `error`.
    pub fn always_failing(error: ProviderError) -> Self {
        let mut provider = Self::new();
        provider.default_response = Arc::new(RwLock::new(Err(error)));
        provider
    }

    /// Queue a successful response for the next unscripted call.
    pub async fn push_artifact(&self, artifact: GeneratedArtifact) {
        self.script.write().await.push_back(Ok(artifact));
    }

    /// Queue an error for the next unscripted call.
    pub async fn push_error(&self, error: ProviderError) {
        self.script.write().await.push_back(Err(error));
    }

    /// Replace the response used once the script is exhausted.
    pub async fn set_default_response(&self, response: Result<GeneratedArtifact, ProviderError>) {
        *self.default_response.write().await = response;
    }

    /// Make every call take `delay` before answering.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Get all recorded requests.
    pub async fn recorded_requests(&self) -> Vec<GenerationRequest> {
        self.requests.read().await.clone()
    }

    /// Get the number of generate calls.
    pub async fn call_count(&self) -> usize {
        self.requests.read().await.len()
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedArtifact, ProviderError> {
        self.requests.write().await.push(request.clone());

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.write().await.pop_front();
        match scripted {
            Some(response) => response,
            None => self.default_response.read().await.clone(),
        }
    }
}
