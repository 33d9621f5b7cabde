//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the provider and storage
//! capabilities, so the whole engine can be exercised without a real
//! generation backend or object store.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediagen_core::testing::{MockProvider, MockStorage};
//!
//! let provider = MockProvider::new();
//! let storage = MockStorage::new();
//!
//! // Configure mock responses
//! provider.push_error(ProviderError::transient("rate limited")).await;
//! storage.set_next_error(StorageError::Unavailable("down".into())).await;
//! ```

mod mock_provider;
mod mock_storage;

pub use mock_provider::MockProvider;
pub use mock_storage::{MockStorage, StoredObject};

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::json;

    use crate::job::Parameters;
    use crate::orchestrator::SubmitRequest;
    use crate::provider::GeneratedArtifact;

    /// Smallest valid PNG signature plus a few bytes.
    pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];

    /// A small PNG artifact.
    pub fn png_artifact() -> GeneratedArtifact {
        GeneratedArtifact {
            bytes: PNG_BYTES.to_vec(),
            content_type: "image/png".to_string(),
        }
    }

    /// Parameters for a square image.
    pub fn square_parameters(size: u32) -> Parameters {
        let mut parameters = Parameters::new();
        parameters.insert("width".to_string(), json!(size));
        parameters.insert("height".to_string(), json!(size));
        parameters
    }

    /// The canonical "sunset" request: 512x512, no model.
    pub fn sunset_request() -> SubmitRequest {
        SubmitRequest {
            prompt: "sunset over the ocean".to_string(),
            parameters: square_parameters(512),
            model: None,
        }
    }

    /// A request with the given prompt and no parameters.
    pub fn submit_request(prompt: &str) -> SubmitRequest {
        SubmitRequest {
            prompt: prompt.to_string(),
            parameters: Parameters::new(),
            model: None,
        }
    }
}
