//! Mock artifact storage for testing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::storage::{extension_for_content_type, ArtifactStorage, StorageError};

/// A stored object held by [`MockStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Mock implementation of the ArtifactStorage trait.
///
/// Keeps artifacts in memory, can fail or stall the next write, and exposes
/// everything stored for assertions.
#[derive(Debug, Clone)]
pub struct MockStorage {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    /// If set, the next store will fail with this error.
    next_error: Arc<RwLock<Option<StorageError>>>,
    delay: Arc<RwLock<Duration>>,
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStorage {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            next_error: Arc::new(RwLock::new(None)),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Configure the next store to fail with the given error.
    pub async fn set_next_error(&self, error: StorageError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make every store take `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Get the number of stored objects.
    pub async fn stored_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Get a stored object by locator.
    pub async fn object(&self, locator: &str) -> Option<StoredObject> {
        self.objects.read().await.get(locator).cloned()
    }
}

#[async_trait]
impl ArtifactStorage for MockStorage {
    async fn store(&self, bytes: &[u8], content_type: &str) -> Result<String, StorageError> {
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let locator = format!(
            "mock-{}.{}",
            uuid::Uuid::new_v4(),
            extension_for_content_type(content_type)
        );
        self.objects.write().await.insert(
            locator.clone(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(locator)
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(locator)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StorageError::NotFound(locator.to_string()))
    }
}
