//! Filesystem artifact storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use super::{extension_for_content_type, ArtifactStorage, StorageError};

/// Content-addressed artifact storage under a root directory.
///
/// Artifacts are written as `<sha256>.<ext>`; storing the same bytes twice
/// yields the same locator.
#[derive(Debug, Clone)]
pub struct FsArtifactStorage {
    root: PathBuf,
}

impl FsArtifactStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a locator to a path inside the root, rejecting anything else.
    fn resolve(&self, locator: &str) -> Result<PathBuf, StorageError> {
        let valid = !locator.is_empty()
            && !locator.starts_with('.')
            && !locator.contains("..")
            && locator
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');

        if !valid {
            return Err(StorageError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(locator))
    }
}

#[async_trait]
impl ArtifactStorage for FsArtifactStorage {
    async fn store(&self, bytes: &[u8], content_type: &str) -> Result<String, StorageError> {
        let digest = Sha256::digest(bytes);
        let hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        let locator = format!("{}.{}", hash, extension_for_content_type(content_type));

        fs::create_dir_all(&self.root).await?;

        let final_path = self.root.join(&locator);
        if fs::try_exists(&final_path).await? {
            debug!(locator = %locator, "Artifact already stored");
            return Ok(locator);
        }

        // Write to a temp name first so readers never see a partial file.
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", locator, uuid::Uuid::new_v4()));
        fs::write(&temp_path, bytes).await?;
        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(locator = %locator, size = bytes.len(), "Stored artifact");
        Ok(locator)
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(locator)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(locator.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (TempDir, FsArtifactStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FsArtifactStorage::new(temp_dir.path().join("artifacts"));
        (temp_dir, storage)
    }

    #[tokio::test]
    async fn test_store_and_fetch() {
        let (_temp, storage) = create_test_storage();
        let locator = storage.store(b"fake png", "image/png").await.unwrap();

        assert!(locator.ends_with(".png"));
        assert_eq!(locator.len(), 64 + 4);
        assert_eq!(storage.fetch(&locator).await.unwrap(), b"fake png");
    }

    #[tokio::test]
    async fn test_same_bytes_same_locator() {
        let (_temp, storage) = create_test_storage();
        let a = storage.store(b"frame", "video/mp4").await.unwrap();
        let b = storage.store(b"frame", "video/mp4").await.unwrap();
        assert_eq!(a, b);
        assert!(a.ends_with(".mp4"));

        let entries: Vec<_> = std::fs::read_dir(storage.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let (_temp, storage) = create_test_storage();
        let locator = format!("{}.png", "0".repeat(64));
        assert!(matches!(
            storage.fetch(&locator).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let (_temp, storage) = create_test_storage();
        for locator in ["../secret", "/etc/passwd", "a/b.png", "", ".hidden"] {
            assert!(
                matches!(
                    storage.fetch(locator).await,
                    Err(StorageError::InvalidLocator(_))
                ),
                "locator {:?} should be rejected",
                locator
            );
        }
    }
}
