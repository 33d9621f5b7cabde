//! Artifact storage capability.

mod fs;

use async_trait::async_trait;
use thiserror::Error;

pub use fs::FsArtifactStorage;

/// Errors from artifact storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No artifact exists under this locator.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// The locator is malformed or points outside the storage.
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// I/O error while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend temporarily unreachable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StorageError::InvalidLocator(_))
    }
}

/// Stores generated artifacts and hands back opaque locators.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Persist `bytes` and return the locator to fetch them with.
    async fn store(&self, bytes: &[u8], content_type: &str) -> Result<String, StorageError>;

    /// Read back a stored artifact.
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, StorageError>;
}

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("video/mp4", "mp4"),
    ("video/avi", "avi"),
];

/// Default content type when nothing better is known.
pub const DEFAULT_CONTENT_TYPE: &str = "image/png";

/// File extension for a MIME type. Unknown types map to `png`.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(ct, _)| *ct == essence)
        .map(|(_, ext)| *ext)
        .unwrap_or("png")
}

/// MIME type inferred from the extension at the end of a path or URL.
pub fn content_type_for_path(path: &str) -> Option<&'static str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpeg" | "jpg" => Some("image/jpeg"),
        other => CONTENT_TYPES
            .iter()
            .find(|(_, e)| *e == other)
            .map(|(ct, _)| *ct),
    }
}
