//! Remote object storage used to seed and back up workspaces
//!
//! The provisioner only needs three calls from a bucket store: list the
//! objects under a prefix, download one, upload one. [`ObjectStore`] is that
//! seam; [`GcsStore`] talks to Google Cloud Storage (or an emulator) and
//! [`LocalStore`] maps buckets onto a directory tree for development.

pub mod gcs;
pub mod local;

use async_trait::async_trait;
use thiserror::Error;

pub use gcs::GcsStore;
pub use local::LocalStore;

/// Errors raised by an object store backend
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid storage endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },

    #[error("Invalid object key: {key}")]
    InvalidKey { key: String },

    #[error("Failed to decode storage response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata for one listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key, including any prefix
    pub key: String,
    /// Object size in bytes (0 when the backend does not report it)
    pub size: u64,
}

impl ObjectInfo {
    /// Keys ending in `/` are folder placeholders, not content
    pub fn is_directory_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// Minimal bucket API consumed by the workspace provisioner
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object whose key starts with `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, StorageError>;

    /// Fetch the full contents of one object
    async fn download_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or overwrite one object
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
    ) -> Result<(), StorageError>;
}
