//! Directory-backed object store
//!
//! Maps `bucket/key` onto `{root}/{bucket}/{key}`. Handy for running the
//! daemon without cloud credentials and for tests.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::{ObjectInfo, ObjectStore, StorageError};
use crate::fs_utils::relative_slash_path;

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root` (created lazily on first upload)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a bucket/key pair to a file path, rejecting keys that would leave the bucket
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let bucket_dir = self.bucket_dir(bucket)?;
        let key_path = Path::new(key);
        let only_normal = key_path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !only_normal {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(bucket_dir.join(key_path))
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == ".." || bucket == "." {
            return Err(StorageError::InvalidKey {
                key: bucket.to_string(),
            });
        }
        Ok(self.root.join(bucket))
    }
}

/// Recursively collect files under `dir` as keys relative to `bucket_dir`
fn collect_keys(
    bucket_dir: &Path,
    dir: &Path,
    prefix: &str,
    out: &mut Vec<ObjectInfo>,
) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_keys(bucket_dir, &path, prefix, out)?;
        } else if file_type.is_file() {
            if let Some(key) = relative_slash_path(bucket_dir, &path) {
                if key.starts_with(prefix) {
                    out.push(ObjectInfo {
                        key,
                        size: entry.metadata()?.len(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, StorageError> {
        let bucket_dir = self.bucket_dir(bucket)?;
        let prefix = prefix.to_string();
        let mut objects = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            collect_keys(&bucket_dir, &bucket_dir, &prefix, &mut out).map(|_| out)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))??;

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn download_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        Ok(tokio::fs::read(path).await?)
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }
}
