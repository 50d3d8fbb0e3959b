//! Per-user workspace provisioning
//!
//! A workspace is `{base_dir}/{user_id}`. The first time a user shows up
//! (directory missing or empty) it is seeded from object storage: first the
//! user's own namespace, then the shared default namespace. A workspace that
//! already has content is returned as-is, without contacting storage, so
//! local edits are never overwritten by an older remote copy.
//!
//! # Remote layout
//!
//! ```text
//! gs://{bucket}/{namespace_prefix}/workspace_{user_id}/...   user snapshot
//! gs://{bucket}/{namespace_prefix}/workspace_default/...     seed template
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use parking_lot::Mutex;

use crate::config::ProvisionerConfig;
use crate::fs_utils::{is_dir_empty, relative_slash_path};
use crate::paths::{resolve_in_root, validate_user_id};
use crate::storage::{ObjectStore, StorageError};
use crate::{Result, WorkspaceError};

/// How a workspace came to be ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The directory already had content; storage was not contacted
    Existing,
    /// Seeded with this many files from the user's own namespace
    UserNamespace(usize),
    /// Seeded with this many files from the default namespace
    DefaultNamespace(usize),
    /// Nothing could be fetched (or no storage is configured)
    Empty,
}

/// A provisioned workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Canonical absolute path of the workspace root
    pub root: PathBuf,
    pub outcome: ProvisionOutcome,
}

/// Creates and seeds per-user workspace directories
pub struct WorkspaceProvisioner {
    config: ProvisionerConfig,
    store: Option<Arc<dyn ObjectStore>>,
    /// Serializes provisioning per user so concurrent first requests fetch once
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkspaceProvisioner {
    /// Create a provisioner; pass `None` as store to only manage local directories
    pub fn new(config: ProvisionerConfig, store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            config,
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Local directory for a user (not created, not canonicalized)
    pub fn workspace_dir(&self, user_id: &str) -> Result<PathBuf> {
        validate_user_id(user_id)?;
        Ok(self.config.base_dir.join(user_id))
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.user_locks
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Make sure the user's workspace exists, seeding it on first use.
    ///
    /// Idempotent: once the directory has content this is a local no-op.
    /// Failure to fetch remote content is not an error; the workspace is
    /// returned empty and a warning is logged.
    pub async fn ensure_workspace(&self, user_id: &str) -> Result<Workspace> {
        let dir = self.workspace_dir(user_id)?;
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        if dir.is_dir() && !is_dir_empty(&dir)? {
            tracing::debug!("[PROVISION] Reusing workspace for {} at {:?}", user_id, dir);
            return Ok(Workspace {
                root: dir.canonicalize()?,
                outcome: ProvisionOutcome::Existing,
            });
        }

        tokio::fs::create_dir_all(&dir).await?;
        let root = dir.canonicalize()?;
        let outcome = self.populate(user_id, &root).await;

        if let ProvisionOutcome::UserNamespace(n) | ProvisionOutcome::DefaultNamespace(n) = outcome
        {
            tracing::info!(
                "[PROVISION] Workspace for {} ready at {:?} ({} files, {:?})",
                user_id,
                root,
                n,
                outcome
            );
        }

        Ok(Workspace { root, outcome })
    }

    /// Try the user namespace, then the default namespace
    async fn populate(&self, user_id: &str, root: &Path) -> ProvisionOutcome {
        let (store, bucket) = match (&self.store, &self.config.bucket) {
            (Some(store), Some(bucket)) => (store.as_ref(), bucket.as_str()),
            _ => {
                tracing::debug!(
                    "[PROVISION] No object storage configured, {} starts empty",
                    user_id
                );
                return ProvisionOutcome::Empty;
            }
        };

        let user_ns = self.config.namespace_for(user_id);
        match download_namespace(store, bucket, &user_ns, root).await {
            Ok(n) if n > 0 => return ProvisionOutcome::UserNamespace(n),
            Ok(_) => {
                tracing::info!(
                    "[PROVISION] gs://{}/{} is empty, falling back to default workspace",
                    bucket,
                    user_ns
                );
            }
            Err(e) => {
                tracing::warn!(
                    "[PROVISION] Failed to fetch gs://{}/{}: {}, falling back to default workspace",
                    bucket,
                    user_ns,
                    e
                );
            }
        }

        let default_ns = self.config.namespace_for(&self.config.default_user);
        if default_ns == user_ns {
            tracing::warn!("[PROVISION] Workspace for {} left empty", user_id);
            return ProvisionOutcome::Empty;
        }

        match download_namespace(store, bucket, &default_ns, root).await {
            Ok(n) if n > 0 => ProvisionOutcome::DefaultNamespace(n),
            Ok(_) => {
                tracing::warn!(
                    "[PROVISION] Default workspace gs://{}/{} is empty, {} starts empty",
                    bucket,
                    default_ns,
                    user_id
                );
                ProvisionOutcome::Empty
            }
            Err(e) => {
                tracing::warn!(
                    "[PROVISION] Failed to fetch default workspace gs://{}/{}: {}, {} starts empty",
                    bucket,
                    default_ns,
                    e,
                    user_id
                );
                ProvisionOutcome::Empty
            }
        }
    }

    /// Upload every file in the user's workspace to their namespace.
    ///
    /// Additive: remote objects with no local counterpart are left alone.
    /// Returns the number of files uploaded.
    pub async fn save_workspace(&self, user_id: &str) -> Result<usize> {
        let dir = self.workspace_dir(user_id)?;
        let (store, bucket) = match (&self.store, &self.config.bucket) {
            (Some(store), Some(bucket)) => (store.clone(), bucket.clone()),
            _ => return Err(WorkspaceError::StorageNotConfigured),
        };
        if !dir.is_dir() {
            return Err(WorkspaceError::NotFound {
                path: dir.display().to_string(),
            });
        }

        let root = dir.canonicalize()?;
        let namespace = self.config.namespace_for(user_id);
        let files = tokio::task::spawn_blocking({
            let root = root.clone();
            move || list_workspace_files(&root)
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

        let mut uploaded = 0;
        for (path, rel) in files {
            let data = tokio::fs::read(&path).await?;
            let key = format!("{}{}", namespace, rel);
            store.upload_object(&bucket, &key, data).await?;
            tracing::debug!("[PROVISION] Uploaded {} -> gs://{}/{}", rel, bucket, key);
            uploaded += 1;
        }

        tracing::info!(
            "[PROVISION] Saved {} files for {} to gs://{}/{}",
            uploaded,
            user_id,
            bucket,
            namespace
        );
        Ok(uploaded)
    }
}

/// Regular files under `root` paired with their `/`-separated relative path
fn list_workspace_files(root: &Path) -> Vec<(PathBuf, String)> {
    let mut builder = WalkBuilder::new(root);
    // Every file is part of the workspace, hidden or ignored alike
    builder.standard_filters(false);
    builder.follow_links(false);

    let mut files = Vec::new();
    for entry in builder.build() {
        match entry {
            Ok(entry) => {
                if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }
                if let Some(rel) = relative_slash_path(root, entry.path()) {
                    files.push((entry.into_path(), rel));
                }
            }
            Err(e) => tracing::warn!("[PROVISION] Skipping unreadable entry: {}", e),
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    files
}

/// Download every object under `namespace` into `root`, stripping the prefix.
///
/// Returns the number of files written.
async fn download_namespace(
    store: &dyn ObjectStore,
    bucket: &str,
    namespace: &str,
    root: &Path,
) -> std::result::Result<usize, StorageError> {
    let objects = store.list_objects(bucket, namespace).await?;

    let mut written = 0;
    for object in objects {
        let Some(rel) = object.key.strip_prefix(namespace) else {
            continue;
        };
        if rel.is_empty() || object.is_directory_marker() {
            continue;
        }

        let local = match resolve_in_root(rel, root) {
            Ok(path) if path != root => path,
            Ok(_) | Err(_) => {
                tracing::warn!("[PROVISION] Skipping object outside workspace: {}", object.key);
                continue;
            }
        };

        let data = store.download_object(bucket, &object.key).await?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, data).await?;
        tracing::debug!("[PROVISION] Downloaded {} -> {:?}", object.key, local);
        written += 1;
    }

    Ok(written)
}
