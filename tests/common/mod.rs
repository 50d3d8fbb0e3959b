//! Common test utilities for workspace-hub integration tests
//!
//! - `TestWorkspace` for creating workspace roots and seeding object stores
//! - Event helpers that wait with bounded timeouts

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use workspace_hub::config::{ProvisionerConfig, WatcherConfig};
use workspace_hub::server::{FileEvent, FileEventKind, ListenerInbox};
use workspace_hub::storage::LocalStore;
use workspace_hub::{WatchRegistry, WorkspaceProvisioner};

/// How long to wait for a filesystem event before failing
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Quiet period used to assert that nothing else arrives
pub const SETTLE: Duration = Duration::from_millis(500);

pub const BUCKET: &str = "test-bucket";

/// Temporary base directory plus an optional local object store
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(dir.path().join("workspaces")).expect("Failed to create base dir");
        fs::create_dir_all(dir.path().join("store")).expect("Failed to create store dir");
        Self { dir }
    }

    /// Directory holding per-user workspaces
    pub fn base_dir(&self) -> PathBuf {
        self.dir.path().join("workspaces")
    }

    /// Root of the local object store
    pub fn store_dir(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    /// Put an object in the local store under `key`
    pub fn seed_object(&self, key: &str, content: &str) -> &Self {
        let path = self.store_dir().join(BUCKET).join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&path, content).expect("Failed to write object");
        self
    }

    /// A fresh, canonical directory to watch directly
    pub fn root(&self, name: &str) -> PathBuf {
        let root = self.dir.path().join(name);
        fs::create_dir_all(&root).expect("Failed to create root");
        root.canonicalize().expect("Failed to canonicalize root")
    }

    pub fn provisioner(&self) -> Arc<WorkspaceProvisioner> {
        let config = ProvisionerConfig {
            base_dir: self.base_dir(),
            bucket: Some(BUCKET.to_string()),
            ..ProvisionerConfig::default()
        };
        Arc::new(WorkspaceProvisioner::new(
            config,
            Some(Arc::new(LocalStore::new(self.store_dir()))),
        ))
    }

    pub fn registry(&self) -> Arc<WatchRegistry> {
        Arc::new(WatchRegistry::new(
            self.provisioner(),
            WatcherConfig::default(),
        ))
    }
}

/// Write a file, creating parent directories
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dirs");
    }
    fs::write(path, content).expect("Failed to write file");
}

/// Wait for the first event matching `kind` and `path`, returning everything seen
pub async fn wait_for(
    inbox: &mut ListenerInbox,
    kind: FileEventKind,
    path: &str,
) -> Vec<FileEvent> {
    let mut seen = Vec::new();
    let found = tokio::time::timeout(EVENT_TIMEOUT, async {
        while let Some(event) = inbox.recv().await {
            let hit = event.kind == kind && event.path == path;
            seen.push(event);
            if hit {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    assert!(found, "no {} event for {:?}; saw {:?}", kind, path, seen);
    seen
}

/// Collect whatever arrives within `SETTLE`
pub async fn drain(inbox: &mut ListenerInbox) -> Vec<FileEvent> {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(SETTLE, async {
        while let Some(event) = inbox.recv().await {
            seen.push(event);
        }
    })
    .await;
    seen
}
