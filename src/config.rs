//! Runtime configuration structs
//!
//! Binaries fill these from clap arguments (each with an environment
//! variable fallback); library code and tests use the `Default` impls.

use std::path::PathBuf;
use std::time::Duration;

use crate::paths::DEFAULT_USER_ID;

/// Default maximum size of a file returned by `read_file` (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Configuration for a watch session
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Capacity of the per-session event queue. When a slow consumer lets it
    /// fill up, the oldest events are dropped and a warning is logged.
    pub event_capacity: usize,
    /// How often the observer thread wakes to check for shutdown
    pub poll_interval: Duration,
    /// Capacity of each channel-backed listener's inbox
    pub listener_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            poll_interval: Duration::from_millis(100),
            listener_capacity: 256,
        }
    }
}

/// Where workspaces live locally and where they are mirrored remotely
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Local directory holding one subdirectory per user
    pub base_dir: PathBuf,
    /// Bucket holding workspace snapshots (`None` disables remote fetch/save)
    pub bucket: Option<String>,
    /// Key prefix under which `workspace_{user}` namespaces live
    pub namespace_prefix: String,
    /// User whose namespace seeds workspaces with no remote content
    pub default_user: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/app/workspace"),
            bucket: None,
            namespace_prefix: "workspaces".to_string(),
            default_user: DEFAULT_USER_ID.to_string(),
        }
    }
}

impl ProvisionerConfig {
    /// Remote key prefix for a user's workspace, always ending in `/`
    pub fn namespace_for(&self, user_id: &str) -> String {
        let prefix = self.namespace_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("workspace_{}/", user_id)
        } else {
            format!("{}/workspace_{}/", prefix, user_id)
        }
    }
}

/// Limits for the file operations exposed over the socket
#[derive(Debug, Clone)]
pub struct FileApiConfig {
    /// Largest file `read_file` will return
    pub max_file_size: u64,
}

impl Default for FileApiConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}
