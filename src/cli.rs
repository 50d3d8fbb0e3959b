//! CLI argument definitions using clap
//!
//! Both binaries share [`StorageArgs`]; every flag falls back to an
//! environment variable so containers can be configured without arguments.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{FileApiConfig, ProvisionerConfig, WatcherConfig, DEFAULT_MAX_FILE_SIZE};
use crate::storage::gcs::{GcsAuth, DEFAULT_GCS_ENDPOINT};
use crate::storage::{GcsStore, LocalStore, ObjectStore};
use crate::workspace::WorkspaceProvisioner;
use crate::Result;

/// Bucket name used with `--local-store` when no bucket is given
const LOCAL_BUCKET: &str = "local";

/// Operator commands for per-user workspaces
#[derive(Parser, Debug)]
#[command(name = "workspace-hub")]
#[command(about = "Provision, back up and inspect per-user workspaces")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a user's workspace, seeding it from object storage on first use
    Provision(UserArgs),

    /// Upload a user's workspace to object storage
    Save(UserArgs),

    /// Resolve a client path inside a workspace root, rejecting traversal
    Resolve(ResolveArgs),
}

/// Arguments for commands acting on one user
#[derive(Args, Debug)]
pub struct UserArgs {
    /// User identifier (letters, digits, `-` and `_`)
    #[arg(short, long)]
    pub user: String,

    #[command(flatten)]
    pub storage: StorageArgs,
}

/// Arguments for `resolve`
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Workspace root
    #[arg(long)]
    pub root: PathBuf,

    /// Client-supplied relative path
    pub path: String,
}

/// Where workspaces live and where they are backed up
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Directory holding one workspace per user
    #[arg(long, env = "WATCH_DIR", default_value = "/app/workspace")]
    pub base_dir: PathBuf,

    /// Bucket with workspace snapshots (remote seeding is off without it)
    #[arg(long, env = "GCS_BUCKET")]
    pub bucket: Option<String>,

    /// Key prefix for `workspace_{user}` namespaces
    #[arg(long, env = "GCS_WORKSPACE_PREFIX", default_value = "workspaces")]
    pub namespace_prefix: String,

    /// GCS JSON API endpoint
    #[arg(long, env = "GCS_ENDPOINT", default_value = DEFAULT_GCS_ENDPOINT)]
    pub gcs_endpoint: String,

    /// Fixed OAuth bearer token for GCS (expires after about an hour)
    #[arg(long, env = "GCS_ACCESS_TOKEN", hide_env_values = true)]
    pub gcs_token: Option<String>,

    /// Fetch and refresh GCS tokens from the compute metadata server
    #[arg(long, env = "GCS_METADATA_AUTH", conflicts_with = "gcs_token")]
    pub gcs_metadata_auth: bool,

    /// Use a local directory as the object store instead of GCS
    #[arg(long, env = "LOCAL_STORE_DIR")]
    pub local_store: Option<PathBuf>,
}

impl StorageArgs {
    fn effective_bucket(&self) -> Option<String> {
        self.bucket.clone().or_else(|| {
            self.local_store
                .as_ref()
                .map(|_| LOCAL_BUCKET.to_string())
        })
    }

    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            base_dir: self.base_dir.clone(),
            bucket: self.effective_bucket(),
            namespace_prefix: self.namespace_prefix.clone(),
            ..ProvisionerConfig::default()
        }
    }

    fn gcs_auth(&self) -> Result<GcsAuth> {
        Ok(match (&self.gcs_token, self.gcs_metadata_auth) {
            (Some(token), _) => GcsAuth::Static(token.clone()),
            (None, true) => GcsAuth::metadata()?,
            (None, false) => GcsAuth::Anonymous,
        })
    }

    /// Build the configured object store, if any
    pub fn object_store(&self) -> Result<Option<Arc<dyn ObjectStore>>> {
        if let Some(dir) = &self.local_store {
            return Ok(Some(Arc::new(LocalStore::new(dir))));
        }
        if self.bucket.is_some() {
            let store = GcsStore::new(&self.gcs_endpoint, self.gcs_auth()?)?;
            return Ok(Some(Arc::new(store)));
        }
        Ok(None)
    }

    pub fn provisioner(&self) -> Result<WorkspaceProvisioner> {
        Ok(WorkspaceProvisioner::new(
            self.provisioner_config(),
            self.object_store()?,
        ))
    }
}

/// Workspace socket server daemon
#[derive(Parser, Debug)]
#[command(name = "workspace-hub-daemon")]
#[command(about = "Serve per-user workspaces with live file-change events over WebSocket")]
#[command(version)]
pub struct DaemonArgs {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8124")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Largest file `read_file` returns, in bytes
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    pub max_file_size: u64,

    /// Per-session event queue capacity
    #[arg(long, default_value = "256")]
    pub event_capacity: usize,

    /// Observer shutdown poll interval in milliseconds
    #[arg(long, default_value = "100")]
    pub poll_interval_ms: u64,

    #[command(flatten)]
    pub storage: StorageArgs,
}

impl DaemonArgs {
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            event_capacity: self.event_capacity,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..WatcherConfig::default()
        }
    }

    pub fn file_config(&self) -> FileApiConfig {
        FileApiConfig {
            max_file_size: self.max_file_size,
        }
    }
}
