//! workspace-hub: per-user workspaces with live file-change notifications
//!
//! Each user gets an isolated directory, seeded from object storage the
//! first time they show up. A watch session observes that directory and
//! pushes every create, modify, delete and move to the user's connected
//! clients.
//!
//! # Components
//!
//! - [`paths`] - resolve client paths without escaping the workspace
//! - [`workspace`] - provision and back up workspaces
//! - [`storage`] - object storage backends (GCS, local directory)
//! - [`server`] - watch sessions, listeners and file events
//! - [`socket_server`] - registry and WebSocket transport
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use workspace_hub::config::{ProvisionerConfig, WatcherConfig};
//! use workspace_hub::server::Listener;
//! use workspace_hub::socket_server::WatchRegistry;
//! use workspace_hub::WorkspaceProvisioner;
//!
//! # async fn demo() -> workspace_hub::Result<()> {
//! let provisioner = Arc::new(WorkspaceProvisioner::new(ProvisionerConfig::default(), None));
//! let registry = WatchRegistry::new(provisioner, WatcherConfig::default());
//!
//! let session = registry.get_or_create("alice").await?;
//! let (listener, mut inbox) = Listener::channel(64);
//! let id = session.add_listener(listener);
//! while let Some(event) = inbox.recv().await {
//!     println!("{} {}", event.kind, event.path);
//! }
//! session.remove_listener(id);
//! registry.shutdown_all().await;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod fs_utils;
pub mod paths;
pub mod server;
pub mod socket_server;
pub mod storage;
pub mod workspace;

// Re-export commonly used types
pub use error::{Result, WorkspaceError};
pub use paths::{resolve_in_root, validate_user_id, DEFAULT_USER_ID};
pub use server::{FileEvent, FileEventKind, Listener, ListenerId, WatchSession};
pub use socket_server::WatchRegistry;
pub use workspace::{ProvisionOutcome, Workspace, WorkspaceProvisioner};
