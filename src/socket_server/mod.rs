//! Workspace Socket Server
//!
//! A standalone daemon that gives every connected user a live view of their
//! workspace: file events are pushed as they happen and file operations are
//! answered over the same WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  WORKSPACE SOCKET SERVER (workspace-hub-daemon)         │
//! │                     Single daemon, multi-user, multi-client             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 WatchRegistry (tokio Mutex)                      │   │
//! │  │                                                                  │   │
//! │  │  alice ──► WatchSession { root, observer, listeners }            │   │
//! │  │  bob   ──► WatchSession { ... }                                  │   │
//! │  │                                                                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  WebSocket Server ──► ConnectionState per client                        │
//! │    - x-user-id handshake header                                         │
//! │    - one listener per connection                                        │
//! │    - file queries                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! All structured messages are JSON over WebSocket:
//!
//! ```json
//! // Client -> Server
//! "ping"
//! {"type": "query", "id": 1, "method": "list_files", "params": {"path": ""}}
//!
//! // Server -> Client
//! "pong"
//! {"type": "connected", "client_id": "...", "user_id": "alice", "root": "..."}
//! {"type": "response", "id": 1, "result": {...}}
//! {"event": "created", "path": "docs/a.md", "is_directory": false}
//! ```

pub mod connection;
pub mod files;
pub mod protocol;
pub mod registry;

pub use connection::{handle_connection, user_id_from_header, USER_ID_HEADER};
pub use files::WorkspaceFiles;
pub use protocol::{ClientMessage, ConnectionInfo, ServerMessage};
pub use registry::{RegistryStats, ShutdownReport, WatchRegistry};
