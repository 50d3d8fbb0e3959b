//! Live file-change notification for workspaces
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     WatchSession                          │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  │
//! │  │   observer   │──>│ session queue│──>│   listeners  │  │
//! │  │   (thread)   │   │  (bounded)   │   │ Sync │ Async │  │
//! │  └──────────────┘   └──────────────┘   └──────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking Order
//!
//! 1. `WatchSession::observer` (Mutex)
//! 2. delivery gate (ReentrantMutex)
//! 3. listener list (RwLock)
//!
//! The listener list lock is never held while a listener runs.
//!
//! # Modules
//!
//! - `events` - `FileEvent` and raw event translation
//! - `bridge` - listener variants and non-blocking hand-off
//! - `watcher` - `WatchSession` lifecycle and delivery

pub mod bridge;
pub mod events;
pub mod watcher;

pub use bridge::{DeliveryError, Listener, ListenerId, ListenerInbox, ListenerTarget};
pub use events::{EventTranslator, FileEvent, FileEventKind};
pub use watcher::WatchSession;
