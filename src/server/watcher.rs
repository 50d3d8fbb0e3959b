//! Watch sessions: one recursive observer per workspace
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  std mpsc  ┌────────────────┐  broadcast  ┌───────────────┐
//! │   notify    │──────────> │ observer thread│───────────> │ delivery task │──> listeners
//! │   watcher   │            │ (translator)   │  (bounded)  │   (tokio)     │
//! └─────────────┘            └────────────────┘             └───────────────┘
//! ```
//!
//! The observer thread never waits on listeners. The session queue is a
//! bounded broadcast channel: when the delivery task falls behind, the
//! oldest events are overwritten and a warning is logged.
//!
//! # Delivery gate
//!
//! Each event is delivered to a snapshot of the listener list while holding
//! the session's delivery gate. `remove_listener` and `stop` take the same
//! gate, so once they return no further delivery can reach the removed
//! listener or the stopped session. The gate is reentrant so a synchronous
//! listener may remove itself (or stop the session) from its callback.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::JoinHandle;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::sync::broadcast;

use crate::config::WatcherConfig;
use crate::error::{Result, WorkspaceError};

use super::bridge::{Listener, ListenerId};
use super::events::{EventTranslator, FileEvent};

/// State shared between the session handle and its delivery task
struct Shared {
    listeners: RwLock<Vec<Listener>>,
    gate: ReentrantMutex<()>,
    /// Bumped by every `stop`; a delivery task only delivers for its own epoch
    epoch: AtomicU64,
}

impl Shared {
    fn dispatch(&self, epoch: u64, event: &FileEvent) {
        let _gate = self.gate.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }

        let snapshot: Vec<Listener> = self.listeners.read().clone();
        for listener in &snapshot {
            if let Err(e) = listener.deliver(event) {
                tracing::warn!(
                    "[WATCHER] Failed to deliver {} {} to {}: {}",
                    event.kind,
                    event.path,
                    listener.id(),
                    e
                );
            }
        }
    }
}

/// Resources owned while a session is running
struct Observer {
    /// Dropping the watcher ends the OS-level watch
    watcher: RecommendedWatcher,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    delivery: tokio::task::JoinHandle<()>,
}

/// Watches one workspace root and fans events out to listeners
pub struct WatchSession {
    root: PathBuf,
    config: WatcherConfig,
    shared: Arc<Shared>,
    observer: Mutex<Option<Observer>>,
}

impl WatchSession {
    /// Create a stopped session for `root`
    pub fn new(root: impl Into<PathBuf>, config: WatcherConfig) -> Self {
        Self {
            root: root.into(),
            config,
            shared: Arc::new(Shared {
                listeners: RwLock::new(Vec::new()),
                gate: ReentrantMutex::new(()),
                epoch: AtomicU64::new(0),
            }),
            observer: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Check if the session is observing its root
    pub fn is_running(&self) -> bool {
        self.observer.lock().is_some()
    }

    /// Start observing the root recursively.
    ///
    /// Must be called from within a tokio runtime, which hosts the delivery
    /// task. Starting a running session is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut observer = self.observer.lock();
        if observer.is_some() {
            tracing::debug!("[WATCHER] {:?} already running", self.root);
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WorkspaceError::NoRuntime)?;
        let start_error = |e: &dyn std::fmt::Display| WorkspaceError::ObserverStart {
            root: self.root.clone(),
            message: e.to_string(),
        };

        if !self.root.is_dir() {
            return Err(start_error(&"root is not a directory"));
        }

        let (raw_tx, raw_rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            // The receiver is gone once the observer thread exits
            let _ = raw_tx.send(res);
        })
        .map_err(|e| start_error(&e))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| start_error(&e))?;

        let (event_tx, mut event_rx) = broadcast::channel::<FileEvent>(self.config.event_capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));

        // Observer thread: raw notify events -> FileEvents on the session queue
        let thread_running = Arc::clone(&running);
        let poll_interval = self.config.poll_interval;
        let mut translator = EventTranslator::new(&self.root);
        let thread = std::thread::Builder::new()
            .name("workspace-watcher".to_string())
            .spawn(move || {
                let publish = |events: Vec<FileEvent>| {
                    for event in events {
                        tracing::debug!(
                            "[WATCHER] {} {} (dir: {})",
                            event.kind,
                            event.path,
                            event.is_directory
                        );
                        // No receiver only means the session is stopping
                        let _ = event_tx.send(event);
                    }
                };

                while thread_running.load(Ordering::SeqCst) {
                    match raw_rx.recv_timeout(poll_interval) {
                        Ok(Ok(event)) => publish(translator.translate(&event)),
                        Ok(Err(e)) => {
                            tracing::warn!("[WATCHER] Watch error: {}", e);
                        }
                        Err(RecvTimeoutError::Timeout) => publish(translator.flush()),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("[WATCHER] Observer thread exiting");
            })
            .map_err(|e| start_error(&e))?;

        // Delivery task: session queue -> listeners, in order
        let shared = Arc::clone(&self.shared);
        let epoch = shared.epoch.load(Ordering::SeqCst);
        let root = self.root.clone();
        let delivery = runtime.spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => shared.dispatch(epoch, &event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "[WATCHER] Event queue for {:?} overflowed, dropped {} oldest events",
                            root,
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        *observer = Some(Observer {
            watcher,
            running,
            thread: Some(thread),
            delivery,
        });
        tracing::info!("[WATCHER] Watching {:?}", self.root);
        Ok(())
    }

    /// Stop observing and wait for the observer thread to exit.
    ///
    /// Waits for an in-flight delivery to finish; nothing is delivered after
    /// this returns. Stopping a stopped session is a no-op.
    pub fn stop(&self) {
        let Some(mut observer) = self.observer.lock().take() else {
            tracing::debug!("[WATCHER] {:?} not running", self.root);
            return;
        };

        observer.running.store(false, Ordering::SeqCst);
        {
            let _gate = self.shared.gate.lock();
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        }

        drop(observer.watcher);
        if let Some(thread) = observer.thread.take() {
            if thread.join().is_err() {
                tracing::error!("[WATCHER] Observer thread for {:?} panicked", self.root);
            }
        }
        observer.delivery.abort();
        tracing::info!("[WATCHER] Stopped watching {:?}", self.root);
    }

    /// Register a listener. Adding the same listener twice is a no-op.
    pub fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = listener.id();
        let mut listeners = self.shared.listeners.write();
        if !listeners.iter().any(|l| l.id() == id) {
            listeners.push(listener);
            tracing::debug!(
                "[WATCHER] Added {} to {:?} ({} listeners)",
                id,
                self.root,
                listeners.len()
            );
        }
        id
    }

    /// Unregister a listener.
    ///
    /// Returns once any delivery in progress has finished; the listener
    /// receives nothing afterwards, including events queued in its inbox.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = {
            let mut listeners = self.shared.listeners.write();
            listeners
                .iter()
                .position(|l| l.id() == id)
                .map(|idx| listeners.remove(idx))
        };

        match removed {
            Some(listener) => {
                listener.deactivate();
                drop(self.shared.gate.lock());
                tracing::debug!("[WATCHER] Removed {} from {:?}", id, self.root);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("root", &self.root)
            .field("running", &self.is_running())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
