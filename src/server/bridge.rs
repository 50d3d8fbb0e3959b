//! Listener registration and event hand-off
//!
//! A [`Listener`] is either synchronous (a callback run on the session's
//! delivery task, which must not block) or asynchronous (a bounded inbox
//! drained by the subscriber's own task). Delivery never waits on the
//! subscriber. A full inbox overwrites its oldest pending event, the same
//! policy as the session queue, so a lagging subscriber still ends up with
//! the latest state; the inbox logs how many events it lost. A closed inbox
//! is reported as a [`DeliveryError`].
//!
//! Removing a listener flips its `active` flag, so events already sitting in
//! its inbox are discarded rather than handed to the subscriber.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use super::events::FileEvent;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered listener, used for de-duplication and removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Callback type for synchronous listeners
pub type SyncCallback = Arc<dyn Fn(&FileEvent) -> anyhow::Result<()> + Send + Sync>;

/// Why one listener did not receive one event
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("listener inbox is closed")]
    Closed,

    #[error("listener has no async runtime to receive events")]
    NoRuntime,

    #[error("listener callback failed: {0}")]
    Callback(String),

    #[error("listener callback panicked")]
    Panicked,
}

/// Where a listener's events go
#[derive(Clone)]
pub enum ListenerTarget {
    /// Invoked directly on the delivery task
    Sync(SyncCallback),
    /// Handed to the subscriber's task through a bounded inbox.
    /// `None` when the listener was built outside any runtime.
    Async(Option<broadcast::Sender<FileEvent>>),
}

impl std::fmt::Debug for ListenerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Sync"),
            Self::Async(Some(_)) => f.write_str("Async"),
            Self::Async(None) => f.write_str("Async(detached)"),
        }
    }
}

/// A subscriber registered with a watch session
#[derive(Debug, Clone)]
pub struct Listener {
    id: ListenerId,
    target: ListenerTarget,
    active: Arc<AtomicBool>,
}

impl Listener {
    fn with_target(target: ListenerTarget) -> Self {
        Self {
            id: ListenerId::next(),
            target,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Listener that runs `callback` for every event
    pub fn sync<F>(callback: F) -> Self
    where
        F: Fn(&FileEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_target(ListenerTarget::Sync(Arc::new(callback)))
    }

    /// Listener backed by a bounded inbox the caller drains
    pub fn channel(capacity: usize) -> (Self, ListenerInbox) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        let listener = Self::with_target(ListenerTarget::Async(Some(tx)));
        let inbox = ListenerInbox {
            rx,
            active: Arc::clone(&listener.active),
        };
        (listener, inbox)
    }

    /// Listener that runs an async `handler` per event on the current runtime.
    ///
    /// Events are processed one at a time, in order. When called outside a
    /// runtime the listener is still returned, but every delivery to it is
    /// skipped and logged as an error.
    pub fn spawn<F, Fut>(capacity: usize, handler: F) -> Self
    where
        F: Fn(FileEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::error!("[BRIDGE] No async runtime for listener, events will be skipped");
                return Self::with_target(ListenerTarget::Async(None));
            }
        };

        let (listener, mut inbox) = Self::channel(capacity);
        handle.spawn(async move {
            while let Some(event) = inbox.recv().await {
                handler(event).await;
            }
        });
        listener
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting events; pending inbox entries are discarded
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Hand one event to this listener without blocking.
    ///
    /// An inactive listener silently receives nothing.
    pub fn deliver(&self, event: &FileEvent) -> Result<(), DeliveryError> {
        if !self.is_active() {
            return Ok(());
        }

        match &self.target {
            ListenerTarget::Sync(callback) => {
                match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(DeliveryError::Callback(e.to_string())),
                    Err(_) => Err(DeliveryError::Panicked),
                }
            }
            ListenerTarget::Async(Some(tx)) => tx
                .send(event.clone())
                .map(|_| ())
                .map_err(|_| DeliveryError::Closed),
            ListenerTarget::Async(None) => Err(DeliveryError::NoRuntime),
        }
    }
}

/// Receiving end of a channel-backed listener
#[derive(Debug)]
pub struct ListenerInbox {
    rx: broadcast::Receiver<FileEvent>,
    active: Arc<AtomicBool>,
}

impl ListenerInbox {
    /// Next event, or `None` once the listener is removed or the session drops it
    ///
    /// Cancel safe, so it can sit in a `select!` loop.
    pub async fn recv(&mut self) -> Option<FileEvent> {
        loop {
            let received = self.rx.recv().await;
            if !self.active.load(Ordering::SeqCst) {
                return None;
            }
            match received {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "[BRIDGE] Listener inbox overflowed, dropped {} oldest events",
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
