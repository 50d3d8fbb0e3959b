//! Per-user watch session registry
//!
//! Maps each user id to one running [`WatchSession`]. The map holds a
//! per-user slot that is claimed under the map lock; provisioning and
//! starting then happen inside the slot, so concurrent first requests for
//! the same user share one session while other users are never held up by
//! a slow remote fetch. Sessions live until [`WatchRegistry::shutdown_all`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::config::WatcherConfig;
use crate::error::Result;
use crate::paths::validate_user_id;
use crate::server::WatchSession;
use crate::workspace::WorkspaceProvisioner;

/// How long `shutdown_all` waits for one session to stop
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// A user's session, filled in once provisioning and start succeed
type SessionSlot = Arc<OnceCell<Arc<WatchSession>>>;

/// Global registry of watch sessions, keyed by user id
pub struct WatchRegistry {
    sessions: Mutex<HashMap<String, SessionSlot>>,
    provisioner: Arc<WorkspaceProvisioner>,
    config: WatcherConfig,
}

impl WatchRegistry {
    pub fn new(provisioner: Arc<WorkspaceProvisioner>, config: WatcherConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            provisioner,
            config,
        }
    }

    pub fn provisioner(&self) -> &Arc<WorkspaceProvisioner> {
        &self.provisioner
    }

    /// Get the user's session, provisioning and starting it on first use.
    ///
    /// Provisioning and observer start failures are returned and nothing is
    /// registered, so a later call retries.
    pub async fn get_or_create(&self, user_id: &str) -> Result<Arc<WatchSession>> {
        validate_user_id(user_id)?;

        let slot = {
            let mut sessions = self.sessions.lock();
            Arc::clone(sessions.entry(user_id.to_string()).or_default())
        };

        if let Some(session) = slot.get() {
            tracing::debug!("[REGISTRY] Reusing watch session for {}", user_id);
            return Ok(Arc::clone(session));
        }

        let created = slot
            .get_or_try_init(|| async {
                tracing::info!("[REGISTRY] Creating watch session for {}", user_id);
                let workspace = self.provisioner.ensure_workspace(user_id).await?;
                let session = Arc::new(WatchSession::new(workspace.root, self.config.clone()));
                session.start()?;
                Ok::<_, crate::WorkspaceError>(session)
            })
            .await;

        match created {
            Ok(session) => Ok(Arc::clone(session)),
            Err(e) => {
                // Drop the empty slot unless another caller already filled it
                let mut sessions = self.sessions.lock();
                if let Some(current) = sessions.get(user_id) {
                    if Arc::ptr_eq(current, &slot) && current.get().is_none() {
                        sessions.remove(user_id);
                    }
                }
                Err(e)
            }
        }
    }

    /// Session for a user if one is running
    pub async fn get(&self, user_id: &str) -> Option<Arc<WatchSession>> {
        self.sessions.lock().get(user_id)?.get().cloned()
    }

    /// Sessions that finished creation
    fn live_sessions(&self) -> Vec<(String, Arc<WatchSession>)> {
        self.sessions
            .lock()
            .iter()
            .filter_map(|(user, slot)| slot.get().map(|s| (user.clone(), Arc::clone(s))))
            .collect()
    }

    /// Stop every session. Individual failures are logged, never raised.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        let drained: Vec<(String, Arc<WatchSession>)> = self
            .sessions
            .lock()
            .drain()
            .filter_map(|(user, slot)| slot.get().map(|s| (user, Arc::clone(s))))
            .collect();
        tracing::info!("[REGISTRY] Stopping {} watch sessions", drained.len());

        let stops: Vec<_> = drained
            .into_iter()
            .map(|(user_id, session)| {
                let task = tokio::task::spawn_blocking(move || session.stop());
                (user_id, tokio::time::timeout(STOP_TIMEOUT, task))
            })
            .collect();

        let mut report = ShutdownReport::default();
        for (user_id, stop) in stops {
            match stop.await {
                Ok(Ok(())) => report.stopped += 1,
                Ok(Err(e)) => {
                    tracing::error!("[REGISTRY] Stopping session for {} failed: {}", user_id, e);
                    report.failed.push(user_id);
                }
                Err(_) => {
                    tracing::error!(
                        "[REGISTRY] Session for {} did not stop within {:?}",
                        user_id,
                        STOP_TIMEOUT
                    );
                    report.failed.push(user_id);
                }
            }
        }
        report
    }

    /// Users with a live session
    pub async fn active_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.live_sessions().into_iter().map(|(u, _)| u).collect();
        users.sort();
        users
    }

    /// Get stats about the registry
    pub async fn stats(&self) -> RegistryStats {
        let sessions = self.live_sessions();
        RegistryStats {
            session_count: sessions.len(),
            total_listeners: sessions.iter().map(|(_, s)| s.listener_count()).sum(),
            roots: sessions.iter().map(|(_, s)| s.root().to_path_buf()).collect(),
        }
    }
}

/// Outcome of [`WatchRegistry::shutdown_all`]
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub stopped: usize,
    /// Users whose session failed or timed out while stopping
    pub failed: Vec<String>,
}

/// Statistics about the registry
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub session_count: usize,
    pub total_listeners: usize,
    pub roots: Vec<PathBuf>,
}
