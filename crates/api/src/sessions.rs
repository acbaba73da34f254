//! In-memory registry of import sessions.
//!
//! Each session sits behind its own `tokio::sync::Mutex`, held for the whole
//! of a commit, so two commits for one session never overlap. Cancellation
//! goes through a per-session token that is a child of the server's
//! shutdown token and can be triggered without taking the session lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use salesdesk_core::error::CoreError;
use salesdesk_core::session::ImportSession;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A registered session and its cancellation token.
#[derive(Clone)]
pub struct SessionEntry {
    pub session: Arc<Mutex<ImportSession>>,
    pub cancel: CancellationToken,
    running: Arc<AtomicBool>,
}

impl SessionEntry {
    /// Mark a commit as running until the returned guard is dropped.
    pub fn begin_commit(&self) -> CommitRunning {
        self.running.store(true, Ordering::SeqCst);
        CommitRunning(self.running.clone())
    }

    pub fn commit_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Clears the session's running flag on drop, including when the commit
/// task panics.
pub struct CommitRunning(Arc<AtomicBool>);

impl Drop for CommitRunning {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    /// Create a registry whose session tokens are cancelled with `shutdown`.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Register a new session and return its entry.
    pub async fn insert(&self, session: ImportSession) -> SessionEntry {
        let id = session.id;
        let entry = SessionEntry {
            session: Arc::new(Mutex::new(session)),
            cancel: self.shutdown.child_token(),
            running: Arc::new(AtomicBool::new(false)),
        };
        self.sessions.write().await.insert(id, entry.clone());
        entry
    }

    pub async fn get(&self, id: Uuid) -> Result<SessionEntry, CoreError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                entity: "ImportSession",
                id: id.to_string(),
            })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop committed and cancelled sessions idle for at least `retention`.
    /// Sessions whose lock is held are left for the next sweep. Returns how
    /// many were removed.
    pub async fn sweep(&self, retention: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry
                .session
                .try_lock()
                .map_or(true, |session| !session.is_expired(retention))
        });
        before - sessions.len()
    }
}
