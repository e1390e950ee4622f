//! Session registry: the single synchronized map of session state.
//!
//! Every reader and writer goes through this store; nothing else keeps a
//! copy of a session's status.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{Artifact, Session, SessionStatus, StatusSnapshot, StatusUpdate, StoredFile};
use crate::error::{Error, Result};

/// In-memory session registry.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    /// Sessions with a download in flight. Never held across an await.
    claims: Mutex<HashSet<Uuid>>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a fresh session in the `created` state.
    pub async fn create(&self) -> Uuid {
        let mut sessions = self.sessions.write().await;
        let mut id = Uuid::new_v4();
        while sessions.contains_key(&id) {
            id = Uuid::new_v4();
        }
        sessions.insert(id, Session::new(id));
        debug!(session_id = %id, "Session registered");
        id
    }

    /// Clone of the session's current state.
    pub async fn get(&self, id: Uuid) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::session_not_found(id))
    }

    pub async fn snapshot(&self, id: Uuid) -> Result<StatusSnapshot> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(Session::snapshot)
            .ok_or_else(|| Error::session_not_found(id))
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    /// Apply a status transition atomically.
    ///
    /// Invalid transitions are rejected with `ExecutionConflict` and leave the
    /// session untouched.
    pub async fn set_status(&self, id: Uuid, update: StatusUpdate) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| Error::session_not_found(id))?;

        let from = session.status;
        let target = update.status();
        if session.apply(update).is_err() {
            warn!(session_id = %id, from = %from, to = %target, "Rejected status transition");
            return Err(Error::ExecutionConflict {
                id,
                state: from.to_string(),
                action: "change status",
            });
        }

        info!(session_id = %id, from = %from, to = %target, "Session status changed");
        Ok(())
    }

    /// Record an uploaded file. Only sessions still in `created` accept files.
    pub async fn add_file(&self, id: Uuid, file_id: String, file: StoredFile) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| Error::session_not_found(id))?;

        ensure_created(session, "upload")?;
        session.files.insert(file_id, file);
        session.touch();
        Ok(())
    }

    /// Fail unless the session exists and is still `created`.
    pub async fn ensure_accepting(&self, id: Uuid, action: &'static str) -> Result<()> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(&id)
            .ok_or_else(|| Error::session_not_found(id))?;
        ensure_created(session, action)
    }

    /// Resolve file ids in order and move the session to `processing`.
    ///
    /// Both happen under one write lock so two concurrent executes cannot
    /// both succeed. Returns the resolved files in declared order.
    pub async fn begin_processing(&self, id: Uuid, file_ids: &[String]) -> Result<Vec<StoredFile>> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| Error::session_not_found(id))?;

        ensure_created(session, "execute")?;

        let files = file_ids
            .iter()
            .map(|file_id| {
                session.files.get(file_id).cloned().ok_or_else(|| Error::NotFound {
                    entity: "File",
                    id: file_id.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let from = session.status;
        if session.apply(StatusUpdate::Processing).is_err() {
            return Err(Error::ExecutionConflict {
                id,
                state: from.to_string(),
                action: "execute",
            });
        }

        info!(session_id = %id, files = files.len(), "Session processing");
        Ok(files)
    }

    /// Reserve the session's artifact for a single download.
    ///
    /// Fails with `NotFound` if the session is unknown, not complete, the name
    /// does not match its artifact, or another download already holds it.
    pub async fn claim_download(&self, id: Uuid, name: &str) -> Result<Artifact> {
        let mut sessions = self.sessions.write().await;
        let not_found = || Error::NotFound {
            entity: "Artifact",
            id: format!("{id}/{name}"),
        };
        let session = sessions.get_mut(&id).ok_or_else(not_found)?;

        if session.status != SessionStatus::Complete {
            return Err(not_found());
        }
        let artifact = match &session.result {
            Some(artifact) if artifact.name == name => artifact.clone(),
            _ => return Err(not_found()),
        };

        if !self.claims().insert(id) {
            return Err(not_found());
        }
        Ok(artifact)
    }

    /// Give up a download claim (the transfer did not finish). Callable
    /// from `Drop`.
    pub fn release_download(&self, id: Uuid) {
        self.claims().remove(&id);
    }

    /// Whether a download of the session's artifact is in flight.
    #[cfg(test)]
    pub(crate) fn is_download_claimed(&self, id: Uuid) -> bool {
        self.claims().contains(&id)
    }

    fn claims(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        self.claims.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove a session from the registry.
    pub async fn remove(&self, id: Uuid) -> Option<Session> {
        let removed = self.sessions.write().await.remove(&id);
        self.claims().remove(&id);
        if removed.is_some() {
            debug!(session_id = %id, "Session removed from registry");
        }
        removed
    }

    /// Remove a session only if it is still expired at removal time.
    pub async fn remove_if_expired(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let expired = sessions.get(&id).is_some_and(|s| s.is_expired(now, ttl));
        if expired { sessions.remove(&id) } else { None }
    }

    /// Ids of sessions idle for longer than `ttl`.
    pub async fn expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> Vec<Uuid> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_expired(now, ttl))
            .map(|s| s.id)
            .collect()
    }

    /// Last activity of a session, if registered.
    pub async fn last_activity(&self, id: Uuid) -> Option<DateTime<Utc>> {
        self.sessions.read().await.get(&id).map(|s| s.last_activity)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Move a session's last activity into the past.
    #[cfg(test)]
    pub(crate) async fn backdate(&self, id: Uuid, by: chrono::Duration) {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.last_activity = session.last_activity - by;
        }
    }
}

fn ensure_created(session: &Session, action: &'static str) -> Result<()> {
    if session.status == SessionStatus::Created {
        Ok(())
    } else {
        Err(Error::ExecutionConflict {
            id: session.id,
            state: session.status.to_string(),
            action,
        })
    }
}
