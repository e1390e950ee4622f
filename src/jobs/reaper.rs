//! Expiration reaper: periodic reclamation of idle sessions.
//!
//! Each sweep walks the storage root. A directory's age comes from its
//! session's last activity when the session is registered, otherwise from the
//! directory mtime (orphans left by an earlier process). Registered sessions
//! whose storage is already gone are dropped from the registry as well.
//! Failures are logged per item and never stop the sweep.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::session::store::SessionStore;
use crate::storage::{self, SessionStorage};

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions (or orphan directories) reclaimed.
    pub removed: usize,
    /// Entries still within their TTL.
    pub kept: usize,
    /// Entries whose removal failed.
    pub failed: usize,
}

/// Deletes storage and registry entries idle for longer than the TTL.
pub struct ExpirationReaper {
    store: Arc<SessionStore>,
    storage: SessionStorage,
    ttl: Duration,
}

impl ExpirationReaper {
    pub fn new(store: Arc<SessionStore>, storage: SessionStorage, ttl: Duration) -> Self {
        Self { store, storage, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run one sweep.
    pub async fn sweep(&self) -> SweepReport {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let mut report = SweepReport::default();
        let mut seen = HashSet::new();

        let entries = match self.storage.list().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "Failed to list session storage");
                Vec::new()
            }
        };

        for entry in entries {
            let session_id = entry.session_id();
            if let Some(id) = session_id {
                seen.insert(id);
            }

            let registered = match session_id {
                Some(id) => self.store.last_activity(id).await,
                None => None,
            };
            let last_activity = registered.unwrap_or(entry.modified);
            if now.signed_duration_since(last_activity) <= ttl {
                report.kept += 1;
                continue;
            }

            if let (Some(id), Some(_)) = (session_id, registered)
                && self.store.remove_if_expired(id, now, ttl).await.is_none()
                && self.store.contains(id).await
            {
                // Touched since we looked.
                report.kept += 1;
                continue;
            }

            match storage::remove_dir(&entry.path).await {
                Ok(_) => {
                    info!(
                        path = %entry.path.display(),
                        orphan = registered.is_none(),
                        "Removed expired session storage"
                    );
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Failed to remove expired session");
                    report.failed += 1;
                }
            }
        }

        // Registry entries whose storage vanished out from under them.
        for id in self.store.expired(now, ttl).await {
            if seen.contains(&id) {
                continue;
            }
            if self.store.remove_if_expired(id, now, ttl).await.is_some() {
                debug!(session_id = %id, "Removed expired session without storage");
                report.removed += 1;
            }
        }

        if report.removed > 0 || report.failed > 0 {
            info!(
                removed = report.removed,
                kept = report.kept,
                failed = report.failed,
                "Expired sessions swept"
            );
        }
        report
    }
}

/// Spawn a background task that sweeps on a fixed period.
pub fn spawn_reaper(reaper: Arc<ExpirationReaper>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            reaper.sweep().await;
        }
    })
}
