//! Session data model and status state machine.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting uploads; no job started yet.
    Created,
    /// The job is running in the background.
    Processing,
    /// The artifact is ready for download.
    Complete,
    /// The job failed.
    Error,
}

impl SessionStatus {
    /// Transitions are monotonic: created → processing → complete | error.
    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        use SessionStatus::*;

        matches!(
            (self, target),
            (Created, Processing) | (Processing, Complete) | (Processing, Error)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// An uploaded input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    /// Client-supplied name, kept for output naming only.
    pub original_name: String,
    pub size: u64,
}

/// The finished output of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
}

/// Per-session state held in the registry.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub status: SessionStatus,
    /// Uploaded inputs keyed by server-assigned file id.
    pub files: HashMap<String, StoredFile>,
    /// Set only while `status == Complete`.
    pub result: Option<Artifact>,
    /// Set only while `status == Error`.
    pub error_message: Option<String>,
    /// Bumped on creation and every file write; drives expiry.
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            status: SessionStatus::Created,
            files: HashMap::new(),
            result: None,
            error_message: None,
            last_activity: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Apply a status update, keeping `result` and `error_message` consistent
    /// with the new status.
    pub fn apply(&mut self, update: StatusUpdate) -> Result<(), String> {
        let target = update.status();
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status, target
            ));
        }

        self.status = target;
        match update {
            StatusUpdate::Processing => {
                self.result = None;
                self.error_message = None;
            }
            StatusUpdate::Complete(artifact) => {
                self.result = Some(artifact);
                self.error_message = None;
                self.touch();
            }
            StatusUpdate::Error(message) => {
                self.result = None;
                self.error_message = Some(message);
            }
        }
        Ok(())
    }

    /// Whether the session has been idle longer than `ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_activity) > ttl
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            download_url: self
                .result
                .as_ref()
                .map(|a| download_url(self.id, &a.name)),
            message: self.error_message.clone(),
        }
    }
}

/// A status change together with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Processing,
    Complete(Artifact),
    Error(String),
}

impl StatusUpdate {
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Processing => SessionStatus::Processing,
            Self::Complete(_) => SessionStatus::Complete,
            Self::Error(_) => SessionStatus::Error,
        }
    }
}

/// Read-only view returned to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Locator for a session's artifact.
pub fn download_url(session_id: Uuid, name: &str) -> String {
    format!("/download/{session_id}/{name}")
}
