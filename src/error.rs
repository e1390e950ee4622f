//! Error types for the session service.

use std::path::PathBuf;

use axum::http::StatusCode;
use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Session {id} is {state}, cannot {action}")]
    ExecutionConflict {
        id: Uuid,
        state: String,
        action: &'static str,
    },

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Shorthand for an unknown (or already reclaimed) session.
    pub fn session_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Session",
            id: id.to_string(),
        }
    }

    /// HTTP status code for this error kind.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ExecutionConflict { .. } => StatusCode::CONFLICT,
            Self::Tool(_) | Self::Storage(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Transformation tool failures.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Tool {tool} expects {expected}, got {got} input file(s)")]
    InputCount {
        tool: String,
        expected: &'static str,
        got: usize,
    },

    #[error("Failed to launch {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with code {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("Tool {tool} produced no output at {}", path.display())]
    MissingOutput { tool: String, path: PathBuf },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem errors on session storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact name: {0}")]
    InvalidName(String),
}

impl StorageError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// True when the underlying IO error is `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            Error::InvalidInput("empty".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::session_not_found(Uuid::new_v4()).status_code(),
            StatusCode::NOT_FOUND
        );
        let conflict = Error::ExecutionConflict {
            id: Uuid::new_v4(),
            state: "processing".into(),
            action: "execute",
        };
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            Error::Tool(ToolError::UnknownTool("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn storage_not_found_detection() {
        let err = StorageError::io(
            "remove",
            "/tmp/gone",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.is_not_found());
        let err = StorageError::InvalidName("../x".into());
        assert!(!err.is_not_found());
    }

    #[test]
    fn messages_are_readable() {
        let err = ToolError::NonZeroExit {
            program: "gs".into(),
            code: 1,
            stderr: "bad pdf".into(),
        };
        assert_eq!(err.to_string(), "gs exited with code 1: bad pdf");
    }
}
