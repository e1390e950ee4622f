//! File-backed storage, one directory per session.
//!
//! Layout under the storage root:
//! - `<session_id>/`: the session's storage scope
//! - `<session_id>/<file_id>.<ext>`: uploaded inputs
//! - `<session_id>/output_<session_id>.tmp`: in-flight tool output
//! - `<session_id>/work_<session_id>/`: scratch space for multi-output tools
//! - `<session_id>/<artifact>`: the finished artifact

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use uuid::Uuid;

use crate::error::StorageError;

/// A directory found directly under the storage root.
#[derive(Debug, Clone)]
pub struct StorageEntry {
    /// Directory name (a session id for well-formed entries).
    pub name: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

impl StorageEntry {
    /// Session id encoded in the directory name, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.name).ok()
    }
}

/// Per-session directory management.
#[derive(Debug, Clone)]
pub struct SessionStorage {
    root: PathBuf,
}

impl SessionStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage root if missing.
    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io("create", &self.root, e))
    }

    pub fn session_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Create the storage scope for a new session.
    pub async fn create_session(&self, id: Uuid) -> Result<PathBuf, StorageError> {
        let dir = self.session_dir(id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io("create", &dir, e))?;
        Ok(dir)
    }

    /// Write a file into a session directory. The directory must exist.
    pub async fn write_file(
        &self,
        id: Uuid,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = self.resolve(id, file_name)?;
        fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::io("write", &path, e))?;
        Ok(path)
    }

    /// Resolve a bare file name inside a session directory.
    ///
    /// Names containing path separators or parent references are rejected.
    pub fn resolve(&self, id: Uuid, file_name: &str) -> Result<PathBuf, StorageError> {
        if !is_plain_name(file_name) {
            return Err(StorageError::InvalidName(file_name.to_string()));
        }
        Ok(self.session_dir(id).join(file_name))
    }

    /// Recursively remove a session directory.
    ///
    /// Returns `Ok(false)` if it was already gone.
    pub async fn remove_session(&self, id: Uuid) -> Result<bool, StorageError> {
        remove_dir(&self.session_dir(id)).await
    }

    /// List directories under the root with their modification times.
    pub async fn list(&self) -> Result<Vec<StorageEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::io("read", &self.root, e))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StorageError::io("read", &self.root, e))?
        {
            // Entries can vanish between listing and stat (downloaded meanwhile).
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }
            let Ok(modified) = meta.modified() else {
                continue;
            };
            entries.push(StorageEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                modified: DateTime::<Utc>::from(modified),
            });
        }

        Ok(entries)
    }
}

/// Remove a directory tree, treating a missing directory as success.
pub async fn remove_dir(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io("remove", path, e)),
    }
}

/// Remove a single file, treating a missing file as success.
pub async fn remove_file(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io("remove", path, e)),
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
