//! Session service: the entry point for every session operation.
//!
//! Wires the registry, per-session storage, job executor, download gate and
//! reaper together. Callers (the HTTP layer, tests) only talk to this type.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::jobs::{ExpirationReaper, JobExecutor, spawn_reaper};
use crate::session::{ArtifactDownload, DownloadGate, SessionStore, StatusSnapshot, StoredFile};
use crate::storage::{self, SessionStorage};
use crate::tools::Transformer;

/// Name used when an upload carries no file name.
const DEFAULT_UPLOAD_NAME: &str = "upload";

/// Session lifecycle operations.
pub struct SessionService {
    store: Arc<SessionStore>,
    storage: SessionStorage,
    executor: JobExecutor,
    gate: DownloadGate,
    reaper: Arc<ExpirationReaper>,
    config: ServiceConfig,
}

impl SessionService {
    /// Validate the config, prepare the storage root and build the service.
    pub async fn start(config: ServiceConfig, transformer: Arc<dyn Transformer>) -> Result<Arc<Self>> {
        config.validate()?;

        let storage = SessionStorage::new(&config.storage_root);
        storage.ensure_root().await?;

        let store = SessionStore::new();
        let executor = JobExecutor::new(
            Arc::clone(&store),
            storage.clone(),
            transformer,
            config.max_concurrent_jobs,
        );
        let gate = DownloadGate::new(Arc::clone(&store), storage.clone());
        let reaper = Arc::new(ExpirationReaper::new(
            Arc::clone(&store),
            storage.clone(),
            config.session_ttl,
        ));

        info!(
            root = %storage.root().display(),
            ttl_secs = config.session_ttl.as_secs(),
            max_jobs = config.max_concurrent_jobs,
            "Session service ready"
        );

        Ok(Arc::new(Self {
            store,
            storage,
            executor,
            gate,
            reaper,
            config,
        }))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn storage(&self) -> &SessionStorage {
        &self.storage
    }

    /// Create a session and its storage directory.
    pub async fn create(&self) -> Result<Uuid> {
        let id = self.store.create().await;
        if let Err(e) = self.storage.create_session(id).await {
            self.store.remove(id).await;
            return Err(e.into());
        }
        info!(session_id = %id, "Session created");
        Ok(id)
    }

    /// Store an uploaded file and return its server-assigned id.
    pub async fn upload(&self, id: Uuid, original_name: Option<&str>, bytes: &[u8]) -> Result<String> {
        self.store.ensure_accepting(id, "upload").await?;
        if bytes.is_empty() {
            return Err(Error::InvalidInput("no file content".to_string()));
        }

        let original_name = original_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_UPLOAD_NAME)
            .to_string();
        let file_id = Uuid::new_v4().simple().to_string();
        let stored_name = match extension(&original_name) {
            Some(ext) => format!("{file_id}.{ext}"),
            None => file_id.clone(),
        };

        let path = match self.storage.write_file(id, &stored_name, bytes).await {
            Ok(path) => path,
            // Storage reclaimed between the check and the write.
            Err(e) if e.is_not_found() => return Err(Error::session_not_found(id)),
            Err(e) => return Err(e.into()),
        };

        let file = StoredFile {
            path: path.clone(),
            original_name,
            size: bytes.len() as u64,
        };
        if let Err(e) = self.store.add_file(id, file_id.clone(), file).await {
            // Lost a race with execute, download or the reaper.
            if let Err(cleanup) = storage::remove_file(&path).await {
                warn!(session_id = %id, error = %cleanup, "Failed to remove rejected upload");
            }
            return Err(e);
        }

        debug!(session_id = %id, file_id = %file_id, size = bytes.len(), "File uploaded");
        Ok(file_id)
    }

    /// Start the session's single job. Returns as soon as it is accepted.
    pub async fn execute(&self, id: Uuid, tool: &str, file_ids: &[String]) -> Result<JoinHandle<()>> {
        self.executor.submit(id, tool, file_ids).await
    }

    /// Current status of a session.
    pub async fn status(&self, id: Uuid) -> Result<StatusSnapshot> {
        self.store.snapshot(id).await
    }

    /// Open the artifact for a one-shot download.
    pub async fn download(&self, id: Uuid, name: &str) -> Result<ArtifactDownload> {
        self.gate.open(id, name).await
    }

    /// Start periodic sweeps at the configured interval.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        spawn_reaper(Arc::clone(&self.reaper), self.config.sweep_interval)
    }

    pub async fn session_count(&self) -> usize {
        self.store.len().await
    }

    pub fn running_jobs(&self) -> usize {
        self.executor.running()
    }
}

/// Lowercase alphanumeric extension, kept so tools can sniff file types.
fn extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
