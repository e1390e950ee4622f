//! One-shot artifact download.
//!
//! Opening a download claims the session's artifact so a concurrent second
//! download sees `NotFound`. The returned body streams the file. When the
//! chunk that completes the artifact's size has been read, the registry entry
//! and storage tree are removed before that chunk is yielded, so the transfer
//! never depends on the body being polled past its last byte. If the body is
//! dropped early or a read fails, the claim is released and the session stays
//! downloadable.

use std::io;
use std::sync::Arc;

use axum::body::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::store::SessionStore;
use crate::error::{Error, Result, StorageError};
use crate::storage::SessionStorage;

/// An artifact ready to be streamed to the caller.
pub struct ArtifactDownload {
    pub name: String,
    pub size: u64,
    pub content_type: &'static str,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

impl std::fmt::Debug for ArtifactDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactDownload")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Serializes "artifact exists" against "session gone".
#[derive(Clone)]
pub struct DownloadGate {
    store: Arc<SessionStore>,
    storage: SessionStorage,
}

impl DownloadGate {
    pub fn new(store: Arc<SessionStore>, storage: SessionStorage) -> Self {
        Self { store, storage }
    }

    /// Claim and open a session's artifact.
    pub async fn open(&self, id: Uuid, name: &str) -> Result<ArtifactDownload> {
        let artifact = self.store.claim_download(id, name).await?;
        let claim = Claim {
            id,
            store: Arc::clone(&self.store),
            storage: self.storage.clone(),
            settled: false,
        };

        let file = match tokio::fs::File::open(&artifact.path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(session_id = %id, path = %artifact.path.display(), error = %e, "Artifact missing on disk");
                drop(claim);
                return Err(Error::NotFound {
                    entity: "Artifact",
                    id: format!("{id}/{name}"),
                });
            }
        };
        let size = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(session_id = %id, path = %artifact.path.display(), error = %e, "Failed to stat artifact");
                drop(claim);
                return Err(StorageError::io("stat", &artifact.path, e).into());
            }
        };

        debug!(session_id = %id, artifact = %artifact.name, size, "Download started");

        // Owned by the stream: dropped (and released) with it unless the
        // final chunk settles it first.
        let mut claim = Some(claim);
        let mut sent = 0u64;
        let body = ReaderStream::new(file).then(move |chunk| {
            let settle = match &chunk {
                Ok(bytes) => {
                    sent += bytes.len() as u64;
                    if sent >= size { claim.take() } else { None }
                }
                Err(_) => None,
            };
            async move {
                if let Some(claim) = settle {
                    claim.consume().await;
                }
                chunk
            }
        });

        Ok(ArtifactDownload {
            content_type: content_type_for(&artifact.name),
            name: artifact.name,
            size,
            body: body.boxed(),
        })
    }
}

/// Held by an in-flight download.
struct Claim {
    id: Uuid,
    store: Arc<SessionStore>,
    storage: SessionStorage,
    settled: bool,
}

impl Claim {
    /// The transfer finished; tear the session down.
    async fn consume(mut self) {
        teardown(&self.store, &self.storage, self.id).await;
        self.settled = true;
        info!(session_id = %self.id, "Session downloaded and removed");
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.settled {
            self.store.release_download(self.id);
            debug!(session_id = %self.id, "Download claim released");
        }
    }
}

/// Remove a session's registry entry, then its storage.
///
/// Storage failures are logged; the registry entry is gone either way.
pub async fn teardown(store: &SessionStore, storage: &SessionStorage, id: Uuid) {
    store.remove(id).await;
    if let Err(e) = storage.remove_session(id).await {
        error!(session_id = %id, error = %e, "Failed to remove session storage");
    }
}

/// Content type from the artifact's extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}
