//! Sessions: the data model, the registry, and the one-shot download.

pub mod download;
pub mod model;
pub mod store;

pub use download::{ArtifactDownload, DownloadGate};
pub use model::{Artifact, Session, SessionStatus, StatusSnapshot, StatusUpdate, StoredFile};
pub use store::SessionStore;
