//! Uniform access to pipeline artifacts, whether they live on this node's
//! filesystem or behind the file server. Workers only ever name artifacts by
//! `(kind, meeting_id)`; the canonical layout lives in [`layout`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cv_types::ArtifactKind;
use serde::Deserialize;

pub mod layout;
mod local;
mod remote;

pub use layout::{relative_path, sanitize_meeting_id};
pub use local::LocalStore;
pub use remote::RemoteStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("artifact {kind} for meeting {meeting_id} not found")]
    Missing { kind: ArtifactKind, meeting_id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("file server returned {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("upload rejected: {0}")]
    UploadRejected(String),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Canonical storage path, relative to the storage root. Pure.
    fn path_for(&self, kind: ArtifactKind, meeting_id: &str) -> String {
        relative_path(kind, meeting_id)
    }

    /// Where the artifact can be fetched from (`file://` or `http://`).
    fn url_for(&self, kind: ArtifactKind, meeting_id: &str) -> String;

    /// Materialize the artifact at `local_path`, overwriting it.
    async fn read_into(&self, kind: ArtifactKind, meeting_id: &str, local_path: &Path) -> Result<(), StorageError>;

    /// Persist `local_path` as the artifact. Returns the stored relative path.
    async fn write_from(&self, local_path: &Path, kind: ArtifactKind, meeting_id: &str) -> Result<String, StorageError>;

    async fn exists(&self, kind: ArtifactKind, meeting_id: &str) -> Result<bool, StorageError>;

    async fn size_of(&self, kind: ArtifactKind, meeting_id: &str) -> Result<u64, StorageError>;
}

/// Storage-related configuration shared by every worker.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub storage_root: std::path::PathBuf,

    #[serde(default)]
    pub is_local: bool,

    #[serde(default)]
    pub file_server_host: Option<String>,

    #[serde(default)]
    pub file_server_port: Option<u16>,
}

/// Pick the artifact store implementation: `IS_LOCAL` (or an unset file
/// server address) selects direct filesystem access, otherwise artifacts go
/// through the file server.
pub fn open(config: &StorageConfig) -> Arc<dyn ArtifactStore> {
    match (&config.file_server_host, config.file_server_port) {
        (Some(host), Some(port)) if !config.is_local => {
            let base_url = format!("http://{host}:{port}");
            tracing::info!(%base_url, "using remote artifact store");
            Arc::new(RemoteStore::new(base_url))
        }
        _ => {
            tracing::info!(root = %config.storage_root.display(), "using local artifact store");
            Arc::new(LocalStore::new(config.storage_root.clone()))
        }
    }
}
