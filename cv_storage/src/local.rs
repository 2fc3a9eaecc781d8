use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cv_types::ArtifactKind;

use crate::{relative_path, ArtifactStore, StorageError};

/// Artifact store backed by a directory tree on this node.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        LocalStore { root }
    }

    fn absolute(&self, kind: ArtifactKind, meeting_id: &str) -> PathBuf {
        self.root.join(relative_path(kind, meeting_id))
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    fn url_for(&self, kind: ArtifactKind, meeting_id: &str) -> String {
        format!("file://{}", self.absolute(kind, meeting_id).display())
    }

    async fn read_into(&self, kind: ArtifactKind, meeting_id: &str, local_path: &Path) -> Result<(), StorageError> {
        let src = self.absolute(kind, meeting_id);
        if !tokio::fs::try_exists(&src).await? {
            return Err(StorageError::Missing { kind, meeting_id: meeting_id.to_string() });
        }
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, local_path).await?;
        Ok(())
    }

    async fn write_from(&self, local_path: &Path, kind: ArtifactKind, meeting_id: &str) -> Result<String, StorageError> {
        let rel = relative_path(kind, meeting_id);
        let dest = self.root.join(&rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_path, &dest).await?;
        tracing::debug!(path = %dest.display(), "stored artifact");
        Ok(rel)
    }

    async fn exists(&self, kind: ArtifactKind, meeting_id: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.absolute(kind, meeting_id)).await?)
    }

    async fn size_of(&self, kind: ArtifactKind, meeting_id: &str) -> Result<u64, StorageError> {
        let path = self.absolute(kind, meeting_id);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::Missing { kind, meeting_id: meeting_id.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }
}
