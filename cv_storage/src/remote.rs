use std::path::Path;

use async_trait::async_trait;
use cv_types::ArtifactKind;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::{relative_path, sanitize_meeting_id, ArtifactStore, StorageError};

/// Artifact store that talks to the file server over HTTP. Reads stream from
/// `GET /files/<rel>`, writes go through `POST /upload/<kind>/<meetingId>`.
pub struct RemoteStore {
    base_url: String,
    client: reqwest::Client,
}

#[derive(serde::Deserialize)]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl RemoteStore {
    pub fn new(base_url: String) -> Self {
        RemoteStore {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn file_url(&self, kind: ArtifactKind, meeting_id: &str) -> String {
        format!("{}/files/{}", self.base_url, relative_path(kind, meeting_id))
    }
}

#[async_trait]
impl ArtifactStore for RemoteStore {
    fn url_for(&self, kind: ArtifactKind, meeting_id: &str) -> String {
        self.file_url(kind, meeting_id)
    }

    async fn read_into(&self, kind: ArtifactKind, meeting_id: &str, local_path: &Path) -> Result<(), StorageError> {
        let url = self.file_url(kind, meeting_id);
        let mut response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::Missing { kind, meeting_id: meeting_id.to_string() });
        }
        if !response.status().is_success() {
            return Err(StorageError::UnexpectedStatus { status: response.status().as_u16(), url });
        }

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(local_path).await?;
        while let Some(bytes) = response.chunk().await? {
            file.write_all(&bytes).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn write_from(&self, local_path: &Path, kind: ArtifactKind, meeting_id: &str) -> Result<String, StorageError> {
        let url = format!(
            "{}/upload/{}/{}",
            self.base_url,
            kind.as_str(),
            sanitize_meeting_id(meeting_id)
        );

        let file = tokio::fs::File::open(local_path).await?;
        let len = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let part = reqwest::multipart::Part::stream_with_length(body, len).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StorageError::UploadRejected(format!("{status}: {detail}")));
        }

        let upload: UploadResponse = response.json().await?;
        if !upload.success {
            return Err(StorageError::UploadRejected(
                upload.error.unwrap_or_else(|| "unknown server error".to_string()),
            ));
        }
        upload
            .path
            .ok_or_else(|| StorageError::UploadRejected("server omitted stored path".to_string()))
    }

    async fn exists(&self, kind: ArtifactKind, meeting_id: &str) -> Result<bool, StorageError> {
        let url = self.file_url(kind, meeting_id);
        let response = self.client.head(&url).send().await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => Err(StorageError::UnexpectedStatus { status: s.as_u16(), url }),
        }
    }

    async fn size_of(&self, kind: ArtifactKind, meeting_id: &str) -> Result<u64, StorageError> {
        let url = self.file_url(kind, meeting_id);
        let response = self.client.head(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::Missing { kind, meeting_id: meeting_id.to_string() });
        }
        if !response.status().is_success() {
            return Err(StorageError::UnexpectedStatus { status: response.status().as_u16(), url });
        }
        Ok(response.content_length().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_the_file_server_contract() {
        let store = RemoteStore::new("http://files.internal:4500/".to_string());
        assert_eq!(
            store.url_for(ArtifactKind::RawVideo, "m1"),
            "http://files.internal:4500/files/raw/videos/m1.mp4"
        );
    }
}
