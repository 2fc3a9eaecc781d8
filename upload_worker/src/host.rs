//! Client seam for the external video host. The pipeline only needs one
//! operation: push a video with its presentation fields, get back the public
//! URL and what happened per playlist. At-least-once is acceptable; the
//! deterministic job id doubles as the idempotency token. Host throttling is
//! honored in-process up to a ceiling, after which the job goes back to the
//! queue's own backoff.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("host throttled upload ({status}): {detail}")]
    Throttled {
        status: u16,
        wait_ms: Option<u64>,
        detail: String,
    },

    #[error("host rejected upload ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Throttling and transport trouble are worth retrying; anything the
    /// host rejected outright is not.
    pub fn is_transient(&self) -> bool {
        match self {
            HostError::Http(_) | HostError::Io(_) | HostError::Throttled { .. } => true,
            HostError::Rejected { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub playlists: Vec<String>,
    /// Idempotency token the host can use to collapse duplicate attempts.
    pub idempotency_token: String,
    #[serde(skip)]
    pub video_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistResult {
    pub playlist_id: String,
    pub added: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResult {
    pub url: String,
    #[serde(default)]
    pub playlists: Vec<PlaylistResult>,
}

#[async_trait]
pub trait VideoHost: Send + Sync {
    async fn upload(&self, request: UploadRequest) -> Result<UploadResult, HostError>;
}

pub struct HttpVideoHost {
    endpoint: String,
    token: String,
    client: reqwest::Client,
    /// Longest single wait this process will honor before handing the retry
    /// back to the queue.
    max_retry_seconds: u64,
}

const BASE_WAIT_TIME_MS: u64 = 1000;

impl HttpVideoHost {
    pub fn new(
        endpoint: &str,
        token: String,
        user_agent: &str,
        max_retry_seconds: u64,
    ) -> Result<Self, HostError> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(HttpVideoHost {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            client,
            max_retry_seconds,
        })
    }

    async fn attempt(&self, request: &UploadRequest) -> Result<UploadResult, HostError> {
        let file = tokio::fs::File::open(&request.video_file).await?;
        let len = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let metadata = serde_json::to_string(request).map_err(|e| HostError::Rejected {
            status: 0,
            detail: format!("unserializable request: {e}"),
        })?;

        let form = reqwest::multipart::Form::new()
            .text("metadata", metadata)
            .part(
                "video",
                reqwest::multipart::Part::stream_with_length(body, len).file_name("video.mp4"),
            );

        let response = self
            .client
            .post(format!("{}/videos", self.endpoint))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let detail = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(HostError::Throttled {
                    status: status.as_u16(),
                    wait_ms: wait,
                    detail,
                });
            }
            return Err(HostError::Rejected { status: status.as_u16(), detail });
        }

        Ok(response.json().await?)
    }
}

/// Milliseconds to wait as the host requests: `Retry-After` as seconds, or as
/// an HTTP date, when present.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds * 1000);
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.signed_duration_since(chrono::Utc::now());
    Some(wait.num_milliseconds().max(0) as u64)
}

#[async_trait]
impl VideoHost for HttpVideoHost {
    #[tracing::instrument(skip(self, request), fields(title = %request.title))]
    async fn upload(&self, request: UploadRequest) -> Result<UploadResult, HostError> {
        let mut attempts: u32 = 0;
        loop {
            match self.attempt(&request).await {
                Err(HostError::Throttled { status, wait_ms, detail }) => {
                    let wait_ms = wait_ms.unwrap_or(BASE_WAIT_TIME_MS * 2u64.saturating_pow(attempts));
                    if wait_ms > self.max_retry_seconds * 1000 {
                        // Too long to hold the upload slot; let the queue
                        // reschedule us instead.
                        tracing::info!(status, wait_ms, "host backoff exceeds ceiling, returning to queue");
                        return Err(HostError::Throttled { status, wait_ms: Some(wait_ms), detail });
                    }
                    tracing::info!(status, wait_ms, "host throttled, waiting in-process");
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    attempts += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(retry_after(&headers), Some(30_000));
    }

    #[test]
    fn retry_after_parses_http_dates() {
        let at = chrono::Utc::now() + chrono::Duration::seconds(60);
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(&at.to_rfc2822()).unwrap());
        let wait = retry_after(&headers).unwrap();
        assert!(wait > 55_000 && wait <= 60_000, "wait was {wait}");
    }

    #[test]
    fn retry_after_in_the_past_is_zero() {
        let at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(&at.to_rfc2822()).unwrap());
        assert_eq!(retry_after(&headers), Some(0));
    }

    #[test]
    fn absent_header_yields_none() {
        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn transience_classification() {
        assert!(HostError::Throttled { status: 429, wait_ms: None, detail: String::new() }.is_transient());
        assert!(!HostError::Rejected { status: 403, detail: String::new() }.is_transient());
    }
}
