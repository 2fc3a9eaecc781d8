//! EXTRACTED → UPLOADED: publish the video to the external host with the
//! chapter description, tag list, and any matching playlists. One upload at a
//! time; the host rate-limits aggressively.

use std::sync::Arc;

use async_trait::async_trait;
use cv_queue::job_id;
use cv_storage::{ArtifactStore, StorageConfig, StorageError};
use cv_store::RedisMeetingStore;
use cv_types::{ArtifactKind, Meeting, MeetingPatch, Phase};
use cv_workflow::{run_worker, Orchestrator, PhaseError, PhaseHandler, QueueSet, WorkerOptions};
use serde::Deserialize;

mod host;
mod playlists;

use host::{HttpVideoHost, UploadRequest, VideoHost};
use playlists::{match_playlists, rules_from_env, PlaylistRule};

#[derive(Debug, Clone, Deserialize)]
struct Config {
    redis_url: String,

    video_host_url: String,

    /// Credential for the host client; treated as opaque.
    video_host_token: String,

    /// Appended to every published title, e.g. a city name.
    location_tag: String,

    /// Comma-separated tag list attached to every upload.
    #[serde(default)]
    upload_tags: String,

    #[serde(default = "default_user_agent")]
    user_agent: String,

    /// Longest host-requested wait honored in-process before the job is
    /// handed back to the queue for rescheduling.
    #[serde(default = "default_max_retry_seconds")]
    max_retry_seconds: u64,

    #[serde(default = "default_drain_secs")]
    drain_deadline_secs: u64,

    #[serde(flatten)]
    storage: StorageConfig,
}

fn default_user_agent() -> String {
    "civicast-upload/0.4".to_string()
}

fn default_max_retry_seconds() -> u64 {
    120
}

fn default_drain_secs() -> u64 {
    300
}

struct UploadHandler {
    storage: Arc<dyn ArtifactStore>,
    host: Arc<dyn VideoHost>,
    location_tag: String,
    tags: Vec<String>,
    rules: Vec<PlaylistRule>,
}

/// `"<meetingTitle> - <YYYY-MM-DD> | <locationTag>"`.
fn published_title(meeting: &Meeting, location_tag: &str) -> String {
    format!("{} - {} | {}", meeting.title, meeting.date_only(), location_tag)
}

fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Hosts cap description length. Long agendas get cut on a chapter-line
/// boundary so the description never ends mid-timestamp.
const MAX_DESCRIPTION_CHARS: usize = 5000;

fn clamp_description(description: &str) -> String {
    if description.chars().count() <= MAX_DESCRIPTION_CHARS {
        return description.to_string();
    }
    let mut out = String::new();
    for line in description.lines() {
        if out.chars().count() + line.chars().count() + 1 > MAX_DESCRIPTION_CHARS {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[async_trait]
impl PhaseHandler for UploadHandler {
    fn expected_phase(&self) -> Phase {
        Phase::Extracted
    }

    #[tracing::instrument(skip(self, meeting), fields(meeting_id = %meeting.id, step = "upload"))]
    async fn produce(&self, meeting: &Meeting) -> Result<MeetingPatch, PhaseError> {
        let scratch = tempfile::tempdir().map_err(PhaseError::transient)?;

        let chapters_file = scratch.path().join("chapters.txt");
        self.storage
            .read_into(ArtifactKind::DerivedChapters, &meeting.id, &chapters_file)
            .await
            .map_err(missing_is_fatal)?;
        let description = tokio::fs::read_to_string(&chapters_file)
            .await
            .map_err(PhaseError::transient)?;

        let video_file = scratch.path().join("video.mp4");
        self.storage
            .read_into(ArtifactKind::RawVideo, &meeting.id, &video_file)
            .await
            .map_err(missing_is_fatal)?;

        let playlists = match_playlists(&meeting.title, &self.rules);
        let request = UploadRequest {
            title: published_title(meeting, &self.location_tag),
            description: clamp_description(&description),
            tags: self.tags.clone(),
            playlists,
            idempotency_token: job_id("upload", &meeting.id),
            video_file,
        };

        let result = self.host.upload(request).await.map_err(|e| {
            if e.is_transient() {
                PhaseError::transient(e)
            } else {
                PhaseError::fatal(e)
            }
        })?;

        for playlist in &result.playlists {
            if playlist.added {
                tracing::info!(playlist_id = %playlist.playlist_id, "added to playlist");
            } else {
                tracing::warn!(
                    playlist_id = %playlist.playlist_id,
                    detail = playlist.detail.as_deref().unwrap_or(""),
                    "playlist add failed"
                );
            }
        }

        tracing::info!(url = %result.url, "video published");
        Ok(MeetingPatch {
            published_url: Some(result.url),
            ..Default::default()
        })
    }
}

fn missing_is_fatal(e: StorageError) -> PhaseError {
    match e {
        StorageError::Missing { .. } => PhaseError::fatal(e),
        other => PhaseError::transient(other),
    }
}

#[tokio::main]
async fn main() {
    cv_app::init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "upload worker exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = cv_app::load_config()?;

    let store = Arc::new(RedisMeetingStore::connect(&config.redis_url).await?);
    let queues = QueueSet::connect_redis(&config.redis_url).await?;
    let orchestrator = Arc::new(Orchestrator::new(store, queues.clone()));

    let handler = Arc::new(UploadHandler {
        storage: cv_storage::open(&config.storage),
        host: Arc::new(HttpVideoHost::new(
            &config.video_host_url,
            config.video_host_token.clone(),
            &config.user_agent,
            config.max_retry_seconds,
        )?),
        location_tag: config.location_tag.clone(),
        tags: parse_tags(&config.upload_tags),
        rules: rules_from_env(),
    });

    // Strictly one in-flight upload: the host throttles by account.
    run_worker(
        orchestrator,
        queues.upload.clone(),
        handler,
        WorkerOptions::with_concurrency(1).drain_deadline_secs(config.drain_deadline_secs),
        cv_app::shutdown_signal(),
    )
    .await?;
    Ok(())
}
