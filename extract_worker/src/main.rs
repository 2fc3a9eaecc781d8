//! DOWNLOADED → EXTRACTED: fetch and parse the agenda page, emit the chapter
//! description and metadata artifacts, and attempt the derived audio track.
//! Audio is optional: its failure is recorded, never fatal to the phase.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cv_media::MediaError;
use cv_storage::{ArtifactStore, StorageConfig, StorageError};
use cv_store::RedisMeetingStore;
use cv_types::{ArtifactKind, Meeting, MeetingMetadata, MeetingPatch, Phase};
use cv_workflow::{run_worker, Orchestrator, PhaseError, PhaseHandler, QueueSet, WorkerOptions};
use serde::Deserialize;

mod agenda;
mod chapters;

use agenda::parse_agenda;
use chapters::chapter_description;

#[derive(Debug, Clone, Deserialize)]
struct Config {
    redis_url: String,

    #[serde(default = "default_concurrency")]
    extract_concurrency: usize,

    #[serde(default = "default_drain_secs")]
    drain_deadline_secs: u64,

    #[serde(flatten)]
    storage: StorageConfig,
}

fn default_concurrency() -> usize {
    3
}

fn default_drain_secs() -> u64 {
    300
}

#[async_trait]
trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, reqwest::Error>;
}

struct HttpFetcher {
    client: reqwest::Client,
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, reqwest::Error> {
        self.client.get(url).send().await?.error_for_status()?.text().await
    }
}

#[async_trait]
trait AudioExtractor: Send + Sync {
    async fn extract(&self, video: &Path, audio: &Path) -> Result<(), MediaError>;
}

struct FfmpegAudio;

#[async_trait]
impl AudioExtractor for FfmpegAudio {
    async fn extract(&self, video: &Path, audio: &Path) -> Result<(), MediaError> {
        cv_media::audio_extraction::extract_to_file(video, audio).await
    }
}

struct ExtractHandler {
    storage: Arc<dyn ArtifactStore>,
    fetcher: Arc<dyn PageFetcher>,
    audio: Arc<dyn AudioExtractor>,
}

#[async_trait]
impl PhaseHandler for ExtractHandler {
    fn expected_phase(&self) -> Phase {
        Phase::Downloaded
    }

    #[tracing::instrument(skip(self, meeting), fields(meeting_id = %meeting.id, step = "extract"))]
    async fn produce(&self, meeting: &Meeting) -> Result<MeetingPatch, PhaseError> {
        let scratch = tempfile::tempdir().map_err(PhaseError::transient)?;

        let html = self
            .fetcher
            .fetch(&meeting.source_url)
            .await
            .map_err(PhaseError::transient)?;

        let agenda_file = scratch.path().join("agenda.html");
        tokio::fs::write(&agenda_file, &html).await.map_err(PhaseError::transient)?;
        self.storage
            .write_from(&agenda_file, ArtifactKind::RawAgenda, &meeting.id)
            .await
            .map_err(PhaseError::transient)?;

        // A page we can't parse won't parse better on retry.
        let agenda = parse_agenda(&html).map_err(PhaseError::fatal)?;
        tracing::info!(items = agenda.items.len(), bookmarks = agenda.bookmarks.len(), "agenda parsed");

        let chapters_text = chapter_description(&meeting.title, &meeting.date_only(), &agenda.items);

        // Derived audio is best-effort: diarization is skipped when absent.
        let (audio_path, audio_error) = match self.derive_audio(meeting, scratch.path()).await {
            Ok(rel) => (Some(rel), None),
            Err(PhaseError::Fatal(msg)) => return Err(PhaseError::Fatal(msg)),
            Err(PhaseError::Transient(msg)) => {
                tracing::warn!(error = %msg, "audio extraction failed, continuing without audio");
                (None, Some(msg))
            }
        };

        let metadata = MeetingMetadata {
            meeting_id: meeting.id.clone(),
            title: meeting.title.clone(),
            date: meeting.date.clone(),
            agenda: agenda.clone(),
            extracted_at: Utc::now(),
            audio_error,
        };

        let chapters_file = scratch.path().join("chapters.txt");
        tokio::fs::write(&chapters_file, &chapters_text).await.map_err(PhaseError::transient)?;
        let chapters_path = self
            .storage
            .write_from(&chapters_file, ArtifactKind::DerivedChapters, &meeting.id)
            .await
            .map_err(PhaseError::transient)?;

        let metadata_file = scratch.path().join("metadata.json");
        let metadata_json = serde_json::to_vec_pretty(&metadata).map_err(PhaseError::fatal)?;
        tokio::fs::write(&metadata_file, metadata_json).await.map_err(PhaseError::transient)?;
        let metadata_path = self
            .storage
            .write_from(&metadata_file, ArtifactKind::DerivedMetadata, &meeting.id)
            .await
            .map_err(PhaseError::transient)?;

        Ok(MeetingPatch {
            chapters_path: Some(chapters_path),
            metadata_path: Some(metadata_path),
            audio_path,
            agenda: Some(serde_json::to_value(&agenda).map_err(PhaseError::fatal)?),
            chapters: Some(chapters_text),
            ..Default::default()
        })
    }
}

impl ExtractHandler {
    /// Materialize the raw video and run the audio extraction. A missing raw
    /// video is a cross-phase artifact violation and fatal; everything else
    /// surfaces as transient so the caller can decide to continue without.
    async fn derive_audio(&self, meeting: &Meeting, scratch: &Path) -> Result<String, PhaseError> {
        let video_file = scratch.join("video.mp4");
        self.storage
            .read_into(ArtifactKind::RawVideo, &meeting.id, &video_file)
            .await
            .map_err(|e| match e {
                StorageError::Missing { .. } => PhaseError::fatal(e),
                other => PhaseError::transient(other),
            })?;

        let audio_file = scratch.join("audio.m4a");
        self.audio
            .extract(&video_file, &audio_file)
            .await
            .map_err(PhaseError::transient)?;

        self.storage
            .write_from(&audio_file, ArtifactKind::DerivedAudio, &meeting.id)
            .await
            .map_err(PhaseError::transient)
    }
}

#[tokio::main]
async fn main() {
    cv_app::init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "extract worker exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = cv_app::load_config()?;

    let store = Arc::new(RedisMeetingStore::connect(&config.redis_url).await?);
    let queues = QueueSet::connect_redis(&config.redis_url).await?;
    let orchestrator = Arc::new(Orchestrator::new(store, queues.clone()));

    let handler = Arc::new(ExtractHandler {
        storage: cv_storage::open(&config.storage),
        fetcher: Arc::new(HttpFetcher { client: reqwest::Client::new() }),
        audio: Arc::new(FfmpegAudio),
    });

    run_worker(
        orchestrator,
        queues.extract.clone(),
        handler,
        WorkerOptions::with_concurrency(config.extract_concurrency)
            .drain_deadline_secs(config.drain_deadline_secs),
        cv_app::shutdown_signal(),
    )
    .await?;
    Ok(())
}
