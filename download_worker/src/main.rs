//! DISCOVERED → DOWNLOADED: pull the meeting video from its source page with
//! the external downloader and persist it as the raw video artifact.

use std::sync::Arc;

use async_trait::async_trait;
use cv_media::MediaError;
use cv_storage::{ArtifactStore, StorageConfig};
use cv_store::RedisMeetingStore;
use cv_types::{ArtifactKind, Meeting, MeetingPatch, Phase};
use cv_workflow::{run_worker, Orchestrator, PhaseError, PhaseHandler, QueueSet, WorkerOptions};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct Config {
    redis_url: String,

    #[serde(default = "default_downloader")]
    downloader_bin: String,

    /// External downloads saturate the uplink quickly; two at once is plenty.
    #[serde(default = "default_concurrency")]
    download_concurrency: usize,

    #[serde(default = "default_drain_secs")]
    drain_deadline_secs: u64,

    #[serde(flatten)]
    storage: StorageConfig,
}

fn default_downloader() -> String {
    "yt-dlp".to_string()
}

fn default_concurrency() -> usize {
    2
}

fn default_drain_secs() -> u64 {
    300
}

struct DownloadHandler {
    storage: Arc<dyn ArtifactStore>,
    downloader_bin: String,
}

#[async_trait]
impl PhaseHandler for DownloadHandler {
    fn expected_phase(&self) -> Phase {
        Phase::Discovered
    }

    #[tracing::instrument(skip(self, meeting), fields(meeting_id = %meeting.id, step = "download"))]
    async fn produce(&self, meeting: &Meeting) -> Result<MeetingPatch, PhaseError> {
        let scratch = tempfile::tempdir().map_err(PhaseError::transient)?;
        let video_path = scratch.path().join("video.mp4");

        cv_media::video_download::download(&self.downloader_bin, &meeting.source_url, &video_path)
            .await
            .map_err(classify)?;

        let rel = self
            .storage
            .write_from(&video_path, ArtifactKind::RawVideo, &meeting.id)
            .await
            .map_err(PhaseError::transient)?;

        tracing::info!(path = %rel, "raw video stored");
        Ok(MeetingPatch {
            raw_video_path: Some(rel),
            ..Default::default()
        })
    }
}

fn classify(e: MediaError) -> PhaseError {
    match e {
        // A missing downloader binary won't fix itself with retries.
        MediaError::ToolNotFound(_) => PhaseError::fatal(e),
        _ => PhaseError::transient(e),
    }
}

#[tokio::main]
async fn main() {
    cv_app::init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "download worker exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = cv_app::load_config()?;

    let store = Arc::new(RedisMeetingStore::connect(&config.redis_url).await?);
    let queues = QueueSet::connect_redis(&config.redis_url).await?;
    let orchestrator = Arc::new(Orchestrator::new(store, queues.clone()));

    let handler = Arc::new(DownloadHandler {
        storage: cv_storage::open(&config.storage),
        downloader_bin: config.downloader_bin.clone(),
    });

    run_worker(
        orchestrator,
        queues.download.clone(),
        handler,
        WorkerOptions::with_concurrency(config.download_concurrency)
            .drain_deadline_secs(config.drain_deadline_secs),
        cv_app::shutdown_signal(),
    )
    .await?;
    Ok(())
}
