//! UPLOADED → DIARIZED: hand the derived audio to the diarization tool and
//! persist its JSON output. Requires the audio artifact: when the extract
//! phase couldn't produce audio, this phase fails fast for the operator
//! instead of regenerating cross-phase outputs.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cv_media::MediaError;
use cv_storage::{ArtifactStore, StorageConfig};
use cv_store::RedisMeetingStore;
use cv_types::{ArtifactKind, DiarizedTranscript, Meeting, MeetingPatch, Phase};
use cv_workflow::{run_worker, Orchestrator, PhaseError, PhaseHandler, QueueSet, WorkerOptions};
use serde::Deserialize;

mod scratch;

use scratch::ScratchDir;

#[derive(Debug, Clone, Deserialize)]
struct Config {
    redis_url: String,

    #[serde(default = "default_diarize_bin")]
    diarize_bin: String,

    /// Where per-job scratch directories are created.
    #[serde(default = "default_run_root")]
    diarize_run_root: PathBuf,

    #[serde(default = "default_drain_secs")]
    drain_deadline_secs: u64,

    #[serde(flatten)]
    storage: StorageConfig,
}

fn default_drain_secs() -> u64 {
    300
}

fn default_diarize_bin() -> String {
    "diarize".to_string()
}

fn default_run_root() -> PathBuf {
    std::env::temp_dir()
}

struct DiarizeHandler {
    storage: Arc<dyn ArtifactStore>,
    diarize_bin: String,
    run_root: PathBuf,
}

#[async_trait]
impl PhaseHandler for DiarizeHandler {
    fn expected_phase(&self) -> Phase {
        Phase::Uploaded
    }

    #[tracing::instrument(skip(self, meeting), fields(meeting_id = %meeting.id, step = "diarize"))]
    async fn produce(&self, meeting: &Meeting) -> Result<MeetingPatch, PhaseError> {
        let has_audio = self
            .storage
            .exists(ArtifactKind::DerivedAudio, &meeting.id)
            .await
            .map_err(PhaseError::transient)?;
        if !has_audio {
            return Err(PhaseError::Fatal(format!(
                "derived audio artifact missing for meeting {}; audio extraction likely failed upstream",
                meeting.id
            )));
        }

        let scratch = ScratchDir::create(&self.run_root, &meeting.id).map_err(PhaseError::transient)?;

        let audio_file = scratch.path().join("audio.m4a");
        self.storage
            .read_into(ArtifactKind::DerivedAudio, &meeting.id, &audio_file)
            .await
            .map_err(PhaseError::transient)?;

        let result_file = cv_media::diarization::run(&self.diarize_bin, &audio_file, scratch.path())
            .await
            .map_err(classify)?;

        // Validate the document before persisting it; a half-written file
        // from a crashed tool run should be retried, not published.
        let raw = tokio::fs::read(&result_file).await.map_err(PhaseError::transient)?;
        let transcript: DiarizedTranscript = serde_json::from_slice(&raw).map_err(|e| {
            PhaseError::Transient(format!("diarization output is not valid: {e}"))
        })?;
        tracing::info!(
            segments = transcript.segments.len(),
            speakers = transcript.speakers().len(),
            "diarization complete"
        );

        let rel = self
            .storage
            .write_from(&result_file, ArtifactKind::DerivedDiarized, &meeting.id)
            .await
            .map_err(PhaseError::transient)?;

        tracing::info!(path = %rel, "diarized transcript stored");
        Ok(MeetingPatch {
            diarized_path: Some(rel),
            ..Default::default()
        })
        // scratch drops here, removing the directory on success and failure alike
    }
}

fn classify(e: MediaError) -> PhaseError {
    match e {
        MediaError::ToolNotFound(_) => PhaseError::fatal(e),
        _ => PhaseError::transient(e),
    }
}

#[tokio::main]
async fn main() {
    cv_app::init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "diarize worker exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = cv_app::load_config()?;

    let store = Arc::new(RedisMeetingStore::connect(&config.redis_url).await?);
    let queues = QueueSet::connect_redis(&config.redis_url).await?;
    let orchestrator = Arc::new(Orchestrator::new(store, queues.clone()));

    let handler = Arc::new(DiarizeHandler {
        storage: cv_storage::open(&config.storage),
        diarize_bin: config.diarize_bin.clone(),
        run_root: config.diarize_run_root.clone(),
    });

    // Strictly one in-flight job: the tool owns the GPU.
    run_worker(
        orchestrator,
        queues.diarize.clone(),
        handler,
        WorkerOptions::with_concurrency(1).drain_deadline_secs(config.drain_deadline_secs),
        cv_app::shutdown_signal(),
    )
    .await?;
    Ok(())
}
