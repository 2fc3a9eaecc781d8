//! The pipeline state machine. The orchestrator is the only writer of meeting
//! records after discovery: workers hand it a patch, it records the transition
//! and seeds the next phase's job.

use std::sync::Arc;

use cv_queue::{EnqueueOutcome, JobQueue, JobState, QueueError};
use cv_store::{MeetingStore, StoreError};
use cv_types::{MeetingPatch, Phase};
use tracing::instrument;

pub mod runner;

pub use runner::{process_job, run_worker, PhaseError, PhaseHandler, WorkerOptions};

/// Queue names, in pipeline order.
pub const QUEUE_NAMES: [&str; 4] = ["download", "extract", "upload", "diarize"];

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("phase {0} has no driving queue")]
    NotRestartable(Phase),
}

/// Successor phase on a successful transition out of `from`.
pub fn next_phase(from: Phase) -> Option<Phase> {
    match from {
        Phase::Discovered => Some(Phase::Downloaded),
        Phase::Downloaded => Some(Phase::Extracted),
        Phase::Extracted => Some(Phase::Uploaded),
        Phase::Uploaded => Some(Phase::Diarized),
        Phase::Diarized | Phase::Failed => None,
    }
}

/// Name of the queue whose worker drives the transition out of `phase`.
pub fn driving_queue(phase: Phase) -> Option<&'static str> {
    match phase {
        Phase::Discovered => Some("download"),
        Phase::Downloaded => Some("extract"),
        Phase::Extracted => Some("upload"),
        Phase::Uploaded => Some("diarize"),
        Phase::Diarized | Phase::Failed => None,
    }
}

/// One handle per workflow queue.
#[derive(Clone)]
pub struct QueueSet {
    pub download: Arc<dyn JobQueue>,
    pub extract: Arc<dyn JobQueue>,
    pub upload: Arc<dyn JobQueue>,
    pub diarize: Arc<dyn JobQueue>,
}

impl QueueSet {
    /// Open all four workflow queues against one redis instance.
    pub async fn connect_redis(redis_url: &str) -> Result<Self, QueueError> {
        Ok(QueueSet {
            download: Arc::new(cv_queue::RedisJobQueue::connect(redis_url, "download").await?),
            extract: Arc::new(cv_queue::RedisJobQueue::connect(redis_url, "extract").await?),
            upload: Arc::new(cv_queue::RedisJobQueue::connect(redis_url, "upload").await?),
            diarize: Arc::new(cv_queue::RedisJobQueue::connect(redis_url, "diarize").await?),
        })
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn JobQueue>> {
        match name {
            "download" => Some(&self.download),
            "extract" => Some(&self.extract),
            "upload" => Some(&self.upload),
            "diarize" => Some(&self.diarize),
            _ => None,
        }
    }

    /// The queue driving the transition out of `phase`.
    pub fn for_phase(&self, phase: Phase) -> Option<&Arc<dyn JobQueue>> {
        driving_queue(phase).and_then(|name| self.by_name(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn JobQueue>> {
        [&self.download, &self.extract, &self.upload, &self.diarize].into_iter()
    }
}

pub struct Orchestrator {
    store: Arc<dyn MeetingStore>,
    queues: QueueSet,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn MeetingStore>, queues: QueueSet) -> Self {
        Orchestrator { store, queues }
    }

    pub fn store(&self) -> &Arc<dyn MeetingStore> {
        &self.store
    }

    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }

    /// Record the transition out of `from` and enqueue the next phase's job.
    /// Terminal phases are a no-op. The store write and the enqueue are not
    /// atomic; the dedup key makes re-running this safe, and `reconcile`
    /// repairs the advanced-but-not-enqueued case.
    #[instrument(skip(self, patch), fields(meeting_id = %meeting_id, step = "advance"))]
    pub async fn advance(
        &self,
        meeting_id: &str,
        from: Phase,
        patch: MeetingPatch,
    ) -> Result<Option<Phase>, WorkflowError> {
        let Some(to) = next_phase(from) else {
            tracing::warn!(from = %from, "advance called on terminal phase, skipping");
            return Ok(None);
        };

        self.store.update(meeting_id, to, &patch).await?;
        tracing::info!(from = %from, to = %to, "phase transition recorded");

        if let Some(queue) = self.queues.for_phase(to) {
            queue.enqueue(meeting_id).await?;
        }
        Ok(Some(to))
    }

    /// Park the meeting in `FAILED`, recording where it happened so an
    /// operator can restart from that phase.
    #[instrument(skip(self), fields(meeting_id = %meeting_id, step = "fail"))]
    pub async fn fail(&self, meeting_id: &str, at: Phase, error: &str) -> Result<(), WorkflowError> {
        let patch = MeetingPatch {
            error_message: Some(error.to_string()),
            failed_at_phase: Some(at),
            ..Default::default()
        };
        self.store.update(meeting_id, Phase::Failed, &patch).await?;
        tracing::error!(at = %at, error, "meeting failed");
        Ok(())
    }

    /// Operator reset: put the meeting back in `from` and re-seed its job.
    #[instrument(skip(self), fields(meeting_id = %meeting_id, step = "restart"))]
    pub async fn restart(&self, meeting_id: &str, from: Phase) -> Result<(), WorkflowError> {
        let queue = self
            .queues
            .for_phase(from)
            .ok_or(WorkflowError::NotRestartable(from))?;
        self.store.update(meeting_id, from, &MeetingPatch::default()).await?;
        queue.enqueue(meeting_id).await?;
        tracing::info!(from = %from, "meeting restarted");
        Ok(())
    }

    /// Sweep for non-terminal meetings with no live job on their driving
    /// queue and enqueue one. Repairs the crash window between the store
    /// update and the enqueue in `advance`.
    #[instrument(skip(self), fields(step = "reconcile"))]
    pub async fn reconcile(&self) -> Result<u64, WorkflowError> {
        let mut seeded = 0;
        for meeting in self.store.get_all().await? {
            if meeting.phase.is_terminal() {
                continue;
            }
            let Some(queue) = self.queues.for_phase(meeting.phase) else {
                continue;
            };
            let id = cv_queue::job_id(queue.name(), &meeting.id);
            let live = match queue.job(&id).await? {
                Some(job) => matches!(
                    job.state,
                    JobState::Waiting | JobState::Active | JobState::Delayed
                ),
                None => false,
            };
            if !live && queue.enqueue(&meeting.id).await? == EnqueueOutcome::Enqueued {
                tracing::info!(meeting_id = %meeting.id, queue = queue.name(), "reconcile seeded missing job");
                seeded += 1;
            }
        }
        Ok(seeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_queue::MemoryJobQueue;
    use cv_store::MemoryMeetingStore;
    use cv_types::Meeting;
    use std::time::Duration;

    fn orchestrator() -> Orchestrator {
        let store = Arc::new(MemoryMeetingStore::new());
        let queues = QueueSet {
            download: Arc::new(MemoryJobQueue::new("download")),
            extract: Arc::new(MemoryJobQueue::new("extract")),
            upload: Arc::new(MemoryJobQueue::new("upload")),
            diarize: Arc::new(MemoryJobQueue::new("diarize")),
        };
        Orchestrator::new(store, queues)
    }

    async fn seed(orchestrator: &Orchestrator, id: &str) {
        let meeting = Meeting::new(id, "City Commission - Regular", "2025-06-05 19:00", "https://example.test");
        orchestrator.store().insert_if_absent(&meeting).await.unwrap();
    }

    #[test]
    fn transition_table_is_a_single_forward_chain() {
        assert_eq!(next_phase(Phase::Discovered), Some(Phase::Downloaded));
        assert_eq!(next_phase(Phase::Downloaded), Some(Phase::Extracted));
        assert_eq!(next_phase(Phase::Extracted), Some(Phase::Uploaded));
        assert_eq!(next_phase(Phase::Uploaded), Some(Phase::Diarized));
        assert_eq!(next_phase(Phase::Diarized), None);
        assert_eq!(next_phase(Phase::Failed), None);

        assert_eq!(driving_queue(Phase::Discovered), Some("download"));
        assert_eq!(driving_queue(Phase::Uploaded), Some("diarize"));
        assert_eq!(driving_queue(Phase::Diarized), None);
    }

    #[tokio::test]
    async fn advance_records_phase_and_seeds_next_queue() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;

        let to = orchestrator
            .advance("m1", Phase::Discovered, MeetingPatch::default())
            .await
            .unwrap();
        assert_eq!(to, Some(Phase::Downloaded));

        let meeting = orchestrator.store().get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, Phase::Downloaded);

        // The queue that drives DOWNLOADED -> EXTRACTED now holds the job.
        let counts = orchestrator.queues().extract.counts().await.unwrap();
        assert_eq!(counts.waiting, 1);
        let job = orchestrator.queues().extract.job("extract-m1").await.unwrap();
        assert!(job.is_some());
    }

    #[tokio::test]
    async fn advance_twice_yields_one_job() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;

        orchestrator.advance("m1", Phase::Discovered, MeetingPatch::default()).await.unwrap();
        orchestrator.advance("m1", Phase::Discovered, MeetingPatch::default()).await.unwrap();

        assert_eq!(orchestrator.queues().extract.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn advance_on_terminal_phase_is_a_no_op() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;

        let to = orchestrator
            .advance("m1", Phase::Diarized, MeetingPatch::default())
            .await
            .unwrap();
        assert_eq!(to, None);

        let meeting = orchestrator.store().get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, Phase::Discovered);
        for queue in orchestrator.queues().iter() {
            assert_eq!(queue.counts().await.unwrap().waiting, 0);
        }
    }

    #[tokio::test]
    async fn fail_records_the_failing_phase() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;

        orchestrator.fail("m1", Phase::Uploaded, "no audio artifact").await.unwrap();

        let meeting = orchestrator.store().get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, Phase::Failed);
        assert_eq!(meeting.failed_at_phase, Some(Phase::Uploaded));
        assert_eq!(meeting.error_message.as_deref(), Some("no audio artifact"));
    }

    #[tokio::test]
    async fn restart_resets_phase_and_enqueues() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;
        orchestrator.fail("m1", Phase::Downloaded, "boom").await.unwrap();

        orchestrator.restart("m1", Phase::Downloaded).await.unwrap();

        let meeting = orchestrator.store().get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, Phase::Downloaded);
        assert_eq!(orchestrator.queues().extract.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn reconcile_seeds_only_missing_jobs() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;
        seed(&orchestrator, "m2").await;

        // m1 has its download job; m2 lost it (simulated queue loss).
        orchestrator.queues().download.enqueue("m1").await.unwrap();

        let seeded = orchestrator.reconcile().await.unwrap();
        assert_eq!(seeded, 1);
        assert_eq!(orchestrator.queues().download.counts().await.unwrap().waiting, 2);

        // A second sweep finds nothing to do.
        assert_eq!(orchestrator.reconcile().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reconcile_skips_terminal_meetings() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;
        orchestrator.fail("m1", Phase::Extracted, "boom").await.unwrap();

        assert_eq!(orchestrator.reconcile().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dedup_holds_across_delayed_state() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;

        let queue = &orchestrator.queues().download;
        queue.enqueue("m1").await.unwrap();
        let job = queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
        queue.fail(&job, "flaky network").await.unwrap();

        // Delayed for retry: still deduplicated.
        assert_eq!(queue.enqueue("m1").await.unwrap(), EnqueueOutcome::Deduplicated);
    }
}
