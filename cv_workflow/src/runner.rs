//! Shared phase-worker skeleton. Every worker binary is this loop plus a
//! `PhaseHandler` that produces the phase's artifacts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cv_queue::{Job, JobQueue};
use cv_types::{Meeting, MeetingPatch, Phase};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::{Orchestrator, WorkflowError};

/// Classification drives what happens to the meeting record: transient
/// failures only return the job to the queue for retry; fatal ones also park
/// the meeting in `FAILED` for operator attention.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

impl PhaseError {
    pub fn transient(e: impl std::fmt::Display) -> Self {
        PhaseError::Transient(e.to_string())
    }

    pub fn fatal(e: impl std::fmt::Display) -> Self {
        PhaseError::Fatal(e.to_string())
    }
}

#[async_trait]
pub trait PhaseHandler: Send + Sync {
    /// The phase a meeting must be in for this worker to touch it.
    fn expected_phase(&self) -> Phase;

    /// Do the work and return the fields to patch alongside the transition.
    async fn produce(&self, meeting: &Meeting) -> Result<MeetingPatch, PhaseError>;
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Upper bound on in-flight jobs.
    pub concurrency: usize,

    /// How long one dequeue call blocks before the loop re-checks shutdown.
    pub dequeue_timeout: Duration,

    /// How long to wait for in-flight jobs after the shutdown signal.
    pub drain_deadline: Duration,
}

impl WorkerOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        WorkerOptions {
            concurrency,
            dequeue_timeout: Duration::from_secs(5),
            drain_deadline: Duration::from_secs(300),
        }
    }

    pub fn drain_deadline_secs(mut self, secs: u64) -> Self {
        self.drain_deadline = Duration::from_secs(secs);
        self
    }
}

/// Consume `queue` until `shutdown` resolves, running up to
/// `options.concurrency` jobs at once, then drain.
pub async fn run_worker(
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn PhaseHandler>,
    options: WorkerOptions,
    shutdown: impl Future<Output = ()>,
) -> Result<(), WorkflowError> {
    tracing::info!(
        queue = queue.name(),
        concurrency = options.concurrency,
        "worker started"
    );

    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    let mut tasks: JoinSet<()> = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                tracing::error!(error = %e, "job task panicked");
            }
        }

        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job = tokio::select! {
            _ = &mut shutdown => {
                drop(permit);
                break;
            }
            job = queue.dequeue(options.dequeue_timeout) => job?,
        };

        let Some(job) = job else {
            drop(permit);
            continue;
        };

        let orchestrator = Arc::clone(&orchestrator);
        let queue = Arc::clone(&queue);
        let handler = Arc::clone(&handler);
        tasks.spawn(async move {
            let _permit = permit;
            process_job(&orchestrator, queue.as_ref(), handler.as_ref(), &job).await;
        });
    }

    tracing::info!(in_flight = tasks.len(), "shutting down, draining in-flight jobs");
    let drained = tokio::time::timeout(options.drain_deadline, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("drain deadline reached, aborting remaining jobs");
        tasks.shutdown().await;
    }

    Ok(())
}

/// One job through the skeleton: load → check phase → produce → advance.
pub async fn process_job(
    orchestrator: &Orchestrator,
    queue: &dyn JobQueue,
    handler: &dyn PhaseHandler,
    job: &Job,
) {
    let expected = handler.expected_phase();
    tracing::info!(meeting_id = %job.meeting_id, job_id = %job.id, step = "dequeue", attempt = job.attempts, "processing job");

    match execute(orchestrator, handler, job, expected).await {
        Ok(to) => {
            if let Err(e) = queue.complete(job).await {
                tracing::error!(meeting_id = %job.meeting_id, error = %e, "failed to mark job completed");
            }
            tracing::info!(meeting_id = %job.meeting_id, to = ?to, step = "done", "job finished");
        }
        Err(PhaseError::Transient(message)) => {
            tracing::warn!(meeting_id = %job.meeting_id, error = %message, "transient failure, leaving meeting untouched");
            if let Err(e) = queue.fail(job, &message).await {
                tracing::error!(meeting_id = %job.meeting_id, error = %e, "failed to mark job failed");
            }
        }
        Err(PhaseError::Fatal(message)) => {
            if let Err(e) = orchestrator.fail(&job.meeting_id, expected, &message).await {
                // The meeting may be gone entirely; the job record still carries the error.
                tracing::error!(meeting_id = %job.meeting_id, error = %e, "could not record meeting failure");
            }
            if let Err(e) = queue.fail(job, &message).await {
                tracing::error!(meeting_id = %job.meeting_id, error = %e, "failed to mark job failed");
            }
        }
    }
}

async fn execute(
    orchestrator: &Orchestrator,
    handler: &dyn PhaseHandler,
    job: &Job,
    expected: Phase,
) -> Result<Option<Phase>, PhaseError> {
    let meeting = orchestrator
        .store()
        .get(&job.meeting_id)
        .await
        .map_err(PhaseError::transient)?
        .ok_or_else(|| PhaseError::Fatal(format!("meeting {} not found", job.meeting_id)))?;

    if meeting.phase != expected {
        return Err(PhaseError::Fatal(format!(
            "meeting {} is in phase {}, worker expects {}",
            meeting.id, meeting.phase, expected
        )));
    }

    let patch = handler.produce(&meeting).await?;

    orchestrator
        .advance(&meeting.id, expected, patch)
        .await
        .map_err(PhaseError::transient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueSet;
    use cv_queue::{JobState, MemoryJobQueue};
    use cv_store::{MeetingStore, MemoryMeetingStore};

    struct StubHandler {
        expected: Phase,
        result: fn(&Meeting) -> Result<MeetingPatch, PhaseError>,
    }

    #[async_trait]
    impl PhaseHandler for StubHandler {
        fn expected_phase(&self) -> Phase {
            self.expected
        }

        async fn produce(&self, meeting: &Meeting) -> Result<MeetingPatch, PhaseError> {
            (self.result)(meeting)
        }
    }

    fn orchestrator() -> Arc<Orchestrator> {
        let store = Arc::new(MemoryMeetingStore::new());
        let queues = QueueSet {
            download: Arc::new(MemoryJobQueue::new("download")),
            extract: Arc::new(MemoryJobQueue::new("extract")),
            upload: Arc::new(MemoryJobQueue::new("upload")),
            diarize: Arc::new(MemoryJobQueue::new("diarize")),
        };
        Arc::new(Orchestrator::new(store, queues))
    }

    async fn seed(orchestrator: &Orchestrator, id: &str) {
        let meeting = Meeting::new(id, "City Commission - Regular", "2025-06-05 19:00", "https://example.test");
        orchestrator.store().insert_if_absent(&meeting).await.unwrap();
    }

    #[tokio::test]
    async fn successful_job_advances_and_completes() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;
        let queue = &orchestrator.queues().download;
        queue.enqueue("m1").await.unwrap();
        let job = queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();

        let handler = StubHandler {
            expected: Phase::Discovered,
            result: |_| {
                Ok(MeetingPatch {
                    raw_video_path: Some("raw/videos/m1.mp4".into()),
                    ..Default::default()
                })
            },
        };
        process_job(&orchestrator, queue.as_ref(), &handler, &job).await;

        let meeting = orchestrator.store().get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, Phase::Downloaded);
        assert_eq!(queue.counts().await.unwrap().completed, 1);
        assert_eq!(orchestrator.queues().extract.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn fatal_error_parks_meeting_in_failed() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;
        let queue = &orchestrator.queues().download;
        queue.enqueue("m1").await.unwrap();
        let job = queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();

        let handler = StubHandler {
            expected: Phase::Discovered,
            result: |_| Err(PhaseError::Fatal("source page gone".into())),
        };
        process_job(&orchestrator, queue.as_ref(), &handler, &job).await;

        let meeting = orchestrator.store().get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, Phase::Failed);
        assert_eq!(meeting.failed_at_phase, Some(Phase::Discovered));
        assert_eq!(meeting.error_message.as_deref(), Some("source page gone"));
    }

    #[tokio::test]
    async fn transient_error_leaves_meeting_untouched() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;
        let queue = &orchestrator.queues().download;
        queue.enqueue("m1").await.unwrap();
        let job = queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();

        let handler = StubHandler {
            expected: Phase::Discovered,
            result: |_| Err(PhaseError::Transient("connection reset".into())),
        };
        process_job(&orchestrator, queue.as_ref(), &handler, &job).await;

        let meeting = orchestrator.store().get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, Phase::Discovered);
        // Scheduled for retry.
        assert_eq!(queue.counts().await.unwrap().delayed, 1);
    }

    #[tokio::test]
    async fn wrong_phase_is_a_precondition_failure() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;
        let queue = &orchestrator.queues().extract;
        queue.enqueue("m1").await.unwrap();
        let job = queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();

        // Extract expects DOWNLOADED but the meeting is still DISCOVERED.
        let handler = StubHandler {
            expected: Phase::Downloaded,
            result: |_| Ok(MeetingPatch::default()),
        };
        process_job(&orchestrator, queue.as_ref(), &handler, &job).await;

        let meeting = orchestrator.store().get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, Phase::Failed);
        assert_eq!(meeting.failed_at_phase, Some(Phase::Downloaded));
    }

    #[tokio::test]
    async fn missing_meeting_fails_the_job() {
        let orchestrator = orchestrator();
        let queue = &orchestrator.queues().download;
        queue.enqueue("ghost").await.unwrap();
        let job = queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();

        let handler = StubHandler {
            expected: Phase::Discovered,
            result: |_| Ok(MeetingPatch::default()),
        };
        process_job(&orchestrator, queue.as_ref(), &handler, &job).await;

        let record = queue.job("download-ghost").await.unwrap().unwrap();
        assert!(record.error.as_deref().unwrap_or("").contains("not found"));
        assert_ne!(record.state, JobState::Completed);
    }

    #[tokio::test]
    async fn run_worker_drains_on_shutdown() {
        let orchestrator = orchestrator();
        seed(&orchestrator, "m1").await;
        let queue = Arc::clone(&orchestrator.queues().download);
        queue.enqueue("m1").await.unwrap();

        let handler: Arc<dyn PhaseHandler> = Arc::new(StubHandler {
            expected: Phase::Discovered,
            result: |_| Ok(MeetingPatch::default()),
        });

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let options = WorkerOptions {
            concurrency: 2,
            dequeue_timeout: Duration::from_millis(20),
            drain_deadline: Duration::from_secs(1),
        };
        let worker = tokio::spawn(run_worker(
            Arc::clone(&orchestrator),
            queue.clone(),
            handler,
            options,
            async move {
                let _ = rx.await;
            },
        ));

        // Give the worker time to pick up and finish the job, then stop it.
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(()).unwrap();
        worker.await.unwrap().unwrap();

        let meeting = orchestrator.store().get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, Phase::Downloaded);
    }
}
