//! The full state machine over the redis-backed store and queues. Requires a
//! container runtime; run with `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cv_queue::{JobQueue, RedisJobQueue};
use cv_store::{MeetingStore, RedisMeetingStore};
use cv_types::{Meeting, MeetingPatch, Phase};
use cv_workflow::{process_job, Orchestrator, PhaseError, PhaseHandler, QueueSet};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

struct StubPhase {
    expected: Phase,
    patch: MeetingPatch,
}

#[async_trait]
impl PhaseHandler for StubPhase {
    fn expected_phase(&self) -> Phase {
        self.expected
    }

    async fn produce(&self, _meeting: &Meeting) -> Result<MeetingPatch, PhaseError> {
        Ok(self.patch.clone())
    }
}

#[tokio::test]
#[ignore]
async fn happy_path_over_redis() {
    let container = Redis::default()
        .start()
        .await
        .expect("failed to start redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("failed to get redis port");
    let url = format!("redis://127.0.0.1:{port}");

    let store = Arc::new(RedisMeetingStore::connect(&url).await.unwrap());
    let queues = QueueSet::connect_redis(&url).await.unwrap();
    let orchestrator = Orchestrator::new(store, queues.clone());

    // Discovery's contribution.
    let meeting = Meeting::new("m1", "City Commission - Regular", "2025-06-05 19:00", "https://city.example/m1");
    orchestrator.store().insert_if_absent(&meeting).await.unwrap();
    queues.download.enqueue("m1").await.unwrap();

    let stages: [(&Arc<dyn JobQueue>, Phase, Phase); 4] = [
        (&queues.download, Phase::Discovered, Phase::Downloaded),
        (&queues.extract, Phase::Downloaded, Phase::Extracted),
        (&queues.upload, Phase::Extracted, Phase::Uploaded),
        (&queues.diarize, Phase::Uploaded, Phase::Diarized),
    ];

    for (queue, expected, after) in stages {
        let job = queue
            .dequeue(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("job should be waiting");
        let handler = StubPhase { expected, patch: MeetingPatch::default() };
        process_job(&orchestrator, queue.as_ref(), &handler, &job).await;

        let meeting = orchestrator.store().get("m1").await.unwrap().unwrap();
        assert_eq!(meeting.phase, after);
        assert_eq!(queue.counts().await.unwrap().completed, 1);
    }

    // Terminal: every queue drained.
    for queue in queues.iter() {
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.waiting + counts.active + counts.delayed, 0);
    }

    // The phase index followed the meeting.
    let diarized = orchestrator.store().get_by_phase(Phase::Diarized).await.unwrap();
    assert_eq!(diarized.len(), 1);
    assert!(orchestrator.store().get_by_phase(Phase::Discovered).await.unwrap().is_empty());
}
