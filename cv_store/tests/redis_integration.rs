//! Exercises the redis-backed store against a real redis server. Requires a
//! container runtime; run with `cargo test -- --ignored`.

use cv_store::{InsertOutcome, MeetingStore, RedisMeetingStore};
use cv_types::{Meeting, MeetingPatch, Phase};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

#[tokio::test]
#[ignore]
async fn insert_update_and_indexes() {
    let container = Redis::default()
        .start()
        .await
        .expect("failed to start redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("failed to get redis port");
    let store = RedisMeetingStore::connect(&format!("redis://127.0.0.1:{port}"))
        .await
        .unwrap();

    let meeting = Meeting::new("m1", "City Commission - Regular", "2025-06-05 19:00", "https://example.test/m1");
    assert_eq!(store.insert_if_absent(&meeting).await.unwrap(), InsertOutcome::Inserted);
    assert_eq!(store.insert_if_absent(&meeting).await.unwrap(), InsertOutcome::AlreadyPresent);

    let loaded = store.get("m1").await.unwrap().unwrap();
    assert_eq!(loaded.phase, Phase::Discovered);

    store
        .update(
            "m1",
            Phase::Downloaded,
            &MeetingPatch {
                raw_video_path: Some("raw/videos/m1.mp4".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(store.get_by_phase(Phase::Discovered).await.unwrap().is_empty());
    let downloaded = store.get_by_phase(Phase::Downloaded).await.unwrap();
    assert_eq!(downloaded.len(), 1);
    assert_eq!(downloaded[0].raw_video_path.as_deref(), Some("raw/videos/m1.mp4"));
    assert!(downloaded[0].updated_at >= downloaded[0].created_at);

    let all = store.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
}
