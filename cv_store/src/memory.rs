//! In-process store used by tests and by single-process development runs.
//! Not durable; everything else about the contract holds.

use std::collections::HashMap;

use chrono::Utc;
use cv_types::{Meeting, MeetingPatch, Phase};
use tokio::sync::RwLock;

use crate::{date_score, InsertOutcome, MeetingStore, StoreError};

#[derive(Default)]
pub struct MemoryMeetingStore {
    meetings: RwLock<HashMap<String, Meeting>>,
}

impl MemoryMeetingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MeetingStore for MemoryMeetingStore {
    async fn get(&self, id: &str) -> Result<Option<Meeting>, StoreError> {
        Ok(self.meetings.read().await.get(id).cloned())
    }

    async fn get_by_phase(&self, phase: Phase) -> Result<Vec<Meeting>, StoreError> {
        let mut meetings: Vec<Meeting> = self
            .meetings
            .read()
            .await
            .values()
            .filter(|m| m.phase == phase)
            .cloned()
            .collect();
        meetings.sort_by_key(|m| date_score(&m.date));
        Ok(meetings)
    }

    async fn get_all(&self) -> Result<Vec<Meeting>, StoreError> {
        let mut meetings: Vec<Meeting> = self.meetings.read().await.values().cloned().collect();
        meetings.sort_by_key(|m| date_score(&m.date));
        Ok(meetings)
    }

    async fn insert_if_absent(&self, meeting: &Meeting) -> Result<InsertOutcome, StoreError> {
        let mut meetings = self.meetings.write().await;
        if meetings.contains_key(&meeting.id) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        meetings.insert(meeting.id.clone(), meeting.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn update(&self, id: &str, phase: Phase, patch: &MeetingPatch) -> Result<(), StoreError> {
        let mut meetings = self.meetings.write().await;
        let meeting = meetings
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply_to(meeting);
        meeting.phase = phase;
        meeting.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meeting(id: &str, date: &str) -> Meeting {
        Meeting::new(id, "City Commission - Regular", date, "https://example.test")
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let store = MemoryMeetingStore::new();
        let m = meeting("m1", "2025-06-05 19:00");

        assert_eq!(store.insert_if_absent(&m).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_if_absent(&m).await.unwrap(), InsertOutcome::AlreadyPresent);
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_moves_between_phase_views() {
        let store = MemoryMeetingStore::new();
        store.insert_if_absent(&meeting("m1", "2025-06-05 19:00")).await.unwrap();

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
    }

    #[tokio::test]
    async fn update_of_unknown_meeting_errors() {
        let store = MemoryMeetingStore::new();
        let err = store
            .update("ghost", Phase::Failed, &MeetingPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn listings_are_date_ordered() {
        let store = MemoryMeetingStore::new();
        store.insert_if_absent(&meeting("later", "2025-06-12 19:00")).await.unwrap();
        store.insert_if_absent(&meeting("earlier", "2025-06-05 19:00")).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all[0].id, "earlier");
        assert_eq!(all[1].id, "later");
    }
}
