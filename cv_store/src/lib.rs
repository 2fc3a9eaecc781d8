//! Durable record of each meeting and its pipeline position. The store is the
//! single source of truth: losing the job queue or scratch files is always
//! recoverable from here.

use async_trait::async_trait;
use cv_types::{Meeting, MeetingPatch, Phase};

pub mod memory;
pub mod redis_store;

pub use memory::MemoryMeetingStore;
pub use redis_store::RedisMeetingStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("stored meeting record is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("meeting {0} not found")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

/// Contract every store implementation honors: updates are serialized by the
/// store and readers observe them atomically.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Meeting>, StoreError>;

    /// Meetings currently in `phase`, date-ascending.
    async fn get_by_phase(&self, phase: Phase) -> Result<Vec<Meeting>, StoreError>;

    /// Every meeting, date-ascending.
    async fn get_all(&self) -> Result<Vec<Meeting>, StoreError>;

    /// Idempotent insert; discovery calls this for every observed meeting.
    async fn insert_if_absent(&self, meeting: &Meeting) -> Result<InsertOutcome, StoreError>;

    /// Atomically set the phase, fold in the patch, and bump `updated_at`.
    async fn update(&self, id: &str, phase: Phase, patch: &MeetingPatch) -> Result<(), StoreError>;
}

/// Sort key for the date index: epoch milliseconds of the calendar date
/// string, 0 when it doesn't parse.
pub(crate) fn date_score(date: &str) -> i64 {
    use chrono::{NaiveDate, NaiveDateTime};

    let normalized = date.replace('/', "-");
    for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return dt.and_utc().timestamp_millis();
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(normalized.split_whitespace().next().unwrap_or(""), "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return dt.and_utc().timestamp_millis();
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_score_orders_calendar_dates() {
        let early = date_score("2025-06-05 19:00");
        let later = date_score("2025-06-12 19:00");
        assert!(early > 0);
        assert!(later > early);
        assert_eq!(date_score("not a date"), 0);
        assert!(date_score("2025/06/05 19:00") == early);
    }
}
