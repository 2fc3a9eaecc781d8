//! Redis-backed meeting store. Each meeting is one JSON value under
//! `meeting:<id>`; secondary indexes are a set per phase and a date-ordered
//! zset. Multi-key writes run as Lua scripts so a reader never sees a record
//! and its indexes disagree.

use chrono::Utc;
use cv_types::{Meeting, MeetingPatch, Phase};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::{date_score, InsertOutcome, MeetingStore, StoreError};

const DATE_INDEX: &str = "meetings:by_date";

// KEYS: meeting, phase set, date zset; ARGV: json, id, score
const INSERT_IF_ABSENT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[2])
return 1
";

// KEYS: meeting, old phase set, new phase set; ARGV: json, id
const UPDATE_WITH_INDEX_MOVE: &str = r"
redis.call('SET', KEYS[1], ARGV[1])
if KEYS[2] ~= KEYS[3] then
  redis.call('SREM', KEYS[2], ARGV[2])
  redis.call('SADD', KEYS[3], ARGV[2])
end
return 1
";

pub struct RedisMeetingStore {
    con: ConnectionManager,
}

fn meeting_key(id: &str) -> String {
    format!("meeting:{id}")
}

fn phase_key(phase: Phase) -> String {
    format!("meetings:phase:{}", phase.as_str())
}

impl RedisMeetingStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let con = client.get_connection_manager().await?;
        Ok(RedisMeetingStore { con })
    }

    pub fn new(con: ConnectionManager) -> Self {
        RedisMeetingStore { con }
    }

    async fn fetch_many(&self, ids: Vec<String>) -> Result<Vec<Meeting>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut con = self.con.clone();
        let keys: Vec<String> = ids.iter().map(|id| meeting_key(id)).collect();
        let raw: Vec<Option<String>> = con.mget(keys).await?;

        let mut meetings = Vec::with_capacity(raw.len());
        for value in raw.into_iter().flatten() {
            meetings.push(serde_json::from_str(&value)?);
        }
        Ok(meetings)
    }
}

#[async_trait::async_trait]
impl MeetingStore for RedisMeetingStore {
    async fn get(&self, id: &str) -> Result<Option<Meeting>, StoreError> {
        let mut con = self.con.clone();
        let raw: Option<String> = con.get(meeting_key(id)).await?;
        match raw {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn get_by_phase(&self, phase: Phase) -> Result<Vec<Meeting>, StoreError> {
        let mut con = self.con.clone();
        let ids: Vec<String> = con.smembers(phase_key(phase)).await?;
        let mut meetings = self.fetch_many(ids).await?;
        meetings.sort_by_key(|m| date_score(&m.date));
        Ok(meetings)
    }

    async fn get_all(&self) -> Result<Vec<Meeting>, StoreError> {
        let mut con = self.con.clone();
        let ids: Vec<String> = con.zrange(DATE_INDEX, 0, -1).await?;
        self.fetch_many(ids).await
    }

    async fn insert_if_absent(&self, meeting: &Meeting) -> Result<InsertOutcome, StoreError> {
        let mut con = self.con.clone();
        let json = serde_json::to_string(meeting)?;
        let inserted: i64 = Script::new(INSERT_IF_ABSENT)
            .key(meeting_key(&meeting.id))
            .key(phase_key(meeting.phase))
            .key(DATE_INDEX)
            .arg(json)
            .arg(&meeting.id)
            .arg(date_score(&meeting.date))
            .invoke_async(&mut con)
            .await?;

        if inserted == 1 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyPresent)
        }
    }

    async fn update(&self, id: &str, phase: Phase, patch: &MeetingPatch) -> Result<(), StoreError> {
        let mut meeting = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let old_phase = meeting.phase;
        patch.apply_to(&mut meeting);
        meeting.phase = phase;
        meeting.updated_at = Utc::now();

        let mut con = self.con.clone();
        let json = serde_json::to_string(&meeting)?;
        let _: i64 = Script::new(UPDATE_WITH_INDEX_MOVE)
            .key(meeting_key(id))
            .key(phase_key(old_phase))
            .key(phase_key(phase))
            .arg(json)
            .arg(id)
            .invoke_async(&mut con)
            .await?;

        tracing::debug!(meeting_id = %id, from = %old_phase, to = %phase, "meeting updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic() {
        assert_eq!(meeting_key("m1"), "meeting:m1");
        assert_eq!(phase_key(Phase::Discovered), "meetings:phase:DISCOVERED");
        assert_eq!(phase_key(Phase::Failed), "meetings:phase:FAILED");
    }
}
