//! Redis-backed queue. Waiting and active are lists bridged by `BLMOVE`, the
//! backoff schedule is a score-ordered delayed zset, and each job keeps a
//! hash record under a deterministic key. Multi-key moves run as Lua scripts
//! so a crash can't strand a job between states.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Script};
use tokio::sync::Mutex;

use crate::{
    job_id, EnqueueOutcome, FailOutcome, Job, JobQueue, JobState, QueueCounts, QueueError,
    RetryPolicy, COMPLETED_RETENTION, FAILED_RETENTION,
};

// KEYS: job, waiting, completed, failed
// ARGV: job_id, meeting_id, now, max_attempts
const ENQUEUE: &str = r"
local state = redis.call('HGET', KEYS[1], 'state')
if state == 'waiting' or state == 'active' or state == 'delayed' then
  return 0
end
redis.call('LREM', KEYS[3], 0, ARGV[1])
redis.call('LREM', KEYS[4], 0, ARGV[1])
redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1],
  'id', ARGV[1], 'meeting_id', ARGV[2], 'state', 'waiting',
  'attempts', 0, 'max_attempts', ARGV[4], 'error', '',
  'enqueued_at', ARGV[3], 'last_updated', ARGV[3])
redis.call('LPUSH', KEYS[2], ARGV[1])
return 1
";

// KEYS: delayed, waiting; ARGV: now_ms, now, job_prefix
const PROMOTE_DUE: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for i, id in ipairs(due) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('LPUSH', KEYS[2], id)
  redis.call('HSET', ARGV[3] .. id, 'state', 'waiting', 'last_updated', ARGV[2])
end
return #due
";

// KEYS: active, completed, job; ARGV: job_id, now, cap, job_prefix
const COMPLETE: &str = r"
redis.call('LREM', KEYS[1], 0, ARGV[1])
redis.call('HSET', KEYS[3], 'state', 'completed', 'last_updated', ARGV[2])
redis.call('LPUSH', KEYS[2], ARGV[1])
local evicted = redis.call('LRANGE', KEYS[2], tonumber(ARGV[3]), -1)
for i, id in ipairs(evicted) do
  redis.call('DEL', ARGV[4] .. id)
end
redis.call('LTRIM', KEYS[2], 0, tonumber(ARGV[3]) - 1)
return 1
";

// KEYS: active, delayed, failed, job
// ARGV: job_id, error, now, now_ms, initial_backoff_ms, cap, job_prefix
const FAIL: &str = r"
redis.call('LREM', KEYS[1], 0, ARGV[1])
local attempts = redis.call('HINCRBY', KEYS[4], 'attempts', 1)
local max = tonumber(redis.call('HGET', KEYS[4], 'max_attempts') or '3')
redis.call('HSET', KEYS[4], 'error', ARGV[2], 'last_updated', ARGV[3])
if attempts < max then
  local delay = tonumber(ARGV[5]) * 2 ^ (attempts - 1)
  redis.call('HSET', KEYS[4], 'state', 'delayed')
  redis.call('ZADD', KEYS[2], tonumber(ARGV[4]) + delay, ARGV[1])
  return delay
end
redis.call('HSET', KEYS[4], 'state', 'failed')
redis.call('LPUSH', KEYS[3], ARGV[1])
local evicted = redis.call('LRANGE', KEYS[3], tonumber(ARGV[6]), -1)
for i, id in ipairs(evicted) do
  if id ~= ARGV[1] then
    redis.call('DEL', ARGV[7] .. id)
  end
end
redis.call('LTRIM', KEYS[3], 0, tonumber(ARGV[6]) - 1)
return -1
";

// KEYS: job, failed, waiting; ARGV: job_id, now
const RETRY: &str = r"
if redis.call('HGET', KEYS[1], 'state') ~= 'failed' then
  return 0
end
redis.call('LREM', KEYS[2], 0, ARGV[1])
redis.call('HSET', KEYS[1], 'state', 'waiting', 'attempts', 0, 'error', '', 'last_updated', ARGV[2])
redis.call('LPUSH', KEYS[3], ARGV[1])
return 1
";

// KEYS: job, waiting, active, completed, failed, delayed; ARGV: job_id
const REMOVE: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('LREM', KEYS[2], 0, ARGV[1])
redis.call('LREM', KEYS[3], 0, ARGV[1])
redis.call('LREM', KEYS[4], 0, ARGV[1])
redis.call('LREM', KEYS[5], 0, ARGV[1])
redis.call('ZREM', KEYS[6], ARGV[1])
redis.call('DEL', KEYS[1])
return 1
";

pub struct RedisJobQueue {
    name: String,
    policy: RetryPolicy,
    con: ConnectionManager,
    /// Dedicated connection for `BLMOVE`: the blocking wait must not stall
    /// completions and failures issued by in-flight jobs.
    blocking: Mutex<MultiplexedConnection>,
}

impl RedisJobQueue {
    pub async fn connect(redis_url: &str, name: &str) -> Result<Self, QueueError> {
        Self::connect_with_policy(redis_url, name, RetryPolicy::default()).await
    }

    pub async fn connect_with_policy(
        redis_url: &str,
        name: &str,
        policy: RetryPolicy,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let con = client.get_connection_manager().await?;
        let blocking = client.get_multiplexed_async_connection().await?;
        Ok(RedisJobQueue {
            name: name.to_string(),
            policy,
            con,
            blocking: Mutex::new(blocking),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("queue:{}:{}", self.name, suffix)
    }

    fn job_key(&self, job_id: &str) -> String {
        format!("queue:{}:job:{}", self.name, job_id)
    }

    fn job_prefix(&self) -> String {
        format!("queue:{}:job:", self.name)
    }

    fn state_key(&self, state: JobState) -> String {
        self.key(state.as_str())
    }

    async fn fetch_job(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        let mut con = self.con.clone();
        let data: HashMap<String, String> = con.hgetall(self.job_key(job_id)).await?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(Job::try_from(data)?))
    }

    async fn promote_due(&self) -> Result<(), QueueError> {
        let mut con = self.con.clone();
        let _: i64 = Script::new(PROMOTE_DUE)
            .key(self.state_key(JobState::Delayed))
            .key(self.state_key(JobState::Waiting))
            .arg(Utc::now().timestamp_millis())
            .arg(Utc::now().to_rfc3339())
            .arg(self.job_prefix())
            .invoke_async(&mut con)
            .await?;
        Ok(())
    }

    async fn ids_in(&self, state: JobState, limit: usize) -> Result<Vec<String>, QueueError> {
        let mut con = self.con.clone();
        let stop = if limit == 0 { -1 } else { limit as isize - 1 };
        let ids: Vec<String> = match state {
            JobState::Delayed => con.zrange(self.state_key(state), 0, stop).await?,
            _ => con.lrange(self.state_key(state), 0, stop).await?,
        };
        Ok(ids)
    }
}

#[async_trait::async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, meeting_id: &str) -> Result<EnqueueOutcome, QueueError> {
        let id = job_id(&self.name, meeting_id);
        let mut con = self.con.clone();
        let added: i64 = Script::new(ENQUEUE)
            .key(self.job_key(&id))
            .key(self.state_key(JobState::Waiting))
            .key(self.state_key(JobState::Completed))
            .key(self.state_key(JobState::Failed))
            .arg(&id)
            .arg(meeting_id)
            .arg(Utc::now().to_rfc3339())
            .arg(self.policy.max_attempts)
            .invoke_async(&mut con)
            .await?;

        if added == 1 {
            tracing::info!(job_id = %id, queue = %self.name, "job enqueued");
            Ok(EnqueueOutcome::Enqueued)
        } else {
            tracing::debug!(job_id = %id, queue = %self.name, "job already pending, deduplicated");
            Ok(EnqueueOutcome::Deduplicated)
        }
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        self.promote_due().await?;

        let moved: Option<String> = {
            let mut blocking = self.blocking.lock().await;
            redis::cmd("BLMOVE")
                .arg(self.state_key(JobState::Waiting))
                .arg(self.state_key(JobState::Active))
                .arg("RIGHT")
                .arg("LEFT")
                .arg(timeout.as_secs_f64())
                .query_async(&mut *blocking)
                .await?
        };

        let Some(id) = moved else {
            return Ok(None);
        };

        let mut con = self.con.clone();
        let now = Utc::now().to_rfc3339();
        let _: () = con
            .hset_multiple(
                self.job_key(&id),
                &[("state", "active"), ("last_updated", now.as_str())],
            )
            .await?;

        self.fetch_job(&id)
            .await?
            .map(Some)
            .ok_or_else(|| QueueError::Corrupt(format!("dequeued job {id} has no record")))
    }

    async fn complete(&self, job: &Job) -> Result<(), QueueError> {
        let mut con = self.con.clone();
        let _: i64 = Script::new(COMPLETE)
            .key(self.state_key(JobState::Active))
            .key(self.state_key(JobState::Completed))
            .key(self.job_key(&job.id))
            .arg(&job.id)
            .arg(Utc::now().to_rfc3339())
            .arg(COMPLETED_RETENTION)
            .arg(self.job_prefix())
            .invoke_async(&mut con)
            .await?;
        tracing::info!(job_id = %job.id, queue = %self.name, "job completed");
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> Result<FailOutcome, QueueError> {
        let mut con = self.con.clone();
        let delay_ms: i64 = Script::new(FAIL)
            .key(self.state_key(JobState::Active))
            .key(self.state_key(JobState::Delayed))
            .key(self.state_key(JobState::Failed))
            .key(self.job_key(&job.id))
            .arg(&job.id)
            .arg(error)
            .arg(Utc::now().to_rfc3339())
            .arg(Utc::now().timestamp_millis())
            .arg(self.policy.initial_backoff.as_millis() as i64)
            .arg(FAILED_RETENTION)
            .arg(self.job_prefix())
            .invoke_async(&mut con)
            .await?;

        if delay_ms >= 0 {
            let outcome = FailOutcome::Retrying {
                attempt: job.attempts + 1,
                delay: Duration::from_millis(delay_ms as u64),
            };
            tracing::warn!(job_id = %job.id, queue = %self.name, delay_ms, error, "job failed, will retry");
            Ok(outcome)
        } else {
            tracing::error!(job_id = %job.id, queue = %self.name, error, "job failed permanently");
            Ok(FailOutcome::Exhausted)
        }
    }

    async fn jobs(&self, state: JobState, limit: usize) -> Result<Vec<Job>, QueueError> {
        let ids = self.ids_in(state, limit).await?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.fetch_job(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn job(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        self.fetch_job(job_id).await
    }

    async fn retry(&self, job_id: &str) -> Result<bool, QueueError> {
        let mut con = self.con.clone();
        let moved: i64 = Script::new(RETRY)
            .key(self.job_key(job_id))
            .key(self.state_key(JobState::Failed))
            .key(self.state_key(JobState::Waiting))
            .arg(job_id)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut con)
            .await?;
        Ok(moved == 1)
    }

    async fn remove(&self, job_id: &str) -> Result<bool, QueueError> {
        let mut con = self.con.clone();
        let removed: i64 = Script::new(REMOVE)
            .key(self.job_key(job_id))
            .key(self.state_key(JobState::Waiting))
            .key(self.state_key(JobState::Active))
            .key(self.state_key(JobState::Completed))
            .key(self.state_key(JobState::Failed))
            .key(self.state_key(JobState::Delayed))
            .arg(job_id)
            .invoke_async(&mut con)
            .await?;
        Ok(removed == 1)
    }

    async fn clean(&self, state: JobState, min_age: Duration) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(min_age).unwrap_or(chrono::Duration::zero());
        let mut removed = 0;
        for job in self.jobs(state, 0).await? {
            if job.last_updated < cutoff && self.remove(&job.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self, state: JobState) -> Result<u64, QueueError> {
        let mut removed = 0;
        for id in self.ids_in(state, 0).await? {
            if self.remove(&id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut con = self.con.clone();
        let (waiting, active, completed, failed, delayed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .llen(self.state_key(JobState::Waiting))
                .llen(self.state_key(JobState::Active))
                .llen(self.state_key(JobState::Completed))
                .llen(self.state_key(JobState::Failed))
                .zcard(self.state_key(JobState::Delayed))
                .query_async(&mut con)
                .await?;
        Ok(QueueCounts { waiting, active, completed, failed, delayed })
    }
}
