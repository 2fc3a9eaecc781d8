//! Persistent per-phase job queues with at-least-once delivery, retry with
//! exponential backoff, bounded completed/failed retention, and deterministic
//! job identifiers used as the dedup key. Workers must stay idempotent:
//! redelivery after a crash is always possible.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod redis_queue;

pub use memory::MemoryJobQueue;
pub use redis_queue::RedisJobQueue;

/// Retention caps for finished jobs, kept for operator visibility only.
pub const COMPLETED_RETENTION: usize = 100;
pub const FAILED_RETENTION: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("job record is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    pub fn parse(s: &str) -> Option<JobState> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "delayed" => Some(JobState::Delayed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic job identifier; enqueuing an identifier already live in
/// waiting/active/delayed is a no-op.
pub fn job_id(queue: &str, meeting_id: &str) -> String {
    format!("{queue}-{meeting_id}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub meeting_id: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl TryFrom<HashMap<String, String>> for Job {
    type Error = QueueError;

    fn try_from(data: HashMap<String, String>) -> Result<Self, Self::Error> {
        let field = |name: &str| {
            data.get(name)
                .cloned()
                .ok_or_else(|| QueueError::Corrupt(format!("missing field {name}")))
        };
        let timestamp = |name: &str| -> Result<DateTime<Utc>, QueueError> {
            field(name)?
                .parse::<DateTime<Utc>>()
                .map_err(|e| QueueError::Corrupt(format!("bad {name}: {e}")))
        };

        Ok(Job {
            id: field("id")?,
            meeting_id: field("meeting_id")?,
            state: JobState::parse(&field("state")?)
                .ok_or_else(|| QueueError::Corrupt("unknown state".to_string()))?,
            attempts: field("attempts")?
                .parse()
                .map_err(|e| QueueError::Corrupt(format!("bad attempts: {e}")))?,
            max_attempts: field("max_attempts")?
                .parse()
                .map_err(|e| QueueError::Corrupt(format!("bad max_attempts: {e}")))?,
            error: data.get("error").filter(|e| !e.is_empty()).cloned(),
            enqueued_at: timestamp("enqueued_at")?,
            last_updated: timestamp("last_updated")?,
        })
    }
}

/// Retry schedule: `initial_backoff * 2^(attempt-1)` between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Deduplicated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled onto the delayed set; will be promoted after the backoff.
    Retrying { attempt: u32, delay: Duration },
    /// Out of attempts; parked in the failed list.
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn enqueue(&self, meeting_id: &str) -> Result<EnqueueOutcome, QueueError>;

    /// Promote due delayed jobs, then move one waiting job to active. Returns
    /// `None` when nothing arrived within `timeout`.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError>;

    async fn complete(&self, job: &Job) -> Result<(), QueueError>;

    async fn fail(&self, job: &Job, error: &str) -> Result<FailOutcome, QueueError>;

    async fn jobs(&self, state: JobState, limit: usize) -> Result<Vec<Job>, QueueError>;

    async fn job(&self, job_id: &str) -> Result<Option<Job>, QueueError>;

    /// Move a failed job back to waiting with attempts reset.
    async fn retry(&self, job_id: &str) -> Result<bool, QueueError>;

    async fn remove(&self, job_id: &str) -> Result<bool, QueueError>;

    /// Drop jobs in `state` whose last update is older than `min_age`.
    async fn clean(&self, state: JobState, min_age: Duration) -> Result<u64, QueueError>;

    async fn clear(&self, state: JobState) -> Result<u64, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;
}
