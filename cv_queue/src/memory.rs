//! In-process queue with the same semantics as the redis implementation,
//! used by tests and single-process development runs.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    job_id, EnqueueOutcome, FailOutcome, Job, JobQueue, JobState, QueueCounts, QueueError,
    RetryPolicy, COMPLETED_RETENTION, FAILED_RETENTION,
};

#[derive(Default)]
struct Inner {
    waiting: VecDeque<String>,
    active: Vec<String>,
    completed: VecDeque<String>,
    failed: VecDeque<String>,
    /// (ready at epoch ms, job id)
    delayed: Vec<(i64, String)>,
    jobs: HashMap<String, Job>,
}

pub struct MemoryJobQueue {
    name: String,
    policy: RetryPolicy,
    inner: Mutex<Inner>,
}

impl MemoryJobQueue {
    pub fn new(name: &str) -> Self {
        Self::with_policy(name, RetryPolicy::default())
    }

    pub fn with_policy(name: &str, policy: RetryPolicy) -> Self {
        MemoryJobQueue {
            name: name.to_string(),
            policy,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn promote_due(inner: &mut Inner) {
        let now = Utc::now().timestamp_millis();
        let mut remaining = Vec::new();
        for (ready_at, id) in inner.delayed.drain(..) {
            if ready_at <= now {
                if let Some(job) = inner.jobs.get_mut(&id) {
                    job.state = JobState::Waiting;
                    job.last_updated = Utc::now();
                }
                inner.waiting.push_back(id);
            } else {
                remaining.push((ready_at, id));
            }
        }
        inner.delayed = remaining;
    }
}

#[async_trait::async_trait]
impl JobQueue for MemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, meeting_id: &str) -> Result<EnqueueOutcome, QueueError> {
        let id = job_id(&self.name, meeting_id);
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.jobs.get(&id) {
            if matches!(existing.state, JobState::Waiting | JobState::Active | JobState::Delayed) {
                return Ok(EnqueueOutcome::Deduplicated);
            }
        }

        inner.completed.retain(|j| j != &id);
        inner.failed.retain(|j| j != &id);

        let now = Utc::now();
        inner.jobs.insert(
            id.clone(),
            Job {
                id: id.clone(),
                meeting_id: meeting_id.to_string(),
                state: JobState::Waiting,
                attempts: 0,
                max_attempts: self.policy.max_attempts,
                error: None,
                enqueued_at: now,
                last_updated: now,
            },
        );
        inner.waiting.push_back(id);
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                Self::promote_due(&mut inner);
                if let Some(id) = inner.waiting.pop_front() {
                    inner.active.push(id.clone());
                    let job = inner
                        .jobs
                        .get_mut(&id)
                        .ok_or_else(|| QueueError::Corrupt(format!("dequeued job {id} has no record")))?;
                    job.state = JobState::Active;
                    job.last_updated = Utc::now();
                    return Ok(Some(job.clone()));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn complete(&self, job: &Job) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.active.retain(|j| j != &job.id);
        if let Some(record) = inner.jobs.get_mut(&job.id) {
            record.state = JobState::Completed;
            record.last_updated = Utc::now();
        }
        inner.completed.push_front(job.id.clone());
        while inner.completed.len() > COMPLETED_RETENTION {
            if let Some(evicted) = inner.completed.pop_back() {
                inner.jobs.remove(&evicted);
            }
        }
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> Result<FailOutcome, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.active.retain(|j| j != &job.id);

        let (attempts, max_attempts) = {
            let record = inner
                .jobs
                .get_mut(&job.id)
                .ok_or_else(|| QueueError::Corrupt(format!("failed job {} has no record", job.id)))?;
            record.attempts += 1;
            record.error = Some(error.to_string());
            record.last_updated = Utc::now();
            (record.attempts, record.max_attempts)
        };

        if attempts < max_attempts {
            let delay = self.policy.delay_for_attempt(attempts);
            if let Some(record) = inner.jobs.get_mut(&job.id) {
                record.state = JobState::Delayed;
            }
            inner
                .delayed
                .push((Utc::now().timestamp_millis() + delay.as_millis() as i64, job.id.clone()));
            Ok(FailOutcome::Retrying { attempt: attempts, delay })
        } else {
            if let Some(record) = inner.jobs.get_mut(&job.id) {
                record.state = JobState::Failed;
            }
            inner.failed.push_front(job.id.clone());
            while inner.failed.len() > FAILED_RETENTION {
                if let Some(evicted) = inner.failed.pop_back() {
                    inner.jobs.remove(&evicted);
                }
            }
            Ok(FailOutcome::Exhausted)
        }
    }

    async fn jobs(&self, state: JobState, limit: usize) -> Result<Vec<Job>, QueueError> {
        let inner = self.inner.lock().await;
        let ids: Vec<String> = match state {
            JobState::Waiting => inner.waiting.iter().cloned().collect(),
            JobState::Active => inner.active.clone(),
            JobState::Completed => inner.completed.iter().cloned().collect(),
            JobState::Failed => inner.failed.iter().cloned().collect(),
            JobState::Delayed => inner.delayed.iter().map(|(_, id)| id.clone()).collect(),
        };
        let mut jobs: Vec<Job> = ids.iter().filter_map(|id| inner.jobs.get(id).cloned()).collect();
        if limit > 0 {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn job(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.inner.lock().await.jobs.get(job_id).cloned())
    }

    async fn retry(&self, job_id: &str) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(job_id) {
            Some(record) if record.state == JobState::Failed => {
                record.state = JobState::Waiting;
                record.attempts = 0;
                record.error = None;
                record.last_updated = Utc::now();
                let id = job_id.to_string();
                inner.failed.retain(|j| j != &id);
                inner.waiting.push_back(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, job_id: &str) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.remove(job_id).is_none() {
            return Ok(false);
        }
        inner.waiting.retain(|j| j != job_id);
        inner.active.retain(|j| j != job_id);
        inner.completed.retain(|j| j != job_id);
        inner.failed.retain(|j| j != job_id);
        inner.delayed.retain(|(_, j)| j != job_id);
        Ok(true)
    }

    async fn clean(&self, state: JobState, min_age: Duration) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(min_age).unwrap_or(chrono::Duration::zero());
        let stale: Vec<String> = self
            .jobs(state, 0)
            .await?
            .into_iter()
            .filter(|j| j.last_updated < cutoff)
            .map(|j| j.id)
            .collect();
        let mut removed = 0;
        for id in stale {
            if self.remove(&id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self, state: JobState) -> Result<u64, QueueError> {
        let ids: Vec<String> = self.jobs(state, 0).await?.into_iter().map(|j| j.id).collect();
        let mut removed = 0;
        for id in ids {
            if self.remove(&id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let inner = self.inner.lock().await;
        Ok(QueueCounts {
            waiting: inner.waiting.len() as u64,
            active: inner.active.len() as u64,
            completed: inner.completed.len() as u64,
            failed: inner.failed.len() as u64,
            delayed: inner.delayed.len() as u64,
        })
    }
}
