//! In-memory delivery queue.
//!
//! A single mutex guards all queue state, which makes `claim` trivially
//! atomic. Jobs do not survive a restart; use the PostgreSQL queue where
//! durability matters.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{DeliveryError, Result};
use crate::policy::RetentionPolicy;
use crate::queue::DeliveryQueueStorage;
use crate::types::{DeliveryJob, JobStatus, QueueStats};

/// Delayed job entry. Reverse ordering turns `BinaryHeap` into a min-heap.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledJob {
    available_at: OffsetDateTime,
    id: Uuid,
}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .available_at
            .cmp(&self.available_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, DeliveryJob>,
    ready: VecDeque<Uuid>,
    scheduled: BinaryHeap<ScheduledJob>,
    /// Finished jobs in completion order, oldest first
    completed: VecDeque<Uuid>,
    failed: VecDeque<Uuid>,
}

impl QueueState {
    fn promote_due(&mut self, now: OffsetDateTime) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.available_at > now {
                break;
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if let Some(job) = self.jobs.get_mut(&entry.id)
                && job.status == JobStatus::Delayed
            {
                job.status = JobStatus::Waiting;
                job.updated_at = now;
                self.ready.push_back(entry.id);
            }
        }
    }

    fn active_job(&mut self, id: Uuid) -> Result<Option<&mut DeliveryJob>> {
        let job = self
            .jobs
            .get_mut(&id)
            .ok_or(DeliveryError::JobNotFound(id))?;
        Ok((job.status == JobStatus::Active).then_some(job))
    }

    fn evict_oldest(&mut self, status: JobStatus, keep: usize) -> u64 {
        let list = match status {
            JobStatus::Completed => &mut self.completed,
            _ => &mut self.failed,
        };
        let mut removed = 0;
        while list.len() > keep {
            if let Some(id) = list.pop_front() {
                self.jobs.remove(&id);
                removed += 1;
            }
        }
        removed
    }
}

/// Delivery queue held in process memory.
#[derive(Default)]
pub struct InMemoryDeliveryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryDeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryQueueStorage for InMemoryDeliveryQueue {
    async fn enqueue(&self, job: &DeliveryJob) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(DeliveryError::Storage(format!(
                "job {} is already queued",
                job.id
            )));
        }
        let mut job = job.clone();
        job.status = JobStatus::Waiting;
        state.ready.push_back(job.id);
        state.jobs.insert(job.id, job);
        Ok(())
    }

    async fn claim(&self, limit: usize) -> Result<Vec<DeliveryJob>> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock().await;
        state.promote_due(now);

        let mut claimed = Vec::new();
        let mut skipped = VecDeque::new();
        while claimed.len() < limit {
            let Some(id) = state.ready.pop_front() else {
                break;
            };
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Waiting {
                continue;
            }
            if job.available_at > now {
                skipped.push_back(id);
                continue;
            }
            job.status = JobStatus::Active;
            job.claimed_at = Some(now);
            job.updated_at = now;
            claimed.push(job.clone());
        }
        while let Some(id) = skipped.pop_back() {
            state.ready.push_front(id);
        }
        Ok(claimed)
    }

    async fn complete(&self, id: Uuid) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock().await;
        let Some(job) = state.active_job(id)? else {
            return Ok(false);
        };
        job.attempts += 1;
        job.status = JobStatus::Completed;
        job.claimed_at = None;
        job.finished_at = Some(now);
        job.updated_at = now;
        state.completed.push_back(id);
        Ok(true)
    }

    async fn schedule_retry(&self, id: Uuid, delay: Duration, error: &str) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        let available_at = now + delay;
        let mut state = self.state.lock().await;
        let Some(job) = state.active_job(id)? else {
            return Ok(false);
        };
        job.attempts += 1;
        job.status = JobStatus::Delayed;
        job.claimed_at = None;
        job.last_error = Some(error.to_string());
        job.available_at = available_at;
        job.updated_at = now;
        state.scheduled.push(ScheduledJob { available_at, id });
        Ok(true)
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock().await;
        let Some(job) = state.active_job(id)? else {
            return Ok(false);
        };
        job.attempts += 1;
        job.status = JobStatus::Failed;
        job.claimed_at = None;
        job.last_error = Some(error.to_string());
        job.finished_at = Some(now);
        job.updated_at = now;
        state.failed.push_back(id);
        Ok(true)
    }

    async fn requeue_stalled(&self, stall_timeout: Duration) -> Result<Vec<Uuid>> {
        let now = OffsetDateTime::now_utc();
        let claimed_before = now - stall_timeout;
        let mut state = self.state.lock().await;
        let mut recovered: Vec<(OffsetDateTime, Uuid)> = state
            .jobs
            .values_mut()
            .filter(|job| {
                job.status == JobStatus::Active
                    && job.claimed_at.is_some_and(|at| at < claimed_before)
            })
            .map(|job| {
                let claimed_at = job.claimed_at.unwrap_or(now);
                job.status = JobStatus::Waiting;
                job.claimed_at = None;
                job.available_at = now;
                job.updated_at = now;
                (claimed_at, job.id)
            })
            .collect();
        recovered.sort();
        for (_, id) in recovered.iter().rev() {
            state.ready.push_front(*id);
        }
        Ok(recovered.into_iter().map(|(_, id)| id).collect())
    }

    async fn trim_history(&self, retention: &RetentionPolicy) -> Result<u64> {
        let mut state = self.state.lock().await;
        let removed = state.evict_oldest(JobStatus::Completed, retention.keep_completed)
            + state.evict_oldest(JobStatus::Failed, retention.keep_failed);
        Ok(removed)
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeliveryJob>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<DeliveryJob>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Waiting => stats.waiting += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Delayed => stats.delayed += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
