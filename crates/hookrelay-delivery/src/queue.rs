use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::policy::RetentionPolicy;
use crate::types::{DeliveryJob, JobStatus, QueueStats};

/// Storage trait for the delivery queue.
///
/// State transitions reported by workers (`complete`, `schedule_retry`,
/// `fail`) only apply to jobs that are still `Active`; they return `false`
/// when the job was already recovered as stalled or finished elsewhere.
///
/// Timing arguments are relative. Each backend measures them against the
/// same clock it stamps `claimed_at` with, so worker hosts never need to
/// agree with the store about the current time.
#[async_trait]
pub trait DeliveryQueueStorage: Send + Sync {
    /// Add a waiting job to the queue
    async fn enqueue(&self, job: &DeliveryJob) -> Result<()>;

    /// Atomically claim up to `limit` claimable jobs, marking them active.
    ///
    /// Delayed jobs whose backoff has elapsed are promoted to waiting first.
    /// No job is ever handed to two callers.
    async fn claim(&self, limit: usize) -> Result<Vec<DeliveryJob>>;

    /// Mark an active job as delivered, counting the attempt
    async fn complete(&self, id: Uuid) -> Result<bool>;

    /// Count the failed attempt and park the job for `delay`
    async fn schedule_retry(&self, id: Uuid, delay: Duration, error: &str) -> Result<bool>;

    /// Count the failed attempt and mark the job permanently failed
    async fn fail(&self, id: Uuid, error: &str) -> Result<bool>;

    /// Return active jobs claimed more than `stall_timeout` ago to waiting,
    /// without counting an attempt. Returns the recovered job ids.
    async fn requeue_stalled(&self, stall_timeout: Duration) -> Result<Vec<Uuid>>;

    /// Evict the oldest finished jobs beyond the retention limits.
    /// Returns the number of jobs removed.
    async fn trim_history(&self, retention: &RetentionPolicy) -> Result<u64>;

    /// Get a job by ID
    async fn get(&self, id: Uuid) -> Result<Option<DeliveryJob>>;

    /// Get jobs by status for monitoring, most recently updated first
    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<DeliveryJob>>;

    /// Get job counts by state. Never mutates the queue.
    async fn stats(&self) -> Result<QueueStats>;
}
