//! Background delivery workers.
//!
//! A [`WorkerPool`] runs `workers` independent claim-deliver-report loops
//! plus one maintenance loop that recovers stalled jobs and trims finished
//! history. All loops stop claiming as soon as shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::channel::DeliveryChannel;
use crate::metrics::{self, DeliveryOutcome};
use crate::policy::{RetentionPolicy, RetryDecision, RetryPolicy};
use crate::queue::DeliveryQueueStorage;
use crate::types::{DeliveryJob, DeliveryResult};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent delivery loops
    pub workers: usize,

    /// Jobs claimed per round trip to the queue
    pub batch_size: usize,

    /// Poll interval when the queue is empty
    pub poll_interval: Duration,

    /// Active jobs claimed longer ago than this are considered stalled.
    /// Must exceed the per-delivery timeout.
    pub stall_timeout: Duration,

    pub maintenance_interval: Duration,

    /// How long in-flight deliveries may take to finish on shutdown
    pub shutdown_grace: Duration,

    pub retry: RetryPolicy,
    pub retention: RetentionPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 1,
            poll_interval: Duration::from_millis(250),
            stall_timeout: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

/// A single claim-deliver-report loop.
#[derive(Clone)]
pub struct DeliveryWorker {
    queue: Arc<dyn DeliveryQueueStorage>,
    channel: Arc<dyn DeliveryChannel>,
    retry: RetryPolicy,
    batch_size: usize,
    poll_interval: Duration,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<dyn DeliveryQueueStorage>,
        channel: Arc<dyn DeliveryChannel>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            channel,
            retry,
            batch_size: 1,
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Set the batch size for claiming jobs.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until the shutdown signal flips to `true` or its sender is dropped.
    pub async fn run(self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(worker_id, channel = self.channel.name(), "Delivery worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.process_batch().await > 0 {
                continue;
            }

            tokio::select! {
                biased;

                result = shutdown.changed() => {
                    match result {
                        Ok(()) if *shutdown.borrow() => break,
                        Ok(()) => {}
                        Err(_) => break,
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::debug!(worker_id, "Delivery worker stopped");
    }

    /// Claim and process one batch. Returns the number of jobs processed.
    ///
    /// Every job in a batch carries the same claim time, so the whole batch
    /// is delivered concurrently and each job stays within one delivery
    /// timeout of its claim.
    pub async fn process_batch(&self) -> usize {
        let jobs = match self.queue.claim(self.batch_size).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim delivery jobs");
                return 0;
            }
        };

        let count = jobs.len();
        let mut in_flight = JoinSet::new();
        for job in jobs {
            let worker = self.clone();
            in_flight.spawn(async move { worker.process_job(job).await });
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Delivery task did not finish");
            }
        }
        count
    }

    /// Perform one delivery attempt and report the outcome to the queue.
    pub async fn process_job(&self, job: DeliveryJob) {
        let attempt = job.attempts + 1;

        let result = match self.channel.deliver(&job).await {
            Ok(result) => result,
            Err(e) => DeliveryResult::failure(e.to_string(), 0),
        };

        if result.success {
            match self.queue.complete(job.id).await {
                Ok(true) => {
                    metrics::record_delivery(DeliveryOutcome::Completed);
                    tracing::info!(
                        job_id = %job.id,
                        destination = %job.destination_name,
                        phone_number_id = %job.phone_number_id,
                        attempt,
                        status = ?result.http_status,
                        elapsed_ms = result.response_time_ms,
                        "Webhook delivered"
                    );
                }
                Ok(false) => stale_report(&job),
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to mark job completed")
                }
            }
            return;
        }

        let error = result
            .error
            .unwrap_or_else(|| "delivery failed".to_string());

        match self.retry.decide(attempt, job.max_attempts) {
            RetryDecision::Retry { delay } => {
                match self.queue.schedule_retry(job.id, delay, &error).await {
                    Ok(true) => {
                        metrics::record_delivery(DeliveryOutcome::Retried);
                        tracing::warn!(
                            job_id = %job.id,
                            destination = %job.destination_name,
                            endpoint = %job.endpoint,
                            attempt,
                            max_attempts = job.max_attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %error,
                            "Webhook delivery failed, retry scheduled"
                        );
                    }
                    Ok(false) => stale_report(&job),
                    Err(e) => {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to schedule retry")
                    }
                }
            }
            RetryDecision::GiveUp => match self.queue.fail(job.id, &error).await {
                Ok(true) => {
                    metrics::record_delivery(DeliveryOutcome::Failed);
                    tracing::error!(
                        job_id = %job.id,
                        destination = %job.destination_name,
                        endpoint = %job.endpoint,
                        attempts = attempt,
                        error = %error,
                        "Webhook delivery failed permanently"
                    );
                }
                Ok(false) => stale_report(&job),
                Err(e) => tracing::error!(job_id = %job.id, error = %e, "Failed to mark job failed"),
            },
        }
    }
}

fn stale_report(job: &DeliveryJob) {
    tracing::warn!(
        job_id = %job.id,
        destination = %job.destination_name,
        "Job is no longer active, discarding delivery report"
    );
}

/// Recovers stalled jobs and trims finished history on an interval.
struct Maintenance {
    queue: Arc<dyn DeliveryQueueStorage>,
    interval: Duration,
    stall_timeout: Duration,
    retention: RetentionPolicy,
}

impl Maintenance {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.tick().await;

            tokio::select! {
                biased;

                result = shutdown.changed() => {
                    match result {
                        Ok(()) if *shutdown.borrow() => break,
                        Ok(()) => {}
                        Err(_) => break,
                    }
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn tick(&self) {
        match self.queue.requeue_stalled(self.stall_timeout).await {
            Ok(recovered) if !recovered.is_empty() => {
                metrics::record_stalled(recovered.len() as u64);
                for id in &recovered {
                    tracing::warn!(job_id = %id, "Stalled delivery job returned to waiting");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Failed to recover stalled jobs"),
        }

        match self.queue.trim_history(&self.retention).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Trimmed finished delivery jobs"),
            Err(e) => tracing::error!(error = %e, "Failed to trim delivery history"),
        }
    }
}

/// Running set of delivery workers.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl WorkerPool {
    /// Spawn the workers and the maintenance loop on the current runtime.
    pub fn start(
        queue: Arc<dyn DeliveryQueueStorage>,
        channel: Arc<dyn DeliveryChannel>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = config.workers.max(1);
        let mut handles = Vec::with_capacity(workers + 1);

        let worker = DeliveryWorker::new(queue.clone(), channel, config.retry)
            .with_batch_size(config.batch_size)
            .with_poll_interval(config.poll_interval);

        for worker_id in 0..workers {
            let worker = worker.clone();
            let rx = shutdown_rx.clone();
            handles.push(tokio::spawn(worker.run(worker_id, rx)));
        }

        let maintenance = Maintenance {
            queue,
            interval: config.maintenance_interval,
            stall_timeout: config.stall_timeout,
            retention: config.retention,
        };
        handles.push(tokio::spawn(maintenance.run(shutdown_rx)));

        tracing::info!(
            workers,
            max_attempts = config.retry.max_attempts,
            base_delay_ms = config.retry.base_delay.as_millis() as u64,
            "Delivery worker pool started"
        );

        Self {
            shutdown_tx,
            handles,
            grace: config.shutdown_grace,
        }
    }

    /// Stop claiming new jobs and wait up to the grace period for in-flight
    /// deliveries. Loops still running afterwards are aborted.
    ///
    /// Returns `true` if every loop stopped within the grace period.
    pub async fn shutdown(mut self) -> bool {
        tracing::info!(
            grace_ms = self.grace.as_millis() as u64,
            "Stopping delivery workers"
        );
        let _ = self.shutdown_tx.send(true);

        let handles = &mut self.handles;
        let joined = tokio::time::timeout(self.grace, async move {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;

        if joined.is_err() {
            let remaining = self.handles.iter().filter(|h| !h.is_finished()).count();
            for handle in &self.handles {
                handle.abort();
            }
            tracing::warn!(
                remaining,
                "Delivery workers did not stop within grace period, aborted"
            );
            return false;
        }

        tracing::info!("Delivery workers stopped");
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use uuid::Uuid;

    use super::*;
    use crate::error::Result;
    use crate::memory::InMemoryDeliveryQueue;
    use crate::types::{JobStatus, NewDeliveryJob, QueueStats};

    /// Fails the first `failures` attempts, then succeeds.
    struct FlakyChannel {
        failures: usize,
        calls: AtomicUsize,
        seen: Mutex<Vec<u32>>,
    }

    impl FlakyChannel {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DeliveryChannel for FlakyChannel {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, job: &DeliveryJob) -> Result<DeliveryResult> {
            self.seen.lock().unwrap().push(job.attempts);
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Ok(DeliveryResult::http_failure(503, "HTTP 503", 1))
            } else {
                Ok(DeliveryResult::success(200, 1))
            }
        }
    }

    /// Takes `latency` per delivery and tracks overlapping deliveries per job.
    struct SlowChannel {
        latency: Duration,
        deliveries: Mutex<HashMap<Uuid, usize>>,
        in_flight: Mutex<HashMap<Uuid, usize>>,
        max_overlap: AtomicUsize,
    }

    impl SlowChannel {
        fn new(latency: Duration) -> Self {
            Self {
                latency,
                deliveries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                max_overlap: AtomicUsize::new(0),
            }
        }

        fn deliveries(&self, id: Uuid) -> usize {
            self.deliveries.lock().unwrap().get(&id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl DeliveryChannel for SlowChannel {
        fn name(&self) -> &str {
            "slow"
        }

        async fn deliver(&self, job: &DeliveryJob) -> Result<DeliveryResult> {
            *self.deliveries.lock().unwrap().entry(job.id).or_default() += 1;
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                let running = in_flight.entry(job.id).or_default();
                *running += 1;
                self.max_overlap.fetch_max(*running, Ordering::SeqCst);
            }
            tokio::time::sleep(self.latency).await;
            *self.in_flight.lock().unwrap().entry(job.id).or_default() -= 1;
            Ok(DeliveryResult::success(200, self.latency.as_millis() as u32))
        }
    }

    /// Records how far out each retry was parked.
    #[derive(Default)]
    struct RecordingQueue {
        inner: InMemoryDeliveryQueue,
        delays: Mutex<Vec<Duration>>,
        gaps: Mutex<Vec<time::Duration>>,
    }

    #[async_trait]
    impl DeliveryQueueStorage for RecordingQueue {
        async fn enqueue(&self, job: &DeliveryJob) -> Result<()> {
            self.inner.enqueue(job).await
        }
        async fn claim(&self, limit: usize) -> Result<Vec<DeliveryJob>> {
            self.inner.claim(limit).await
        }
        async fn complete(&self, id: Uuid) -> Result<bool> {
            self.inner.complete(id).await
        }
        async fn schedule_retry(&self, id: Uuid, delay: Duration, error: &str) -> Result<bool> {
            self.delays.lock().unwrap().push(delay);
            let parked = self.inner.schedule_retry(id, delay, error).await?;
            if let Some(job) = self.inner.get(id).await? {
                self.gaps
                    .lock()
                    .unwrap()
                    .push(job.available_at - job.updated_at);
            }
            Ok(parked)
        }
        async fn fail(&self, id: Uuid, error: &str) -> Result<bool> {
            self.inner.fail(id, error).await
        }
        async fn requeue_stalled(&self, stall_timeout: Duration) -> Result<Vec<Uuid>> {
            self.inner.requeue_stalled(stall_timeout).await
        }
        async fn trim_history(&self, retention: &RetentionPolicy) -> Result<u64> {
            self.inner.trim_history(retention).await
        }
        async fn get(&self, id: Uuid) -> Result<Option<DeliveryJob>> {
            self.inner.get(id).await
        }
        async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<DeliveryJob>> {
            self.inner.list_by_status(status, limit).await
        }
        async fn stats(&self) -> Result<QueueStats> {
            self.inner.stats().await
        }
    }

    fn new_job() -> DeliveryJob {
        DeliveryJob::new(
            NewDeliveryJob {
                destination_id: 1,
                destination_name: "A".into(),
                endpoint: "https://a.example.com/hook".into(),
                phone_number_id: "542491768952983".into(),
                payload: Bytes::from_static(b"{}"),
            },
            3,
        )
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    async fn drive(worker: &DeliveryWorker, queue: &InMemoryDeliveryQueue) {
        for _ in 0..50 {
            worker.process_batch().await;
            let stats = queue.stats().await.unwrap();
            if stats.waiting == 0 && stats.delayed == 0 && stats.active == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let queue = Arc::new(InMemoryDeliveryQueue::new());
        let channel = Arc::new(FlakyChannel::new(0));
        let worker = DeliveryWorker::new(queue.clone(), channel.clone(), fast_retry());
        let job = new_job();
        queue.enqueue(&job).await.unwrap();

        drive(&worker, &queue).await;

        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_on_second_attempt_stops_retrying() {
        let queue = Arc::new(InMemoryDeliveryQueue::new());
        let channel = Arc::new(FlakyChannel::new(1));
        let worker = DeliveryWorker::new(queue.clone(), channel.clone(), fast_retry());
        let job = new_job();
        queue.enqueue(&job).await.unwrap();

        drive(&worker, &queue).await;

        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.attempts, 2);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*channel.seen.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_permanently() {
        let queue = Arc::new(InMemoryDeliveryQueue::new());
        let channel = Arc::new(FlakyChannel::new(usize::MAX));
        let worker = DeliveryWorker::new(queue.clone(), channel.clone(), fast_retry());
        let job = new_job();
        queue.enqueue(&job).await.unwrap();

        drive(&worker, &queue).await;

        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 3);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pool_shutdown_within_grace() {
        let queue = Arc::new(InMemoryDeliveryQueue::new());
        let channel = Arc::new(FlakyChannel::new(0));
        let config = WorkerConfig {
            workers: 2,
            poll_interval: Duration::from_millis(10),
            maintenance_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(2),
            retry: fast_retry(),
            ..Default::default()
        };
        let pool = WorkerPool::start(queue.clone(), channel, config);

        let job = new_job();
        queue.enqueue(&job).await.unwrap();
        for _ in 0..100 {
            if queue.stats().await.unwrap().completed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.stats().await.unwrap().completed, 1);
        assert!(pool.shutdown().await);
    }

    #[tokio::test]
    async fn test_retry_delays_grow_between_attempts() {
        let queue = Arc::new(RecordingQueue::default());
        let channel = Arc::new(FlakyChannel::new(usize::MAX));
        let worker = DeliveryWorker::new(
            queue.clone(),
            channel.clone(),
            RetryPolicy::new(4, Duration::from_millis(2)),
        );
        let mut job = new_job();
        job.max_attempts = 4;
        queue.enqueue(&job).await.unwrap();

        for _ in 0..100 {
            worker.process_batch().await;
            if queue.get(job.id).await.unwrap().unwrap().status == JobStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 4);

        let delays = queue.delays.lock().unwrap().clone();
        assert_eq!(delays, [2, 4, 8].map(Duration::from_millis).to_vec());

        let gaps = queue.gaps.lock().unwrap().clone();
        assert_eq!(gaps.len(), 3);
        assert!(gaps.windows(2).all(|pair| pair[0] < pair[1]), "{gaps:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batched_jobs_are_not_recovered_mid_delivery() {
        let queue = Arc::new(InMemoryDeliveryQueue::new());
        let channel = Arc::new(SlowChannel::new(Duration::from_millis(80)));
        let a = new_job();
        let b = new_job();
        queue.enqueue(&a).await.unwrap();
        queue.enqueue(&b).await.unwrap();

        // Two back-to-back deliveries would outlive the stall timeout.
        let config = WorkerConfig {
            workers: 2,
            batch_size: 2,
            poll_interval: Duration::from_millis(10),
            stall_timeout: Duration::from_millis(120),
            maintenance_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(2),
            retry: fast_retry(),
            ..Default::default()
        };
        let pool = WorkerPool::start(queue.clone(), channel.clone(), config);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(pool.shutdown().await);

        assert_eq!(channel.deliveries(a.id), 1);
        assert_eq!(channel.deliveries(b.id), 1);
        assert_eq!(channel.max_overlap.load(Ordering::SeqCst), 1);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed, 2);
        for id in [a.id, b.id] {
            assert_eq!(queue.get(id).await.unwrap().unwrap().attempts, 1);
        }
    }
}
