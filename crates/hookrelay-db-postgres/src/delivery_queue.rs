//! PostgreSQL implementation of [`DeliveryQueueStorage`].
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED`, so any number of relay processes
//! can share one queue without handing a job to two workers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hookrelay_delivery::{
    DeliveryError, DeliveryJob, DeliveryQueueStorage, JobStatus, QueueStats, RetentionPolicy,
    Result,
};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::convert::{chrono_to_time, time_to_chrono};
use crate::error::queue_error;

const JOB_COLUMNS: &str = "id, destination_id, destination_name, endpoint, phone_number_id, \
     payload, status, attempts, max_attempts, last_error, \
     created_at, updated_at, available_at, claimed_at, finished_at";

type JobRow = (
    Uuid,
    i64,
    String,
    String,
    String,
    Vec<u8>,
    String,
    i32,
    i32,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

fn job_from_row(row: JobRow) -> Result<DeliveryJob> {
    let (
        id,
        destination_id,
        destination_name,
        endpoint,
        phone_number_id,
        payload,
        status,
        attempts,
        max_attempts,
        last_error,
        created_at,
        updated_at,
        available_at,
        claimed_at,
        finished_at,
    ) = row;

    Ok(DeliveryJob {
        id,
        destination_id,
        destination_name,
        endpoint,
        phone_number_id,
        payload: Bytes::from(payload),
        status: status.parse().map_err(DeliveryError::Storage)?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        max_attempts: u32::try_from(max_attempts).unwrap_or(0),
        last_error,
        created_at: chrono_to_time(created_at),
        updated_at: chrono_to_time(updated_at),
        available_at: chrono_to_time(available_at),
        claimed_at: claimed_at.map(chrono_to_time),
        finished_at: finished_at.map(chrono_to_time),
    })
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Delivery queue stored in the `delivery_jobs` table.
#[derive(Debug, Clone)]
pub struct PostgresDeliveryQueue {
    pool: PgPool,
}

impl PostgresDeliveryQueue {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies a worker-reported transition. Returns `false` if the job is no
    /// longer active, `JobNotFound` if it does not exist at all.
    async fn transition(&self, id: Uuid, sql: &str, error: Option<&str>) -> Result<bool> {
        let mut q = query(sql).bind(id);
        if let Some(error) = error {
            q = q.bind(error);
        }
        let result = q.execute(&self.pool).await.map_err(queue_error)?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.ensure_exists(id).await?;
        Ok(false)
    }

    async fn ensure_exists(&self, id: Uuid) -> Result<()> {
        let exists = query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM delivery_jobs WHERE id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(queue_error)?;

        if exists {
            Ok(())
        } else {
            Err(DeliveryError::JobNotFound(id))
        }
    }

    async fn trim_status(&self, status: JobStatus, keep: usize) -> Result<u64> {
        let result = query(
            r#"
            DELETE FROM delivery_jobs
            WHERE id IN (
                SELECT id FROM delivery_jobs
                WHERE status = $1
                ORDER BY finished_at DESC NULLS LAST, id
                OFFSET $2
            )
            "#,
        )
        .bind(status.as_str())
        .bind(to_i64(keep))
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DeliveryQueueStorage for PostgresDeliveryQueue {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn enqueue(&self, job: &DeliveryJob) -> Result<()> {
        let result = query(
            r#"
            INSERT INTO delivery_jobs (
                id, destination_id, destination_name, endpoint, phone_number_id,
                payload, status, attempts, max_attempts, last_error,
                created_at, updated_at, available_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(job.destination_id)
        .bind(&job.destination_name)
        .bind(&job.endpoint)
        .bind(&job.phone_number_id)
        .bind(job.payload.as_ref())
        .bind(JobStatus::Waiting.as_str())
        .bind(to_i32(job.attempts))
        .bind(to_i32(job.max_attempts))
        .bind(&job.last_error)
        .bind(time_to_chrono(job.created_at))
        .bind(time_to_chrono(job.updated_at))
        .bind(time_to_chrono(job.available_at))
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        if result.rows_affected() == 0 {
            return Err(DeliveryError::Storage(format!(
                "job {} is already queued",
                job.id
            )));
        }
        Ok(())
    }

    async fn claim(&self, limit: usize) -> Result<Vec<DeliveryJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let promoted = query(
            "UPDATE delivery_jobs SET status = 'waiting', updated_at = NOW() \
             WHERE status = 'delayed' AND available_at <= NOW()",
        )
        .execute(&self.pool)
        .await
        .map_err(queue_error)?
        .rows_affected();
        if promoted > 0 {
            debug!(promoted, "Promoted delayed jobs");
        }

        let rows = query_as::<_, JobRow>(&format!(
            r#"
            UPDATE delivery_jobs
            SET status = 'active', claimed_at = NOW(), updated_at = NOW()
            WHERE id IN (
                SELECT id FROM delivery_jobs
                WHERE status = 'waiting' AND available_at <= NOW()
                ORDER BY available_at, created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(queue_error)?;

        let mut jobs = rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING does not preserve the subquery order.
        jobs.sort_by(|a, b| {
            a.available_at
                .cmp(&b.available_at)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    async fn complete(&self, id: Uuid) -> Result<bool> {
        self.transition(
            id,
            "UPDATE delivery_jobs SET status = 'completed', attempts = attempts + 1, \
             claimed_at = NULL, finished_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'active'",
            None,
        )
        .await
    }

    async fn schedule_retry(&self, id: Uuid, delay: Duration, error: &str) -> Result<bool> {
        let result = query(
            "UPDATE delivery_jobs SET status = 'delayed', attempts = attempts + 1, \
             claimed_at = NULL, last_error = $2, \
             available_at = NOW() + make_interval(secs => $3), updated_at = NOW() \
             WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.ensure_exists(id).await?;
        Ok(false)
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<bool> {
        self.transition(
            id,
            "UPDATE delivery_jobs SET status = 'failed', attempts = attempts + 1, \
             claimed_at = NULL, last_error = $2, finished_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'active'",
            Some(error),
        )
        .await
    }

    async fn requeue_stalled(&self, stall_timeout: Duration) -> Result<Vec<Uuid>> {
        query_scalar::<_, Uuid>(
            "UPDATE delivery_jobs SET status = 'waiting', claimed_at = NULL, \
             available_at = NOW(), updated_at = NOW() \
             WHERE status = 'active' AND claimed_at < NOW() - make_interval(secs => $1) \
             RETURNING id",
        )
        .bind(stall_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(queue_error)
    }

    async fn trim_history(&self, retention: &RetentionPolicy) -> Result<u64> {
        let completed = self
            .trim_status(JobStatus::Completed, retention.keep_completed)
            .await?;
        let failed = self
            .trim_status(JobStatus::Failed, retention.keep_failed)
            .await?;
        Ok(completed + failed)
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeliveryJob>> {
        query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM delivery_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(queue_error)?
        .map(job_from_row)
        .transpose()
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<DeliveryJob>> {
        query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM delivery_jobs WHERE status = $1 \
             ORDER BY updated_at DESC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(queue_error)?
        .into_iter()
        .map(job_from_row)
        .collect()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows = query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM delivery_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(queue_error)?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match status.parse::<JobStatus>().map_err(DeliveryError::Storage)? {
                JobStatus::Waiting => stats.waiting = count,
                JobStatus::Active => stats.active = count,
                JobStatus::Delayed => stats.delayed = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}
