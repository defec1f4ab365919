use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

/// Delivery job lifecycle state.
///
/// `Waiting` → `Active` → one of `Completed`, `Delayed` (retry pending) or
/// `Failed`. Delayed jobs become `Waiting` again once their backoff elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Delayed => "delayed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "delayed" => Ok(JobStatus::Delayed),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

fn serialize_payload<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

/// One destination's share of a fanned-out notification.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryJob {
    pub id: Uuid,
    pub destination_id: i64,
    pub destination_name: String,
    pub endpoint: String,

    /// Inbound identifier the notification arrived with
    pub phone_number_id: String,

    /// Raw inbound body, forwarded unmodified
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Bytes,

    pub status: JobStatus,

    /// Delivery attempts already reported
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,

    /// Earliest time a waiting or delayed job may be claimed
    #[serde(with = "time::serde::rfc3339")]
    pub available_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339::option")]
    pub claimed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

impl DeliveryJob {
    /// Creates a waiting job that is claimable immediately.
    pub fn new(new: NewDeliveryJob, max_attempts: u32) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            destination_id: new.destination_id,
            destination_name: new.destination_name,
            endpoint: new.endpoint,
            phone_number_id: new.phone_number_id,
            payload: new.payload,
            status: JobStatus::Waiting,
            attempts: 0,
            max_attempts,
            last_error: None,
            created_at: now,
            updated_at: now,
            available_at: now,
            claimed_at: None,
            finished_at: None,
        }
    }
}

/// Request to enqueue a delivery.
#[derive(Debug, Clone)]
pub struct NewDeliveryJob {
    pub destination_id: i64,
    pub destination_name: String,
    pub endpoint: String,
    pub phone_number_id: String,
    pub payload: Bytes,
}

/// Job counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Result of a delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// Whether delivery was successful
    pub success: bool,

    /// HTTP status code, if a response was received
    pub http_status: Option<u16>,

    /// Response time in milliseconds
    pub response_time_ms: u32,

    /// Error message if failed
    pub error: Option<String>,
}

impl DeliveryResult {
    /// Create a successful result.
    pub fn success(http_status: u16, response_time_ms: u32) -> Self {
        Self {
            success: true,
            http_status: Some(http_status),
            response_time_ms,
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>, response_time_ms: u32) -> Self {
        Self {
            success: false,
            http_status: None,
            response_time_ms,
            error: Some(error.into()),
        }
    }

    /// Create a failed result with HTTP status.
    pub fn http_failure(http_status: u16, error: impl Into<String>, response_time_ms: u32) -> Self {
        Self {
            success: false,
            http_status: Some(http_status),
            response_time_ms,
            error: Some(error.into()),
        }
    }
}
