//! Delivery metrics recorded through the `metrics` facade.
//!
//! Nothing is exported unless the host process installs a recorder.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_ENQUEUED_TOTAL: &str = "hookrelay_jobs_enqueued_total";
    pub const DELIVERIES_TOTAL: &str = "hookrelay_deliveries_total";
    pub const JOBS_STALLED_TOTAL: &str = "hookrelay_jobs_stalled_total";
}

/// Outcome label values for [`names::DELIVERIES_TOTAL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completed,
    Retried,
    Failed,
}

impl DeliveryOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Completed => "completed",
            DeliveryOutcome::Retried => "retried",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

pub fn record_enqueued() {
    counter!(names::JOBS_ENQUEUED_TOTAL).increment(1);
}

pub fn record_delivery(outcome: DeliveryOutcome) {
    counter!(names::DELIVERIES_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_stalled(count: u64) {
    counter!(names::JOBS_STALLED_TOTAL).increment(count);
}
