//! Reliable per-destination webhook delivery.
//!
//! Jobs move through `waiting → active → completed | delayed | failed`.
//! Failed attempts are retried with exponential backoff up to the job's
//! attempt limit; jobs whose worker disappears are recovered by stall
//! detection without counting the lost attempt.

pub mod channel;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod policy;
pub mod queue;
pub mod types;
pub mod worker;

pub use channel::{DeliveryChannel, HttpChannel, HttpChannelConfig};
pub use error::{DeliveryError, Result};
pub use memory::InMemoryDeliveryQueue;
pub use policy::{RetentionPolicy, RetryDecision, RetryPolicy};
pub use queue::DeliveryQueueStorage;
pub use types::{DeliveryJob, DeliveryResult, JobStatus, NewDeliveryJob, QueueStats};
pub use worker::{DeliveryWorker, WorkerConfig, WorkerPool};

/// Type alias for a shareable queue instance.
pub type DynDeliveryQueue = std::sync::Arc<dyn DeliveryQueueStorage>;
