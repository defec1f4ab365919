use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Queue storage error: {0}")]
    Storage(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
