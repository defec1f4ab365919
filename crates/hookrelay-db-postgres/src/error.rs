//! Error types for the PostgreSQL backend.

use hookrelay_core::CatalogError;
use hookrelay_delivery::DeliveryError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for unique violation (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL error code for foreign key violation (23503).
pub const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Errors specific to the PostgreSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] SqlxError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for CatalogError {
    fn from(err: PostgresError) -> Self {
        CatalogError::backend(err.to_string())
    }
}

impl From<PostgresError> for DeliveryError {
    fn from(err: PostgresError) -> Self {
        DeliveryError::Storage(err.to_string())
    }
}

/// Maps a failed catalog write. A foreign key violation means the referenced
/// parent record is missing.
pub(crate) fn catalog_write_error(
    err: SqlxError,
    parent_entity: &'static str,
    parent_id: &str,
) -> CatalogError {
    if has_pg_error_code(&err, PG_FOREIGN_KEY_VIOLATION) {
        CatalogError::not_found(parent_entity, parent_id)
    } else if has_pg_error_code(&err, PG_UNIQUE_VIOLATION) {
        let detail = match &err {
            SqlxError::Database(db_err) => db_err.message().to_string(),
            other => other.to_string(),
        };
        CatalogError::conflict(detail)
    } else {
        CatalogError::backend(err.to_string())
    }
}

pub(crate) fn catalog_read_error(err: SqlxError) -> CatalogError {
    CatalogError::backend(err.to_string())
}

pub(crate) fn queue_error(err: SqlxError) -> DeliveryError {
    DeliveryError::Storage(err.to_string())
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
