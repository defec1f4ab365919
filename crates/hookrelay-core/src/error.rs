//! Error types for destination catalog operations.

/// Errors that can occur while reading or mutating the destination catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// A record with the same unique key already exists.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting key.
        message: String,
    },

    /// The request data is invalid.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The catalog backend failed or is unreachable.
    #[error("Catalog backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },
}

impl CatalogError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CatalogError::not_found("phone number", "542491768952983");
        assert_eq!(err.to_string(), "phone number not found: 542491768952983");
        assert!(err.is_not_found());

        let err = CatalogError::backend("connection refused");
        assert!(err.to_string().contains("connection refused"));
        assert!(!err.is_not_found());
    }
}
