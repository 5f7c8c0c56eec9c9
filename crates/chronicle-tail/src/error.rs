//! Chronicle tail error types.

use chronicle_core::error::DomainError;
use thiserror::Error;

/// Startup and runtime errors for the tail tool.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The event store rejected an operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Writing to standard output failed.
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

impl AppError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Domain(DomainError::NotFound(_)) => 3,
            Self::Database(_) | Self::Domain(_) | Self::Output(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_config_errors_exit_with_usage_code() {
        assert_eq!(AppError::Config("DATABASE_URL".into()).exit_code(), 2);
    }

    #[test]
    fn test_unknown_cursor_exits_with_its_own_code() {
        let err = AppError::from(DomainError::NotFound(Uuid::new_v4()));

        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_storage_failure_exits_with_generic_code() {
        let err = AppError::from(DomainError::StorageFailure("connection refused".into()));

        assert_eq!(err.exit_code(), 1);
    }
}
