//! Error types for SeriesDB

use thiserror::Error;

/// Result type alias for SeriesDB operations
pub type Result<T> = std::result::Result<T, SeriesError>;

/// SeriesDB error types
#[derive(Error, Debug)]
pub enum SeriesError {
    /// A required argument was blank or out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// SQL driver failure, with the metric and store it happened on
    #[error("Storage failure: {context}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// No store implementation could be resolved
    #[error("Store resolution failed: {0}")]
    Resolution(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SeriesError {
    /// Build an `InvalidArgument` error
    pub fn invalid(message: impl Into<String>) -> Self {
        SeriesError::InvalidArgument(message.into())
    }

    /// Wrap a driver error with the operation context
    pub fn storage(context: impl Into<String>, source: rusqlite::Error) -> Self {
        SeriesError::Storage {
            context: context.into(),
            source,
        }
    }

    /// Check if error belongs to the storage failure class
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, SeriesError::Storage { .. } | SeriesError::Io(_))
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            SeriesError::Io(_) => true,
            SeriesError::Storage { source, .. } => matches!(
                source.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = SeriesError::invalid("metric name is blank");
        assert!(!err.is_storage_failure());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Invalid argument: metric name is blank");

        let err = SeriesError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(err.is_storage_failure());
        assert!(err.is_retryable());

        let err = SeriesError::storage("metric 'cpu', store 'metrics.db'", rusqlite::Error::InvalidQuery);
        assert!(err.is_storage_failure());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("cpu"));
    }
}
