//! Application error types and result alias.

use thiserror::Error;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Maximum length of an error message persisted on a failed backup run.
pub const MAX_ERROR_MESSAGE_LEN: usize = 200;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The node referenced by a backup or schedule does not exist
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Remote session could not be opened or used
    #[error("Connection error: {0}")]
    Connection(String),

    /// Archive creation failed
    #[error("Archive error: {0}")]
    Archive(String),

    /// A storage backend is missing required settings
    #[error("Storage configuration error: {0}")]
    StorageConfig(String),

    /// A storage backend call failed
    #[error("Storage error: {0}")]
    StorageOperation(String),

    /// Workload management API call failed
    #[error("Workload API error: {0}")]
    Workload(String),

    /// Not found error (runs, schedules, stored files)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-readable code for logs and notifications.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Migration(_) => "MIGRATION_ERROR",
            AppError::NodeNotFound(_) => "NODE_NOT_FOUND",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Archive(_) => "ARCHIVE_ERROR",
            AppError::StorageConfig(_) => "STORAGE_CONFIG_ERROR",
            AppError::StorageOperation(_) => "STORAGE_ERROR",
            AppError::Workload(_) => "WORKLOAD_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Http(_) => "HTTP_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Truncate an error message on a char boundary so it fits the run record.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    message.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_message_unchanged() {
        assert_eq!(truncate_message("disk full"), "disk full");
    }

    #[test]
    fn test_truncate_long_message() {
        let long = "x".repeat(500);
        assert_eq!(truncate_message(&long).len(), MAX_ERROR_MESSAGE_LEN);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_LEN);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::NodeNotFound("alpha".into()).code(),
            "NODE_NOT_FOUND"
        );
        assert_eq!(
            AppError::StorageConfig("bucket".into()).code(),
            "STORAGE_CONFIG_ERROR"
        );
    }

    #[test]
    fn test_error_display() {
        let err = AppError::Connection("auth failed".into());
        assert_eq!(err.to_string(), "Connection error: auth failed");
    }
}
