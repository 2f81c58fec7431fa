use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Store and client failures are transient; logical failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(_)
            | AppError::Storage(_)
            | AppError::Io(_)
            | AppError::Join(_)
            | AppError::Cancelled(_)
            | AppError::InternalError(_) => true,
            AppError::Serialization(_)
            | AppError::NotFound(_)
            | AppError::Validation(_)
            | AppError::Conflict(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled(_))
    }
}
