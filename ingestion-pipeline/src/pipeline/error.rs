use common::error::AppError;
use deduplicator::DeduplicatorError;
use thiserror::Error;

/// Why a work item could not be processed.
///
/// Callers only ever see this type; store and strategy failures are
/// wrapped with their cause kept as the source.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Work item {item_id} is missing metadata key {key}")]
    MissingMetadata { item_id: String, key: &'static str },
    #[error("Dataset {0} not found")]
    DatasetNotFound(String),
    #[error("Dataset {0} has no user id")]
    MissingUserId(String),
    #[error("Invalid processing transition during {event}: {detail}")]
    InvalidTransition { event: &'static str, detail: String },
    #[error("Processing cancelled")]
    Cancelled,
    #[error("Deduplication failed: {0}")]
    Deduplicator(#[from] DeduplicatorError),
    #[error("Store failed: {0}")]
    Store(#[from] AppError),
}

impl ProcessingError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessingError::Cancelled => true,
            ProcessingError::Deduplicator(err) => err.is_retryable(),
            ProcessingError::Store(err) => err.is_retryable(),
            ProcessingError::MissingMetadata { .. }
            | ProcessingError::DatasetNotFound(_)
            | ProcessingError::MissingUserId(_)
            | ProcessingError::InvalidTransition { .. } => false,
        }
    }

    /// Short machine-readable code recorded on the work item.
    pub fn code(&self) -> &'static str {
        match self {
            ProcessingError::MissingMetadata { .. } => "missing_metadata",
            ProcessingError::DatasetNotFound(_) => "dataset_not_found",
            ProcessingError::MissingUserId(_) => "missing_user_id",
            ProcessingError::InvalidTransition { .. } => "invalid_transition",
            ProcessingError::Cancelled => "cancelled",
            ProcessingError::Deduplicator(_) => "deduplicator",
            ProcessingError::Store(_) => "store",
        }
    }
}
