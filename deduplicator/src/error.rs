use common::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeduplicatorError {
    #[error("Identity fields are empty or contain an empty value")]
    EmptyIdentity,
    #[error("Datum has no usable identity: {0}")]
    InvalidDatum(String),
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),
    #[error("Dataset {dataset_id} is already registered with {strategy}")]
    AlreadyRegistered {
        dataset_id: String,
        strategy: String,
    },
    #[error("Dataset {0} is not registered with a known deduplicator")]
    NotRegistered(String),
    #[error("Deduplicator {strategy} cannot handle dataset {dataset_id}")]
    NotHandled {
        strategy: &'static str,
        dataset_id: String,
    },
    #[error("No deduplicator can handle dataset {0}")]
    NoMatchingStrategy(String),
    #[error("Deduplicator {strategy} does not support {operation}")]
    Unsupported {
        strategy: &'static str,
        operation: &'static str,
    },
    #[error(transparent)]
    Repository(#[from] AppError),
}

impl DeduplicatorError {
    /// Only store failures are worth retrying; everything else is a logic error.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeduplicatorError::Repository(err) => err.is_retryable(),
            _ => false,
        }
    }
}
