use imgpipe_core::{ImageId, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Why a job was not accepted at the producer boundary
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Missing, or owned by someone else
    #[error("Image not found: {0}")]
    ImageNotFound(ImageId),

    #[error("Metadata store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue unavailable: {0}")]
    Queue(#[from] JobError),
}
