//! Error types for weft.

use thiserror::Error;

/// Main error type for weft operations.
#[derive(Error, Debug)]
pub enum WeftError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Producer already in use on track {track}")]
    ProducerInUse { track: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Frame has no image source")]
    NoImage,

    #[error("Frame has no audio source")]
    NoAudio,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Resource unavailable: {0}")]
    Resource(String),

    #[error("Mix failed: {0}")]
    Mix(String),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WeftError {
    /// Shorthand for an out-of-range index.
    pub fn index(index: usize, len: usize) -> Self {
        Self::IndexOutOfRange { index, len }
    }
}

/// Result type alias for weft operations.
pub type Result<T> = std::result::Result<T, WeftError>;
