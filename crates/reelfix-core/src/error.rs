//! Error types for reelfix.

use thiserror::Error;

/// Main error type for reelfix operations.
#[derive(Error, Debug)]
pub enum ReelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Empty window: {0}")]
    EmptyWindow(String),

    #[error("External tool error: {0}")]
    Tool(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for reelfix operations.
pub type Result<T> = std::result::Result<T, ReelError>;
