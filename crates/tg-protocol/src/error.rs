//! Protocol error types

use thiserror::Error;

/// Errors that can occur while reading or writing channel frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A line exceeded the maximum frame length
    #[error("Frame too large: exceeds maximum of {max} bytes")]
    FrameTooLarge { max: usize },

    /// A frame was not valid UTF-8
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
