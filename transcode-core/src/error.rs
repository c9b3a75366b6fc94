//! Error types for the transcode frame core.
//!
//! Pool exhaustion and interruption are not errors: the former is
//! back-pressure and the latter is reported as `None` from the blocking
//! ring operations. What remains here are startup and configuration failures.

use thiserror::Error;

/// Main error type for the transcode frame core.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Frame buffers could not be reserved.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// End of stream reached.
    #[error("End of stream")]
    EndOfStream,

    /// Buffer too small for operation.
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Range list could not be parsed.
    #[error("Invalid frame range '{input}': {reason}")]
    InvalidRange { input: String, reason: String },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Create a range parsing error.
    pub fn invalid_range(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidRange {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is an end-of-stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// Check if this error is fatal at startup (allocation or configuration).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ResourceExhausted(_) | Error::InvalidParameter(_)
        )
    }
}
