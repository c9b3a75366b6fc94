//! Pipeline error types.

use std::path::PathBuf;
use thiserror::Error;
use transcode_core::error::Error as CoreError;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An import or export module failed to open, close or flush.
    #[error("Module '{module}' failed: {reason}")]
    Module { module: String, reason: String },

    /// A sequential source does not match the one before it.
    #[error("Source {} is not compatible with former: {reason}", path.display())]
    ProbeMismatch { path: PathBuf, reason: String },

    /// Encoding a frame failed.
    #[error("Encode error: {0}")]
    Encode(String),

    /// No filter with that name is known.
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    /// No loaded filter instance with that id.
    #[error("Filter {0} not found")]
    FilterNotFound(u32),

    /// Input pattern matched nothing or could not be parsed.
    #[error("Invalid input pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A worker or import thread could not be spawned.
    #[error("Failed to spawn {0} thread")]
    Spawn(String),
}

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Create a module failure.
    pub fn module(module: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::Module {
            module: module.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::InvalidConfig(msg.into())
    }

    /// Check if this is a plain end-of-stream from a decoder.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, PipelineError::Core(e) if e.is_eof())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_error_display() {
        let err = PipelineError::module("raw", "file vanished");
        assert_eq!(err.to_string(), "Module 'raw' failed: file vanished");
    }

    #[test]
    fn test_probe_mismatch_display() {
        let err = PipelineError::ProbeMismatch {
            path: PathBuf::from("b.yuv"),
            reason: "width 320 != 640".into(),
        };
        assert_eq!(
            err.to_string(),
            "Source b.yuv is not compatible with former: width 320 != 640"
        );
    }

    #[test]
    fn test_is_eof() {
        assert!(PipelineError::from(CoreError::EndOfStream).is_eof());
        assert!(!PipelineError::module("raw", "gone").is_eof());
    }

    #[test]
    fn test_core_conversion() {
        let err: PipelineError = CoreError::invalid_param("capacity").into();
        assert!(matches!(err, PipelineError::Core(_)));
    }
}
