//! Prelude module for convenient imports.
//!
//! ```rust
//! use transcode::prelude::*;
//! ```

// Core error types
pub use crate::{Error, Result};

// Frame types
pub use crate::{AudioFrame, FrameAttributes, PixelFormat, PoolFrame, VideoFrame};

// Module contracts
pub use crate::{Decoder, Encoder, FrameFilter, FrameTransform};

// Session types
pub use crate::{RunControl, Session, SessionBuilder, SessionReport};

// High-level API
pub use crate::{TranscodeOptions, TranscodeStats, Transcoder};
