//! # Transcode
//!
//! Frame-level transcoding built on a staged, bounded frame ring.
//!
//! An import thread per media kind reads frames into the ring, an optional
//! pool of filter workers processes them, and an export loop hands them to
//! the output module strictly in frame order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use transcode::{Transcoder, TranscodeOptions};
//!
//! fn main() -> transcode::Result<()> {
//!     let options = TranscodeOptions::new()
//!         .input("input.yuv")
//!         .output("output.yuv")
//!         .video_resolution(1280, 720)
//!         .threads(4)
//!         .filter("skip=100-200");
//!
//!     let stats = Transcoder::new(options)?.run()?;
//!     println!("{} frames encoded", stats.frames_encoded);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `transcode-core`: frame model, frame ranges and the frame ring
//! - `transcode-pipeline`: run control, filters, import, workers, export
//!   and the session driver
//!
//! This crate re-exports the commonly used types and adds raw-file modules
//! and the [`Transcoder`] entry point.

mod options;
pub mod prelude;
pub mod raw;
mod transcoder;

// Re-export core types
pub use transcode_core::{
    AudioFrame, FrameAttributes, FrameRange, FrameRanges, FrameRing, FrameSpecs, FrameStatus, MediaKind,
    PixelFormat, PoolFrame, VideoFrame,
};

// Re-export pipeline types
pub use transcode_pipeline::{
    CounterSnapshot, Decoder, Encoder, ExportOutcome, FilterId, FilterInfo, FilterRegistry, FilterStage,
    FrameFilter, FrameTransform, ImportStatus, PipelineError as Error, Progress, Result, RunControl, RunStatus,
    Session, SessionBuilder, SessionConfig, SessionMonitor, SessionReport, SourceSequence,
};

// High-level API
pub use options::{AudioConfig, InputConfig, OutputConfig, TranscodeOptions, VideoConfig};
pub use transcoder::{ProgressCallback, TranscodeStats, Transcoder, DEFAULT_PROGRESS_INTERVAL};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string.
pub fn version() -> &'static str {
    VERSION
}
