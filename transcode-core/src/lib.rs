//! # Transcode Core
//!
//! Frame buffers and the staged rings that carry them between the import,
//! filter and export threads of a transcode run.
//!
//! - [`frame`]: frame header, attributes, statuses and video buffers
//! - [`sample`]: audio buffers
//! - [`pool`]: the fixed-capacity [`FrameRing`]
//! - [`range`]: frame range lists used to select what gets processed
//! - [`metrics`]: optional instrumentation macros

pub mod error;
pub mod frame;
pub mod metrics;
pub mod pool;
pub mod range;
pub mod sample;

pub use error::{Error, Result};
pub use frame::{
    CopyMode, FrameAttributes, FrameHeader, FrameSpecs, FrameStatus, MediaKind, PixelFormat,
    PoolFrame, VideoFrame,
};
pub use pool::{AudioRing, FrameRing, RingCounts, RingFrame, StageCounters, VideoRing};
pub use range::{FrameRange, FrameRanges};
pub use sample::AudioFrame;
