//! Pool-resident frame buffers.
//!
//! Every frame that flows through the pipeline lives in a [`FrameRing`]
//! slot for the whole process lifetime. This module describes those slots:
//! the shared [`FrameHeader`] (sequence id, slot index, stage and
//! [`FrameAttributes`]), the video payload type [`VideoFrame`], and the
//! [`FrameSpecs`] used to size every buffer up front.
//!
//! [`FrameRing`]: crate::pool::FrameRing

use crate::error::{Error, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Largest supported video width; buffers are always sized for it.
pub const MAX_FRAME_WIDTH: u32 = 2500;
/// Largest supported video height; buffers are always sized for it.
pub const MAX_FRAME_HEIGHT: u32 = 2000;
/// Default audio sample rate.
pub const DEFAULT_RATE: u32 = 48000;
/// Default audio channel count.
pub const DEFAULT_CHANNELS: u16 = 2;
/// Default audio sample width in bits.
pub const DEFAULT_BITS: u16 = 16;

/// Pixel format for video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, 12bpp (1 Cr & Cb sample per 2x2 Y samples).
    Yuv420p,
    /// Planar YUV 4:2:2, 16bpp (1 Cr & Cb sample per 2x1 Y samples).
    Yuv422p,
    /// Planar YUV 4:4:4, 24bpp (no subsampling).
    Yuv444p,
    /// Packed NV12 (Y plane, interleaved UV plane).
    Nv12,
    /// Packed RGB24, 24bpp.
    Rgb24,
    /// Packed BGR24, 24bpp.
    Bgr24,
    /// Packed RGBA, 32bpp.
    Rgba,
    /// Grayscale, 8bpp.
    Gray8,
}

impl PixelFormat {
    /// Get the bits per pixel.
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            Self::Yuv420p | Self::Nv12 => 12,
            Self::Yuv422p => 16,
            Self::Yuv444p | Self::Rgb24 | Self::Bgr24 => 24,
            Self::Rgba => 32,
            Self::Gray8 => 8,
        }
    }

    /// Bytes needed for one frame of the given dimensions.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            // chroma planes round up for odd dimensions
            Self::Yuv420p | Self::Nv12 => {
                let chroma = (width as usize).div_ceil(2) * (height as usize).div_ceil(2);
                pixels + 2 * chroma
            }
            Self::Yuv422p => pixels + 2 * (width as usize).div_ceil(2) * height as usize,
            Self::Yuv444p | Self::Rgb24 | Self::Bgr24 => pixels * 3,
            Self::Rgba => pixels * 4,
            Self::Gray8 => pixels,
        }
    }

    /// Parse a format name as printed by `Display`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "yuv420p" | "i420" => Some(Self::Yuv420p),
            "yuv422p" => Some(Self::Yuv422p),
            "yuv444p" => Some(Self::Yuv444p),
            "nv12" => Some(Self::Nv12),
            "rgb24" | "rgb" => Some(Self::Rgb24),
            "bgr24" => Some(Self::Bgr24),
            "rgba" => Some(Self::Rgba),
            "gray8" | "gray" => Some(Self::Gray8),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yuv420p => write!(f, "yuv420p"),
            Self::Yuv422p => write!(f, "yuv422p"),
            Self::Yuv444p => write!(f, "yuv444p"),
            Self::Nv12 => write!(f, "nv12"),
            Self::Rgb24 => write!(f, "rgb24"),
            Self::Bgr24 => write!(f, "bgr24"),
            Self::Rgba => write!(f, "rgba"),
            Self::Gray8 => write!(f, "gray8"),
        }
    }
}

bitflags! {
    /// Per-frame facts shared between import, filters and export.
    ///
    /// The flags are independent; several may be set at once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FrameAttributes: u32 {
        /// This is a keyframe (I-frame).
        const KEYFRAME = 0x0001;
        /// Interlaced frame.
        const INTERLACED = 0x0002;
        /// Frame is corrupted or a filter failed on it.
        const BROKEN = 0x0004;
        /// Drop the frame at the next stage boundary.
        const SKIPPED = 0x0008;
        /// A filter asked for one more copy of this frame.
        const IS_CLONED = 0x0010;
        /// This frame is the product of a clone.
        const WAS_CLONED = 0x0020;
        /// Outside the selected processing ranges; flows through untouched.
        const OUT_OF_RANGE = 0x0040;
        /// Frame timing was delayed by the producer.
        const DELAYED = 0x0080;
        /// Last frame of the stream.
        const END_OF_STREAM = 0x0100;
    }
}

impl Default for FrameAttributes {
    fn default() -> Self {
        Self::empty()
    }
}

impl FrameAttributes {
    /// Whether filters and the encoder should work on this frame.
    #[must_use]
    pub fn needs_processing(&self) -> bool {
        !self.intersects(Self::OUT_OF_RANGE | Self::END_OF_STREAM)
    }

    /// Turn a pending clone request into the "was cloned" marker.
    pub fn settle_clone(&mut self) {
        self.remove(Self::IS_CLONED);
        self.insert(Self::WAS_CLONED);
    }
}

/// Pipeline stage a frame buffer currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameStatus {
    /// Free, in the pool.
    Null,
    /// Registered by import, being filled.
    Empty,
    /// Awaiting the filter stage.
    Wait,
    /// Held by a thread; never queued.
    Locked,
    /// Processed, awaiting export.
    Ready,
}

impl FrameStatus {
    /// All statuses, in stage order.
    pub const ALL: [FrameStatus; 5] = [
        FrameStatus::Null,
        FrameStatus::Empty,
        FrameStatus::Wait,
        FrameStatus::Locked,
        FrameStatus::Ready,
    ];

    /// Stable index of the status, used for per-stage tables.
    pub const fn index(self) -> usize {
        match self {
            FrameStatus::Null => 0,
            FrameStatus::Empty => 1,
            FrameStatus::Wait => 2,
            FrameStatus::Locked => 3,
            FrameStatus::Ready => 4,
        }
    }

    /// Short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            FrameStatus::Null => "null",
            FrameStatus::Empty => "empty",
            FrameStatus::Wait => "wait",
            FrameStatus::Locked => "locked",
            FrameStatus::Ready => "ready",
        }
    }

    /// Frames in this status have not been handed to export yet.
    pub fn is_upstream(self) -> bool {
        matches!(self, FrameStatus::Empty | FrameStatus::Wait)
    }
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Media kind served by a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Video frames.
    Video,
    /// Audio frames.
    Audio,
}

impl MediaKind {
    /// Lowercase name, also used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and bookkeeping shared by every pooled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sequence number assigned by import.
    pub id: u64,
    /// Cross-stage flags.
    pub attributes: FrameAttributes,
    bufid: usize,
    status: FrameStatus,
}

impl FrameHeader {
    /// Header of a freshly allocated, free buffer.
    pub fn new() -> Self {
        Self {
            id: 0,
            attributes: FrameAttributes::empty(),
            bufid: 0,
            status: FrameStatus::Null,
        }
    }

    /// Slot index within the owning ring.
    pub fn bufid(&self) -> usize {
        self.bufid
    }

    /// Stage this buffer was last queued in or taken from.
    pub fn status(&self) -> FrameStatus {
        self.status
    }

    pub(crate) fn set_bufid(&mut self, bufid: usize) {
        self.bufid = bufid;
    }

    pub(crate) fn set_status(&mut self, status: FrameStatus) {
        self.status = status;
    }
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// How much of a frame [`PoolFrame::copy_from`] duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Metadata only; the payload is shared until either side writes to it.
    Soft,
    /// Metadata and payload bytes.
    Deep,
}

/// Frame shape used to size every buffer in the pools.
///
/// Set once before the rings are allocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSpecs {
    /// Maximum video width.
    pub width: u32,
    /// Maximum video height.
    pub height: u32,
    /// Pixel format used for sizing.
    pub format: PixelFormat,
    /// Audio sample rate.
    pub rate: u32,
    /// Audio channels.
    pub channels: u16,
    /// Audio bits per sample.
    pub bits: u16,
    /// Samples an audio buffer must hold.
    pub samples: f64,
}

impl Default for FrameSpecs {
    fn default() -> Self {
        Self {
            width: MAX_FRAME_WIDTH,
            height: MAX_FRAME_HEIGHT,
            format: PixelFormat::Rgb24,
            rate: DEFAULT_RATE,
            channels: DEFAULT_CHANNELS,
            bits: DEFAULT_BITS,
            samples: f64::from(DEFAULT_RATE),
        }
    }
}

impl FrameSpecs {
    /// Specs sized for the given stream, audio buffers holding one second.
    pub fn new(width: u32, height: u32, format: PixelFormat, rate: u32, channels: u16, bits: u16) -> Self {
        Self {
            width,
            height,
            format,
            rate,
            channels,
            bits,
            samples: f64::from(rate),
        }
    }

    /// Bytes in one video buffer.
    pub fn video_buffer_size(&self) -> usize {
        self.format.frame_size(self.width, self.height)
    }

    /// Bytes in one audio buffer.
    pub fn audio_buffer_size(&self) -> usize {
        let bytes_per_sample = usize::from(self.channels) * usize::from(self.bits).div_ceil(8);
        (self.samples.ceil() as usize) * bytes_per_sample
    }

    /// Reject specs that cannot size a buffer.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid_param("frame dimensions must be non-zero"));
        }
        if self.rate == 0 || self.channels == 0 || self.bits == 0 {
            return Err(Error::invalid_param("audio parameters must be non-zero"));
        }
        if !self.samples.is_finite() || self.samples < 0.0 {
            return Err(Error::invalid_param("audio sample count must be finite"));
        }
        Ok(())
    }
}

/// Byte storage behind a pooled frame.
///
/// Soft copies share the allocation; the first write through
/// [`Payload::as_mut_slice`] detaches the writer.
#[derive(Clone)]
pub struct Payload {
    data: Arc<Vec<u8>>,
}

impl Payload {
    /// Reserve a zeroed buffer of `size` bytes.
    pub fn alloc(size: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|e| {
            Error::ResourceExhausted(format!("cannot reserve {} byte frame buffer: {}", size, e))
        })?;
        data.resize(size, 0);
        Ok(Self { data: Arc::new(data) })
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Read access to the whole buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Write access to the whole buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Whether another frame currently shares this buffer.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    fn share(&mut self, other: &Payload) {
        self.data = Arc::clone(&other.data);
    }

    fn copy_prefix(&mut self, other: &Payload, len: usize) -> Result<()> {
        if len > self.capacity() {
            return Err(Error::BufferTooSmall {
                needed: len,
                available: self.capacity(),
            });
        }
        self.as_mut_slice()[..len].copy_from_slice(&other.as_slice()[..len]);
        Ok(())
    }

    fn make_mut_vec(&mut self) -> &mut Vec<u8> {
        Arc::make_mut(&mut self.data)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("capacity", &self.capacity())
            .field("shared", &self.is_shared())
            .finish()
    }
}

/// A frame type that can live in a [`FrameRing`](crate::pool::FrameRing).
pub trait PoolFrame: Send + Sized + 'static {
    /// Media kind, used for ring tags and logging.
    const KIND: MediaKind;

    /// Allocate one buffer sized from `specs`.
    fn alloc(specs: &FrameSpecs) -> Result<Self>;

    /// Frame header.
    fn header(&self) -> &FrameHeader;

    /// Mutable frame header.
    fn header_mut(&mut self) -> &mut FrameHeader;

    /// Copy `src` into `self`. Slot index and status are preserved.
    fn copy_from(&mut self, src: &Self, mode: CopyMode) -> Result<()>;

    /// Forget the payload length (used when a read produced nothing).
    fn clear_payload(&mut self);

    /// Sequence id.
    fn id(&self) -> u64 {
        self.header().id
    }

    /// Current attributes.
    fn attributes(&self) -> FrameAttributes {
        self.header().attributes
    }

    /// Mutable attributes.
    fn attributes_mut(&mut self) -> &mut FrameAttributes {
        &mut self.header_mut().attributes
    }
}

/// A video frame buffer.
///
/// The buffer is paired with a scratch buffer of the same size so in-place
/// transforms can read one and write the other, then [`swap_buffers`].
///
/// [`swap_buffers`]: VideoFrame::swap_buffers
pub struct VideoFrame {
    header: FrameHeader,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of the payload.
    pub format: PixelFormat,
    size: usize,
    buffer: Payload,
    scratch: Vec<u8>,
}

impl VideoFrame {
    /// Allocate a frame with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let buffer = Payload::alloc(capacity)?;
        let mut scratch = Vec::new();
        scratch.try_reserve_exact(capacity).map_err(|e| {
            Error::ResourceExhausted(format!("cannot reserve {} byte scratch buffer: {}", capacity, e))
        })?;
        scratch.resize(capacity, 0);
        Ok(Self {
            header: FrameHeader::new(),
            width,
            height,
            format,
            size: 0,
            buffer,
            scratch,
        })
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Set the payload length.
    pub fn set_size(&mut self, size: usize) -> Result<()> {
        if size > self.capacity() {
            return Err(Error::BufferTooSmall {
                needed: size,
                available: self.capacity(),
            });
        }
        self.size = size;
        Ok(())
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.size]
    }

    /// The whole writable buffer, regardless of the current size.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    /// Current payload and the scratch buffer, for out-of-place transforms.
    pub fn split_for_transform(&mut self) -> (&[u8], &mut [u8]) {
        let size = self.size;
        // a soft copy may have brought in a larger buffer
        if self.scratch.len() < size {
            self.scratch.resize(size, 0);
        }
        (&self.buffer.as_slice()[..size], &mut self.scratch[..size])
    }

    /// Make the scratch buffer the payload.
    pub fn swap_buffers(&mut self) {
        std::mem::swap(self.buffer.make_mut_vec(), &mut self.scratch);
    }

    /// Whether the payload is shared with a soft copy.
    pub fn is_shared(&self) -> bool {
        self.buffer.is_shared()
    }
}

impl PoolFrame for VideoFrame {
    const KIND: MediaKind = MediaKind::Video;

    fn alloc(specs: &FrameSpecs) -> Result<Self> {
        Self::with_capacity(specs.video_buffer_size(), specs.width, specs.height, specs.format)
    }

    fn header(&self) -> &FrameHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    fn copy_from(&mut self, src: &Self, mode: CopyMode) -> Result<()> {
        match mode {
            CopyMode::Soft => self.buffer.share(&src.buffer),
            CopyMode::Deep => self.buffer.copy_prefix(&src.buffer, src.size)?,
        }
        self.header.id = src.header.id;
        self.header.attributes = src.header.attributes;
        self.width = src.width;
        self.height = src.height;
        self.format = src.format;
        self.size = src.size;
        Ok(())
    }

    fn clear_payload(&mut self) {
        self.size = 0;
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("id", &self.header.id)
            .field("bufid", &self.header.bufid)
            .field("status", &self.header.status)
            .field("attributes", &self.header.attributes)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("size", &self.size)
            .finish()
    }
}
