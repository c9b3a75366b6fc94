//! Audio frame buffers.

use crate::error::{Error, Result};
use crate::frame::{CopyMode, FrameHeader, FrameSpecs, MediaKind, Payload, PoolFrame};
use std::fmt;

/// An audio frame buffer holding interleaved PCM.
pub struct AudioFrame {
    header: FrameHeader,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Bits per sample.
    pub bits: u16,
    /// Channel count.
    pub channels: u16,
    size: usize,
    buffer: Payload,
}

impl AudioFrame {
    /// Allocate a frame with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize, rate: u32, bits: u16, channels: u16) -> Result<Self> {
        Ok(Self {
            header: FrameHeader::new(),
            rate,
            bits,
            channels,
            size: 0,
            buffer: Payload::alloc(capacity)?,
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

    /// Bytes per interleaved sample frame.
    pub fn block_align(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits).div_ceil(8)
    }

    /// Number of complete sample frames in the payload.
    pub fn sample_count(&self) -> usize {
        match self.block_align() {
            0 => 0,
            align => self.size / align,
        }
    }

    /// Whether the payload is shared with a soft copy.
    pub fn is_shared(&self) -> bool {
        self.buffer.is_shared()
    }
}

impl PoolFrame for AudioFrame {
    const KIND: MediaKind = MediaKind::Audio;

    fn alloc(specs: &FrameSpecs) -> Result<Self> {
        Self::with_capacity(specs.audio_buffer_size(), specs.rate, specs.bits, specs.channels)
    }

    fn header(&self) -> &FrameHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    fn copy_from(&mut self, src: &Self, mode: CopyMode) -> Result<()> {
        match mode {
            CopyMode::Soft => self.buffer = src.buffer.clone(),
            CopyMode::Deep => {
                if src.size > self.capacity() {
                    return Err(Error::BufferTooSmall {
                        needed: src.size,
                        available: self.capacity(),
                    });
                }
                self.buffer.as_mut_slice()[..src.size].copy_from_slice(src.data());
            }
        }
        self.header.id = src.header.id;
        self.header.attributes = src.header.attributes;
        self.rate = src.rate;
        self.bits = src.bits;
        self.channels = src.channels;
        self.size = src.size;
        Ok(())
    }

    fn clear_payload(&mut self) {
        self.size = 0;
    }
}

impl fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioFrame")
            .field("id", &self.header.id)
            .field("bufid", &self.header.bufid())
            .field("status", &self.header.status())
            .field("attributes", &self.header.attributes)
            .field("rate", &self.rate)
            .field("bits", &self.bits)
            .field("channels", &self.channels)
            .field("size", &self.size)
            .finish()
    }
}
