//! Raw file import and export modules.
//!
//! Headerless files of back-to-back frames: planar or packed pictures for
//! video, interleaved PCM for audio. The stream layout comes from the
//! options, so a probe only checks that a file holds whole frames.

use crate::options::{AudioConfig, VideoConfig};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use transcode_core::frame::{PoolFrame, VideoFrame};
use transcode_core::sample::AudioFrame;
use transcode_pipeline::{Decoder, Encoder, PipelineError, ProbeInfo, Result, SourceInfo, TrackInfo};

/// A frame whose payload a raw reader can fill.
pub trait RawPayload: PoolFrame {
    /// Whole writable buffer.
    fn raw_buffer(&mut self) -> &mut [u8];

    /// Record how many bytes were filled.
    fn set_raw_size(&mut self, size: usize) -> Result<()>;
}

impl RawPayload for VideoFrame {
    fn raw_buffer(&mut self) -> &mut [u8] {
        self.buffer_mut()
    }

    fn set_raw_size(&mut self, size: usize) -> Result<()> {
        Ok(self.set_size(size)?)
    }
}

impl RawPayload for AudioFrame {
    fn raw_buffer(&mut self) -> &mut [u8] {
        self.buffer_mut()
    }

    fn set_raw_size(&mut self, size: usize) -> Result<()> {
        Ok(self.set_size(size)?)
    }
}

/// Raw file import module for video or audio.
pub struct RawReader {
    reader: Option<BufReader<File>>,
    /// Granularity a file length must be a multiple of.
    unit: usize,
    probe: ProbeInfo,
}

impl RawReader {
    /// Reader for raw pictures.
    pub fn video(config: &VideoConfig) -> Self {
        Self {
            reader: None,
            unit: config.frame_bytes(),
            probe: ProbeInfo {
                width: config.width,
                height: config.height,
                codec: format!("raw/{}", config.format),
                ..ProbeInfo::default()
            },
        }
    }

    /// Reader for raw interleaved PCM.
    pub fn audio(config: &AudioConfig) -> Self {
        Self {
            reader: None,
            unit: config.block_align(),
            probe: ProbeInfo {
                codec: "pcm".into(),
                tracks: vec![TrackInfo {
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                    bits: config.bits,
                }],
                ..ProbeInfo::default()
            },
        }
    }
}

impl<F: RawPayload> Decoder<F> for RawReader {
    fn name(&self) -> &str {
        "raw"
    }

    fn open(&mut self, source: &SourceInfo) -> Result<()> {
        let file = File::open(&source.path)?;
        debug!(path = %source.path.display(), index = source.index, "raw source opened");
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    fn decode(&mut self, frame: &mut F, bytes: usize) -> Result<usize> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| PipelineError::module("raw", "no source open"))?;
        let buffer = frame.raw_buffer();
        if bytes > buffer.len() {
            return Err(PipelineError::module(
                "raw",
                format!("{} byte read exceeds the {} byte frame buffer", bytes, buffer.len()),
            ));
        }
        let read = read_full(reader, &mut buffer[..bytes])?;
        if read < bytes {
            if read > 0 {
                warn!(read, expected = bytes, "dropping truncated trailing frame");
            }
            return Err(transcode_core::Error::EndOfStream.into());
        }
        frame.set_raw_size(read)?;
        Ok(read)
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }

    fn probe(&mut self, path: &Path) -> Result<ProbeInfo> {
        let len = std::fs::metadata(path)?.len();
        if self.unit > 0 && len % self.unit as u64 != 0 {
            return Err(PipelineError::module(
                "raw",
                format!("{} is not a whole number of {} byte units", path.display(), self.unit),
            ));
        }
        Ok(self.probe.clone())
    }
}

/// Fill `buf` unless the reader runs dry first; returns the bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Raw file export module.
pub struct RawWriter {
    video_path: PathBuf,
    audio_path: Option<PathBuf>,
    overwrite: bool,
    video: Option<BufWriter<File>>,
    audio: Option<BufWriter<File>>,
    written: u64,
}

impl RawWriter {
    /// Write video to `video_path`.
    pub fn new(video_path: impl Into<PathBuf>) -> Self {
        Self {
            video_path: video_path.into(),
            audio_path: None,
            overwrite: false,
            video: None,
            audio: None,
            written: 0,
        }
    }

    /// Also write audio to `path`.
    #[must_use]
    pub fn with_audio(mut self, path: impl Into<PathBuf>) -> Self {
        self.audio_path = Some(path.into());
        self
    }

    /// Replace existing files instead of failing.
    #[must_use]
    pub fn overwrite(mut self, enable: bool) -> Self {
        self.overwrite = enable;
        self
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn create(&self, path: &Path) -> Result<BufWriter<File>> {
        if !self.overwrite && path.exists() {
            return Err(PipelineError::module(
                "raw",
                format!("{} exists; pass overwrite to replace it", path.display()),
            ));
        }
        Ok(BufWriter::new(File::create(path)?))
    }
}

impl Encoder for RawWriter {
    fn name(&self) -> &str {
        "raw"
    }

    fn open(&mut self) -> Result<()> {
        self.video = Some(self.create(&self.video_path)?);
        if let Some(path) = &self.audio_path {
            self.audio = Some(self.create(path)?);
        }
        Ok(())
    }

    fn encode_video(&mut self, frame: &VideoFrame) -> Result<usize> {
        let out = self
            .video
            .as_mut()
            .ok_or_else(|| PipelineError::Encode("video output not open".into()))?;
        out.write_all(frame.data())?;
        self.written += frame.size() as u64;
        Ok(frame.size())
    }

    fn encode_audio(&mut self, frame: &AudioFrame) -> Result<usize> {
        let Some(out) = self.audio.as_mut() else {
            return Ok(0);
        };
        out.write_all(frame.data())?;
        self.written += frame.size() as u64;
        Ok(frame.size())
    }

    fn flush(&mut self) -> Result<()> {
        for out in self.video.iter_mut().chain(self.audio.iter_mut()) {
            out.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.video = None;
        self.audio = None;
        debug!(bytes = self.written, path = %self.video_path.display(), "raw output closed");
        Ok(())
    }
}
