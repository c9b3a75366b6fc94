//! Transcoding options and configuration.
//!
//! [`TranscodeOptions`] is built either through its builder methods or
//! from JSON. It is turned into a [`SessionConfig`] by
//! [`TranscodeOptions::session_config`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use transcode_core::frame::{FrameSpecs, PixelFormat};
use transcode_core::range::FrameRanges;
use transcode_pipeline::{
    ExportConfig, ImportConfig, PipelineError, Result, SessionConfig, DEFAULT_COOLDOWN, DEFAULT_LEAP_INTERVAL,
    MAX_WORKERS,
};

/// High-level transcoding options using builder pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeOptions {
    /// Video input.
    pub input: Option<InputConfig>,
    /// Optional audio input.
    pub audio_input: Option<InputConfig>,
    /// Output files.
    pub output: Option<OutputConfig>,
    /// Video stream geometry.
    pub video: VideoConfig,
    /// Audio stream layout.
    pub audio: AudioConfig,
    /// Frames per ring.
    pub frame_buffer: usize,
    /// Video filter worker threads.
    pub video_workers: usize,
    /// Audio filter worker threads.
    pub audio_workers: usize,
    /// Import shutdown grace period in milliseconds.
    pub cooldown_ms: u64,
    /// Video filters as `name=options`.
    pub filters: Vec<String>,
    /// Audio filters as `name=options`.
    pub audio_filters: Vec<String>,
    /// Frame ranges to process; other frames pass through untouched.
    pub ranges: Option<String>,
    /// First output frame to encode.
    pub first_frame: u64,
    /// Output frame ending the run.
    pub last_frame: Option<u64>,
    /// Encode every n-th frame.
    pub frame_interval: u64,
    /// Overwrite output files that already exist.
    pub overwrite: bool,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscodeOptions {
    /// Create new transcoding options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            input: None,
            audio_input: None,
            output: None,
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
            frame_buffer: transcode_core::pool::DEFAULT_FRAME_BUFFER,
            video_workers: 0,
            audio_workers: 0,
            cooldown_ms: DEFAULT_COOLDOWN.as_millis() as u64,
            filters: Vec::new(),
            audio_filters: Vec::new(),
            ranges: None,
            first_frame: 0,
            last_frame: None,
            frame_interval: 1,
            overwrite: false,
        }
    }

    /// Parse options from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PipelineError::config(format!("invalid options: {}", e)))
    }

    /// Read options from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Options as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::config(e.to_string()))
    }

    /// Set input file path.
    #[must_use]
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(InputConfig::new(path));
        self
    }

    /// Import every file matching `pattern` as one stream.
    #[must_use]
    pub fn input_sequence(mut self, pattern: impl Into<PathBuf>) -> Self {
        self.input = Some(InputConfig::new(pattern).sequential(true));
        self
    }

    /// Set input configuration.
    #[must_use]
    pub fn input_config(mut self, config: InputConfig) -> Self {
        self.input = Some(config);
        self
    }

    /// Set audio input file path.
    #[must_use]
    pub fn audio_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.audio_input = Some(InputConfig::new(path));
        self
    }

    /// Set output file path.
    #[must_use]
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(OutputConfig::new(path));
        self
    }

    /// Set output configuration.
    #[must_use]
    pub fn output_config(mut self, config: OutputConfig) -> Self {
        self.output = Some(config);
        self
    }

    /// Set video configuration.
    #[must_use]
    pub fn video_config(mut self, config: VideoConfig) -> Self {
        self.video = config;
        self
    }

    /// Set audio configuration.
    #[must_use]
    pub fn audio_config(mut self, config: AudioConfig) -> Self {
        self.audio = config;
        self
    }

    /// Set frame size and pixel format.
    #[must_use]
    pub fn video_resolution(mut self, width: u32, height: u32) -> Self {
        self.video.width = width;
        self.video.height = height;
        self
    }

    /// Set the frame ring capacity.
    #[must_use]
    pub fn frame_buffer(mut self, frames: usize) -> Self {
        self.frame_buffer = frames;
        self
    }

    /// Set the number of video filter workers.
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.video_workers = threads;
        self
    }

    /// Set the number of audio filter workers.
    #[must_use]
    pub fn audio_threads(mut self, threads: usize) -> Self {
        self.audio_workers = threads;
        self
    }

    /// Set the import shutdown grace period.
    #[must_use]
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    /// Add a video filter.
    #[must_use]
    pub fn filter(mut self, spec: impl Into<String>) -> Self {
        self.filters.push(spec.into());
        self
    }

    /// Add an audio filter.
    #[must_use]
    pub fn audio_filter(mut self, spec: impl Into<String>) -> Self {
        self.audio_filters.push(spec.into());
        self
    }

    /// Only process frames in `ranges`.
    #[must_use]
    pub fn ranges(mut self, ranges: impl Into<String>) -> Self {
        self.ranges = Some(ranges.into());
        self
    }

    /// Encode output frames `first..last`.
    #[must_use]
    pub fn frame_range(mut self, first: u64, last: Option<u64>) -> Self {
        self.first_frame = first;
        self.last_frame = last;
        self
    }

    /// Encode every n-th frame.
    #[must_use]
    pub fn frame_interval(mut self, interval: u64) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Overwrite existing output files.
    #[must_use]
    pub fn overwrite(mut self, enable: bool) -> Self {
        self.overwrite = enable;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.input.is_none() {
            return Err(PipelineError::config("input file not specified"));
        }
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| PipelineError::config("output file not specified"))?;
        if self.audio_input.is_some() && output.audio_path.is_none() {
            return Err(PipelineError::config("audio input given without an audio output"));
        }
        if self.frame_buffer == 0 {
            return Err(PipelineError::config("frame buffer must hold at least one frame"));
        }
        if self.video_workers > MAX_WORKERS || self.audio_workers > MAX_WORKERS {
            return Err(PipelineError::config(format!("at most {} filter workers", MAX_WORKERS)));
        }
        if self.frame_interval == 0 {
            return Err(PipelineError::config("frame interval must be at least 1"));
        }
        if matches!(self.last_frame, Some(last) if last <= self.first_frame) {
            return Err(PipelineError::config("last frame must come after the first"));
        }
        if !(self.video.fps.is_finite() && self.video.fps > 0.0) {
            return Err(PipelineError::config("frame rate must be positive"));
        }
        self.specs().validate()?;
        Ok(())
    }

    /// Buffer geometry for the rings.
    pub fn specs(&self) -> FrameSpecs {
        let mut specs = FrameSpecs::new(
            self.video.width,
            self.video.height,
            self.video.format,
            self.audio.sample_rate,
            self.audio.channels,
            self.audio.bits,
        );
        // room for the largest read, a frame plus the leap remainder
        let (bytes, leap) = self.audio.frame_bytes(self.video.fps);
        specs.samples = (((bytes + leap) / self.audio.block_align().max(1)) as f64).max(1.0);
        specs
    }

    /// Session configuration for these options.
    pub fn session_config(&self) -> Result<SessionConfig> {
        self.validate()?;
        let specs = self.specs();
        let ranges = match &self.ranges {
            Some(text) => Some(FrameRanges::parse(text, self.video.fps)?),
            None => None,
        };

        let mut video_import = ImportConfig::new(self.video.frame_bytes());
        let (audio_bytes, leap_bytes) = self.audio.frame_bytes(self.video.fps);
        let mut audio_import = ImportConfig::new(audio_bytes).with_leap(leap_bytes, DEFAULT_LEAP_INTERVAL);
        if let Some(ranges) = ranges {
            video_import = video_import.with_ranges(ranges.clone());
            audio_import = audio_import.with_ranges(ranges);
        }

        Ok(SessionConfig {
            frame_buffer: self.frame_buffer,
            video_workers: self.video_workers,
            audio_workers: self.audio_workers,
            cooldown: Duration::from_millis(self.cooldown_ms),
            specs,
            video_import,
            audio_import,
            export: ExportConfig {
                first: self.first_frame,
                last: self.last_frame,
                frame_interval: self.frame_interval,
            },
        })
    }
}

/// Input configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Input file path, or a glob pattern for sequential input.
    pub path: PathBuf,
    /// Treat `path` as a pattern of files imported back to back.
    #[serde(default)]
    pub sequential: bool,
}

impl InputConfig {
    /// Create input config with path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sequential: false,
        }
    }

    /// Read the inputs as one sequential stream.
    #[must_use]
    pub fn sequential(mut self, enable: bool) -> Self {
        self.sequential = enable;
        self
    }
}

/// Output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Video output path.
    pub path: PathBuf,
    /// Audio output path, required with an audio input.
    #[serde(default)]
    pub audio_path: Option<PathBuf>,
}

impl OutputConfig {
    /// Create output config with path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            audio_path: None,
        }
    }

    /// Write audio to `path`.
    #[must_use]
    pub fn audio(mut self, path: impl Into<PathBuf>) -> Self {
        self.audio_path = Some(path.into());
        self
    }
}

/// Video stream geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Frames per second, used for timecodes and audio frame sizing.
    pub fps: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 576,
            format: PixelFormat::Yuv420p,
            fps: 25.0,
        }
    }
}

impl VideoConfig {
    /// Bytes in one frame.
    pub fn frame_bytes(&self) -> usize {
        self.format.frame_size(self.width, self.height)
    }
}

/// Audio stream layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: transcode_core::frame::DEFAULT_RATE,
            channels: transcode_core::frame::DEFAULT_CHANNELS,
            bits: transcode_core::frame::DEFAULT_BITS,
        }
    }
}

impl AudioConfig {
    /// Bytes per sample across all channels.
    pub fn block_align(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits).div_ceil(8)
    }

    /// Samples that fall into one video frame.
    pub fn samples_per_frame(&self, fps: f64) -> f64 {
        f64::from(self.sample_rate) / fps
    }

    /// Bytes read per frame, and the extra bytes read every
    /// [`DEFAULT_LEAP_INTERVAL`] frames to absorb the fractional sample.
    pub fn frame_bytes(&self, fps: f64) -> (usize, usize) {
        let samples = self.samples_per_frame(fps);
        let whole = samples.floor();
        let leap = ((samples - whole) * DEFAULT_LEAP_INTERVAL as f64).round();
        (whole as usize * self.block_align(), leap as usize * self.block_align())
    }
}
