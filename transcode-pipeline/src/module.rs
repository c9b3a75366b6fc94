//! Contracts for import (decoder) and export (encoder) modules.

use crate::error::PipelineError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use transcode_core::frame::{PoolFrame, VideoFrame};
use transcode_core::sample::AudioFrame;

/// One input source handed to [`Decoder::open`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    /// Path of the source.
    pub path: PathBuf,
    /// Position within the source sequence.
    pub index: usize,
}

impl SourceInfo {
    /// Source at `path`, first in its sequence.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            index: 0,
        }
    }
}

/// Audio track properties reported by a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits: u16,
}

/// Stream properties of one source, used to check sequential inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub width: u32,
    pub height: u32,
    /// Frame rate code.
    pub frame_rate_code: u32,
    /// Aspect ratio code.
    pub aspect_code: u32,
    pub codec: String,
    pub tracks: Vec<TrackInfo>,
}

/// Why two probes differ, or `None` if a source may follow the other.
///
/// `track` selects the audio track to compare; a track missing on both
/// sides compares equal.
pub fn probe_mismatch(old: &ProbeInfo, new: &ProbeInfo, track: usize) -> Option<String> {
    if old.width != new.width || old.height != new.height {
        return Some(format!(
            "frame size {}x{} differs from {}x{}",
            new.width, new.height, old.width, old.height
        ));
    }
    if old.frame_rate_code != new.frame_rate_code {
        return Some(format!(
            "frame rate code {} differs from {}",
            new.frame_rate_code, old.frame_rate_code
        ));
    }
    if old.aspect_code != new.aspect_code {
        return Some(format!("aspect code {} differs from {}", new.aspect_code, old.aspect_code));
    }
    if old.codec != new.codec {
        return Some(format!("codec '{}' differs from '{}'", new.codec, old.codec));
    }
    match (old.tracks.get(track), new.tracks.get(track)) {
        (Some(a), Some(b)) if a.sample_rate != b.sample_rate => Some(format!(
            "track {} sample rate {} differs from {}",
            track, b.sample_rate, a.sample_rate
        )),
        (Some(a), Some(b)) if a.channels != b.channels => Some(format!(
            "track {} channel count {} differs from {}",
            track, b.channels, a.channels
        )),
        (Some(_), None) | (None, Some(_)) => Some(format!("track {} present in only one source", track)),
        _ => None,
    }
}

/// Whether `new` may continue the stream of `old`.
pub fn probe_matches(old: &ProbeInfo, new: &ProbeInfo, track: usize) -> bool {
    probe_mismatch(old, new, track).is_none()
}

/// Import module filling pool frames from a source.
pub trait Decoder<F: PoolFrame>: Send {
    /// Module name, for logs.
    fn name(&self) -> &str;

    /// Open a source.
    fn open(&mut self, source: &SourceInfo) -> Result<()>;

    /// Read up to `bytes` into `frame`, setting its payload size and shape.
    ///
    /// An error means the source has no more frames.
    fn decode(&mut self, frame: &mut F, bytes: usize) -> Result<usize>;

    /// Close the current source.
    fn close(&mut self) -> Result<()>;

    /// Inspect a source without opening it for import.
    fn probe(&mut self, path: &Path) -> Result<ProbeInfo> {
        Err(PipelineError::module(
            self.name().to_string(),
            format!("cannot probe {}", path.display()),
        ))
    }
}

/// Export module consuming processed frames.
pub trait Encoder: Send {
    /// Module name, for logs.
    fn name(&self) -> &str;

    /// Prepare for the first frame.
    fn open(&mut self) -> Result<()>;

    /// Encode one video frame; returns the bytes produced.
    fn encode_video(&mut self, frame: &VideoFrame) -> Result<usize>;

    /// Encode one audio frame; returns the bytes produced.
    fn encode_audio(&mut self, frame: &AudioFrame) -> Result<usize>;

    /// Write out anything buffered.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Finish the output.
    fn close(&mut self) -> Result<()>;
}

impl<F: PoolFrame> Decoder<F> for Box<dyn Decoder<F>> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self, source: &SourceInfo) -> Result<()> {
        (**self).open(source)
    }

    fn decode(&mut self, frame: &mut F, bytes: usize) -> Result<usize> {
        (**self).decode(frame, bytes)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn probe(&mut self, path: &Path) -> Result<ProbeInfo> {
        (**self).probe(path)
    }
}

impl Encoder for Box<dyn Encoder> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn encode_video(&mut self, frame: &VideoFrame) -> Result<usize> {
        (**self).encode_video(frame)
    }

    fn encode_audio(&mut self, frame: &AudioFrame) -> Result<usize> {
        (**self).encode_audio(frame)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe() -> ProbeInfo {
        ProbeInfo {
            width: 320,
            height: 240,
            frame_rate_code: 3,
            aspect_code: 1,
            codec: "raw".into(),
            tracks: vec![TrackInfo {
                sample_rate: 48000,
                channels: 2,
                bits: 16,
            }],
        }
    }

    #[test]
    fn test_identical_probes_match() {
        assert!(probe_matches(&probe(), &probe(), 0));
    }

    #[test]
    fn test_size_mismatch() {
        let mut other = probe();
        other.width = 640;
        let reason = probe_mismatch(&probe(), &other, 0).unwrap();
        assert!(reason.contains("640x240"));
    }

    #[test]
    fn test_track_mismatch() {
        let mut other = probe();
        other.tracks[0].channels = 1;
        assert!(!probe_matches(&probe(), &other, 0));

        // bit depth is not part of the comparison
        let mut deeper = probe();
        deeper.tracks[0].bits = 24;
        assert!(probe_matches(&probe(), &deeper, 0));
    }

    #[test]
    fn test_missing_track() {
        let mut other = probe();
        other.tracks.clear();
        assert!(!probe_matches(&probe(), &other, 0));
        assert!(probe_matches(&probe(), &probe(), 3));
    }
}
