//! High-level transcoder API.

use crate::options::TranscodeOptions;
use crate::raw::{RawReader, RawWriter};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use transcode_pipeline::{
    PipelineError, Progress, Result, RunControl, Session, SessionBuilder, SessionReport, SourceSequence,
};

/// Progress callback type.
pub type ProgressCallback = Box<dyn Fn(&Progress) + Send>;

/// Default time between progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Transcoding statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeStats {
    /// Frames handed to the encoder.
    pub frames_encoded: u64,
    /// Frames removed by skip requests.
    pub frames_skipped: u64,
    /// Frames read but not encoded.
    pub frames_dropped: u64,
    /// Extra frames produced by cloning.
    pub frames_cloned: u64,
    /// Wall-clock run time in milliseconds.
    pub elapsed_ms: u64,
    /// Encoded frames per second of wall-clock time.
    pub speed_fps: f64,
    /// Per-stage outcome.
    pub report: SessionReport,
}

impl TranscodeStats {
    fn new(report: SessionReport, elapsed: Duration) -> Self {
        let counters = report.counters;
        let secs = elapsed.as_secs_f64();
        Self {
            frames_encoded: counters.encoded,
            frames_skipped: counters.skipped,
            frames_dropped: counters.dropped,
            frames_cloned: counters.cloned,
            elapsed_ms: elapsed.as_millis() as u64,
            speed_fps: if secs > 0.0 { counters.encoded as f64 / secs } else { 0.0 },
            report,
        }
    }

    /// Whether every stage ended cleanly.
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }
}

/// High-level transcoder that orchestrates the transcoding process.
pub struct Transcoder {
    options: TranscodeOptions,
    control: RunControl,
    progress_callback: Option<ProgressCallback>,
    progress_interval: Duration,
}

impl Transcoder {
    /// Create a new transcoder with the given options.
    pub fn new(options: TranscodeOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            control: RunControl::new(),
            progress_callback: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        })
    }

    /// Set progress callback.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Progress) + Send + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Set the time between progress callbacks.
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Get the options.
    pub fn options(&self) -> &TranscodeOptions {
        &self.options
    }

    /// Run control of the session, for pausing or interrupting from
    /// another thread.
    pub fn run_control(&self) -> RunControl {
        self.control.clone()
    }

    /// Assemble the session without running it.
    pub fn session(&self) -> Result<Session> {
        let options = &self.options;
        let input = options
            .input
            .as_ref()
            .ok_or_else(|| PipelineError::config("input file not specified"))?;
        let output = options
            .output
            .as_ref()
            .ok_or_else(|| PipelineError::config("output file not specified"))?;

        let mut builder = SessionBuilder::new()
            .config(options.session_config()?)
            .run_control(self.control.clone())
            .video_input(RawReader::video(&options.video), sources(&input.path, input.sequential)?);
        if let Some(audio) = &options.audio_input {
            builder = builder.audio_input(RawReader::audio(&options.audio), sources(&audio.path, audio.sequential)?);
        }
        for spec in &options.filters {
            builder = builder.video_filter(spec)?;
        }
        for spec in &options.audio_filters {
            builder = builder.audio_filter(spec)?;
        }

        let mut writer = RawWriter::new(&output.path).overwrite(options.overwrite);
        if let Some(path) = &output.audio_path {
            writer = writer.with_audio(path);
        }
        builder.encoder(writer).build()
    }

    /// Run the transcode to completion.
    pub fn run(self) -> Result<TranscodeStats> {
        let session = self.session()?;
        info!(
            input = ?self.options.input.as_ref().map(|i| &i.path),
            output = ?self.options.output.as_ref().map(|o| &o.path),
            "transcoding"
        );
        let started = Instant::now();

        let done = Arc::new(AtomicBool::new(false));
        let reporter = self.progress_callback.map(|callback| {
            let monitor = session.monitor();
            let done = Arc::clone(&done);
            let interval = self.progress_interval;
            thread::spawn(move || {
                loop {
                    thread::sleep(interval);
                    callback(&monitor.progress());
                    if done.load(Ordering::Acquire) {
                        break;
                    }
                }
            })
        });

        let report = session.run();
        done.store(true, Ordering::Release);
        if let Some(handle) = reporter {
            if handle.join().is_err() {
                debug!("progress callback panicked");
            }
        }

        let stats = TranscodeStats::new(report?, started.elapsed());
        info!(
            encoded = stats.frames_encoded,
            elapsed_ms = stats.elapsed_ms,
            "transcode finished"
        );
        Ok(stats)
    }
}

fn sources(path: &std::path::Path, sequential: bool) -> Result<SourceSequence> {
    if !sequential {
        return Ok(SourceSequence::single(path));
    }
    let pattern = path
        .to_str()
        .ok_or_else(|| PipelineError::config(format!("pattern {} is not valid UTF-8", path.display())))?;
    SourceSequence::from_glob(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        assert!(Transcoder::new(TranscodeOptions::new()).is_err());
        assert!(Transcoder::new(TranscodeOptions::new().input("a").output("b")).is_ok());
    }

    #[test]
    fn test_missing_sequence_fails_to_build() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("*.yuv");
        let transcoder = Transcoder::new(
            TranscodeOptions::new()
                .input_sequence(pattern)
                .output(dir.path().join("out.yuv")),
        )
        .unwrap();
        assert!(matches!(
            transcoder.session(),
            Err(PipelineError::InvalidPattern { .. })
        ));
    }
}
