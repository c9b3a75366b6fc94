//! Export stage.
//!
//! [`RingSource`] hands processed frames to the encoder in id order and
//! takes them back afterwards. Without filter workers it also runs the
//! multi-threaded filter passes itself, so a kind behaves the same with
//! zero or many workers.

use crate::counters::FrameCounters;
use crate::filter::FilterStage;
use crate::module::Encoder;
use crate::runcontrol::RunControl;
use crate::workers::{discard, FrameProcessor};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, trace};
use transcode_core::frame::{FrameAttributes, MediaKind, PoolFrame, VideoFrame};
use transcode_core::pool::{AudioRing, FrameRing, RingFrame, VideoRing};
use transcode_core::sample::AudioFrame;

/// One media kind as seen from export.
struct ExportSide<F: PoolFrame> {
    ring: FrameRing<F>,
    processor: Arc<FrameProcessor<F>>,
    has_workers: bool,
}

impl<F: PoolFrame> ExportSide<F> {
    fn acquire(&self, counters: &FrameCounters) -> Option<RingFrame<F>> {
        loop {
            let Some(mut frame) = self.ring.retrieve() else {
                debug!(kind = %F::KIND, "export acquire interrupted");
                return None;
            };

            if frame.attributes().needs_processing() {
                // a clone coming back has been through the multi passes already
                if !self.has_workers && !frame.attributes().contains(FrameAttributes::WAS_CLONED) {
                    self.processor.run_filters(FilterStage::PreMulti, &mut frame);
                    self.processor.internal(&mut frame);
                    self.processor.run_filters(FilterStage::PostMulti, &mut frame);
                }
                self.processor.run_filters(FilterStage::PostSync, &mut frame);
                self.processor.run_filters(FilterStage::Preview, &mut frame);
            }

            let attrs = frame.attributes();
            if attrs.contains(FrameAttributes::SKIPPED) {
                if attrs.contains(FrameAttributes::IS_CLONED) {
                    frame.attributes_mut().settle_clone();
                    self.ring.reinject(frame);
                } else {
                    trace!(kind = %F::KIND, id = frame.id(), "skipping frame");
                    discard(&self.ring, frame, counters);
                }
                continue;
            }

            if F::KIND == MediaKind::Video && attrs.contains(FrameAttributes::WAS_CLONED) {
                counters.add_cloned(1);
            }
            return Some(frame);
        }
    }

    fn dispose(&self, mut frame: RingFrame<F>) {
        if frame.attributes().contains(FrameAttributes::IS_CLONED) {
            frame.attributes_mut().settle_clone();
            self.ring.reinject(frame);
        } else {
            self.ring.remove(frame);
        }
    }
}

/// Frame supply for the export loop.
pub struct RingSource {
    video: ExportSide<VideoFrame>,
    audio: Option<ExportSide<AudioFrame>>,
    counters: Arc<FrameCounters>,
}

impl RingSource {
    /// Export from the video ring only.
    pub fn new(
        ring: VideoRing,
        processor: Arc<FrameProcessor<VideoFrame>>,
        has_workers: bool,
        counters: Arc<FrameCounters>,
    ) -> Self {
        Self {
            video: ExportSide {
                ring,
                processor,
                has_workers,
            },
            audio: None,
            counters,
        }
    }

    /// Also export from an audio ring.
    #[must_use]
    pub fn with_audio(mut self, ring: AudioRing, processor: Arc<FrameProcessor<AudioFrame>>, has_workers: bool) -> Self {
        self.audio = Some(ExportSide {
            ring,
            processor,
            has_workers,
        });
        self
    }

    /// Whether an audio ring is attached.
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Next video frame to encode, or `None` once the ring is interrupted.
    ///
    /// Skipped frames are dropped here and never returned.
    pub fn acquire_video(&self) -> Option<RingFrame<VideoFrame>> {
        self.video.acquire(&self.counters)
    }

    /// Next audio frame to encode; `None` without an audio ring.
    pub fn acquire_audio(&self) -> Option<RingFrame<AudioFrame>> {
        self.audio.as_ref()?.acquire(&self.counters)
    }

    /// Give back an encoded video frame. A frame still marked for cloning
    /// goes back to the head of the ready queue.
    pub fn dispose_video(&self, frame: RingFrame<VideoFrame>) {
        self.video.dispose(frame);
    }

    /// Give back an encoded audio frame.
    pub fn dispose_audio(&self, frame: RingFrame<AudioFrame>) {
        match &self.audio {
            Some(side) => side.dispose(frame),
            None => drop(frame),
        }
    }
}

/// Which output frames get encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportConfig {
    /// First output frame to encode.
    pub first: u64,
    /// Output frame that ends the run, if any.
    pub last: Option<u64>,
    /// Encode every n-th frame inside the range.
    pub frame_interval: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            first: 0,
            last: None,
            frame_interval: 1,
        }
    }
}

impl ExportConfig {
    fn in_range(&self, frame_id: u64) -> bool {
        frame_id >= self.first && self.last.map_or(true, |last| frame_id < last)
    }
}

/// How the export loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum ExportOutcome {
    /// End of stream or the last requested frame was reached.
    Completed,
    /// The rings stopped delivering before end of stream.
    Drained,
    /// Stopped by an interruption.
    Interrupted,
    /// The encoder failed.
    Failed(String),
}

impl ExportOutcome {
    /// Whether the run finished without an encoder error.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, ExportOutcome::Failed(_))
    }
}

/// Export loop driving one encoder.
pub struct ExportLoop<E: Encoder> {
    source: RingSource,
    encoder: E,
    config: ExportConfig,
    control: RunControl,
}

impl<E: Encoder> ExportLoop<E> {
    pub fn new(source: RingSource, encoder: E, config: ExportConfig, control: RunControl) -> Self {
        Self {
            source,
            encoder,
            config,
            control,
        }
    }

    /// Encode until end of stream, interruption or an encoder error.
    ///
    /// The encoder is always flushed and closed once it was opened.
    pub fn run(mut self) -> ExportOutcome {
        if let Err(e) = self.encoder.open() {
            error!(module = self.encoder.name(), "cannot open encoder: {}", e);
            return ExportOutcome::Failed(e.to_string());
        }
        info!(module = self.encoder.name(), "export started");

        let mut outcome = self.encode_frames();

        let finish = self.encoder.flush().and_then(|()| self.encoder.close());
        if let Err(e) = finish {
            error!(module = self.encoder.name(), "cannot finish output: {}", e);
            if !outcome.is_failure() {
                outcome = ExportOutcome::Failed(e.to_string());
            }
        }
        let counters = &self.source.counters;
        info!(
            encoded = counters.encoded(),
            dropped = counters.dropped(),
            skipped = counters.skipped(),
            cloned = counters.cloned(),
            ?outcome,
            "export finished"
        );
        outcome
    }

    fn encode_frames(&mut self) -> ExportOutcome {
        let interval = self.config.frame_interval.max(1);
        let mut in_range = 0u64;

        loop {
            self.control.pause_point();

            let Some(mut video) = self.source.acquire_video() else {
                return self.end_without_eos();
            };
            let mut audio = None;
            if self.source.has_audio() {
                match self.source.acquire_audio() {
                    Some(frame) => audio = Some(frame),
                    None => {
                        self.source.dispose_video(video);
                        return self.end_without_eos();
                    }
                }
            }

            let frame_id = self.source.counters.output_id(video.id());
            let mut eos = take_eos(&mut *video);
            if let Some(frame) = audio.as_mut() {
                eos |= take_eos(&mut **frame);
            }
            eos |= self.config.last == Some(frame_id);

            let mut failure = None;
            if !eos {
                if self.config.in_range(frame_id) && video.attributes().needs_processing() {
                    if in_range % interval == 0 {
                        match self.encode(&video, audio.as_deref()) {
                            Ok(()) => self.source.counters.add_encoded(1),
                            Err(e) => failure = Some(e),
                        }
                    } else {
                        self.source.counters.add_dropped(1);
                    }
                    in_range += 1;
                } else {
                    video.attributes_mut().insert(FrameAttributes::OUT_OF_RANGE);
                    if let Some(frame) = audio.as_mut() {
                        frame.attributes_mut().insert(FrameAttributes::OUT_OF_RANGE);
                    }
                    self.source.counters.add_dropped(1);
                }
            }

            self.source.dispose_video(video);
            if let Some(frame) = audio {
                self.source.dispose_audio(frame);
            }

            if let Some(e) = failure {
                error!(module = self.encoder.name(), frame = frame_id, "encoding failed: {}", e);
                return ExportOutcome::Failed(e.to_string());
            }
            if eos {
                debug!(frame = frame_id, "export reached end of stream");
                return ExportOutcome::Completed;
            }
            if !self.control.is_running() {
                return self.end_without_eos();
            }
        }
    }

    fn encode(&mut self, video: &VideoFrame, audio: Option<&AudioFrame>) -> crate::Result<()> {
        self.encoder.encode_video(video)?;
        if let Some(audio) = audio {
            self.encoder.encode_audio(audio)?;
        }
        Ok(())
    }

    fn end_without_eos(&self) -> ExportOutcome {
        if self.control.is_interrupted() {
            ExportOutcome::Interrupted
        } else {
            ExportOutcome::Drained
        }
    }
}

/// Clear the end-of-stream flag, reporting whether it was set.
fn take_eos<F: PoolFrame>(frame: &mut F) -> bool {
    let attrs = frame.attributes_mut();
    let eos = attrs.contains(FrameAttributes::END_OF_STREAM);
    attrs.remove(FrameAttributes::END_OF_STREAM);
    eos
}
