//! Transcoding session.
//!
//! A [`Session`] owns one ring per media kind and runs the stages over
//! them: an import thread per kind, an optional filter worker pool per
//! kind, and the export loop on the calling thread.

use crate::counters::{CounterSnapshot, FrameCounters, Progress};
use crate::export::{ExportConfig, ExportLoop, ExportOutcome, RingSource};
use crate::filter::{FilterCatalog, FilterId, FilterRegistry};
use crate::import::{ImportConfig, ImportStatus, ImportThread, Importer, SourceSequence, DEFAULT_COOLDOWN};
use crate::module::{Decoder, Encoder};
use crate::runcontrol::{RunControl, RunStatus};
use crate::workers::{FrameProcessor, FrameTransform, WorkerPool};
use crate::{PipelineError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use transcode_core::frame::{FrameSpecs, VideoFrame};
use transcode_core::pool::{AudioRing, VideoRing, DEFAULT_FRAME_BUFFER};
use transcode_core::sample::AudioFrame;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frames per ring.
    pub frame_buffer: usize,
    /// Video filter worker threads; 0 filters on the export thread.
    pub video_workers: usize,
    /// Audio filter worker threads.
    pub audio_workers: usize,
    /// Grace period for import threads on shutdown.
    pub cooldown: Duration,
    /// Buffer geometry.
    pub specs: FrameSpecs,
    pub video_import: ImportConfig,
    pub audio_import: ImportConfig,
    pub export: ExportConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_buffer: DEFAULT_FRAME_BUFFER,
            video_workers: 0,
            audio_workers: 0,
            cooldown: DEFAULT_COOLDOWN,
            specs: FrameSpecs::default(),
            video_import: ImportConfig::default(),
            audio_import: ImportConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

struct Input<F> {
    decoder: Box<dyn Decoder<F>>,
    sources: SourceSequence,
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    control: RunControl,
    video_filters: Arc<FilterRegistry<VideoFrame>>,
    audio_filters: Arc<FilterRegistry<AudioFrame>>,
    video_transform: Option<Arc<dyn FrameTransform<VideoFrame>>>,
    audio_transform: Option<Arc<dyn FrameTransform<AudioFrame>>>,
    video_input: Option<Input<VideoFrame>>,
    audio_input: Option<Input<AudioFrame>>,
    encoder: Option<Box<dyn Encoder>>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Builder with default configuration and the built-in filters.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            control: RunControl::new(),
            video_filters: Arc::new(FilterRegistry::new(FilterCatalog::video())),
            audio_filters: Arc::new(FilterRegistry::new(FilterCatalog::audio())),
            video_transform: None,
            audio_transform: None,
            video_input: None,
            audio_input: None,
            encoder: None,
        }
    }

    /// Replace the configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a run control with the caller, e.g. a signal handler.
    pub fn run_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    /// Video import module and its sources. Required.
    pub fn video_input(mut self, decoder: impl Decoder<VideoFrame> + 'static, sources: SourceSequence) -> Self {
        self.video_input = Some(Input {
            decoder: Box::new(decoder),
            sources,
        });
        self
    }

    /// Audio import module and its sources.
    pub fn audio_input(mut self, decoder: impl Decoder<AudioFrame> + 'static, sources: SourceSequence) -> Self {
        self.audio_input = Some(Input {
            decoder: Box::new(decoder),
            sources,
        });
        self
    }

    /// Export module. Required.
    pub fn encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Some(Box::new(encoder));
        self
    }

    /// Load a video filter from a `name=options` spec.
    pub fn video_filter(self, spec: &str) -> Result<Self> {
        let (name, options) = crate::filter::split_filter_spec(spec);
        self.video_filters.add_named(name, options)?;
        Ok(self)
    }

    /// Load an audio filter from a `name=options` spec.
    pub fn audio_filter(self, spec: &str) -> Result<Self> {
        let (name, options) = crate::filter::split_filter_spec(spec);
        self.audio_filters.add_named(name, options)?;
        Ok(self)
    }

    /// Video filter registry, for filters outside the built-in catalog.
    pub fn video_filters(&self) -> &Arc<FilterRegistry<VideoFrame>> {
        &self.video_filters
    }

    /// Audio filter registry.
    pub fn audio_filters(&self) -> &Arc<FilterRegistry<AudioFrame>> {
        &self.audio_filters
    }

    /// Internal video processing run between the multi-threaded filter passes.
    pub fn video_transform(mut self, transform: impl FrameTransform<VideoFrame> + 'static) -> Self {
        self.video_transform = Some(Arc::new(transform));
        self
    }

    /// Internal audio processing.
    pub fn audio_transform(mut self, transform: impl FrameTransform<AudioFrame> + 'static) -> Self {
        self.audio_transform = Some(Arc::new(transform));
        self
    }

    /// Allocate the rings and assemble the session.
    pub fn build(self) -> Result<Session> {
        let video_input = self
            .video_input
            .ok_or_else(|| PipelineError::config("no video input configured"))?;
        let encoder = self
            .encoder
            .ok_or_else(|| PipelineError::config("no encoder configured"))?;
        let mut config = self.config;
        config.specs.validate()?;
        if config.video_import.frame_bytes == 0 {
            config.video_import.frame_bytes = config.specs.video_buffer_size();
        }
        if config.audio_import.frame_bytes == 0 {
            config.audio_import.frame_bytes = config.specs.audio_buffer_size();
        }

        let video_ring = VideoRing::alloc(&config.specs, config.frame_buffer)?;
        self.control.register(video_ring.clone());
        let mut video_processor = FrameProcessor::new(self.video_filters);
        if let Some(transform) = self.video_transform {
            video_processor = video_processor.with_transform(transform);
        }

        let audio = match self.audio_input {
            Some(input) => {
                let ring = AudioRing::alloc(&config.specs, config.frame_buffer)?;
                self.control.register(ring.clone());
                let mut processor = FrameProcessor::new(self.audio_filters);
                if let Some(transform) = self.audio_transform {
                    processor = processor.with_transform(transform);
                }
                Some(AudioSide {
                    ring,
                    processor: Arc::new(processor),
                    input,
                })
            }
            None => None,
        };

        debug!(
            frame_buffer = video_ring.capacity(),
            audio = audio.is_some(),
            "session built"
        );
        Ok(Session {
            config,
            control: self.control,
            counters: Arc::new(FrameCounters::new()),
            video_ring,
            video_processor: Arc::new(video_processor),
            video_input,
            audio,
            encoder,
        })
    }
}

struct AudioSide {
    ring: AudioRing,
    processor: Arc<FrameProcessor<AudioFrame>>,
    input: Input<AudioFrame>,
}

/// A ready-to-run transcoding session.
pub struct Session {
    config: SessionConfig,
    control: RunControl,
    counters: Arc<FrameCounters>,
    video_ring: VideoRing,
    video_processor: Arc<FrameProcessor<VideoFrame>>,
    video_input: Input<VideoFrame>,
    audio: Option<AudioSide>,
    encoder: Box<dyn Encoder>,
}

impl Session {
    /// Start building a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run control shared by every stage.
    pub fn run_control(&self) -> RunControl {
        self.control.clone()
    }

    /// Stop every stage as soon as possible.
    pub fn interrupt(&self) {
        self.control.interrupt();
    }

    /// Handle for watching progress from another thread.
    pub fn monitor(&self) -> SessionMonitor {
        SessionMonitor {
            counters: Arc::clone(&self.counters),
            video_ring: self.video_ring.clone(),
            audio_ring: self.audio.as_ref().map(|a| a.ring.clone()),
        }
    }

    /// Look up a loaded video filter.
    pub fn video_filter(&self, name: &str) -> Option<FilterId> {
        self.video_processor.filters().find(name)
    }

    /// Run the session to completion on the calling thread.
    pub fn run(self) -> Result<SessionReport> {
        let Session {
            config,
            control,
            counters,
            video_ring,
            video_processor,
            video_input,
            audio,
            encoder,
        } = self;

        info!(
            frame_buffer = video_ring.capacity(),
            video_workers = config.video_workers,
            audio_workers = config.audio_workers,
            sources = video_input.sources.len(),
            "session starting"
        );

        let mut video_workers = WorkerPool::start(
            video_ring.clone(),
            Arc::clone(&video_processor),
            Arc::clone(&counters),
            config.video_workers,
        )?;
        let mut audio_workers = match &audio {
            Some(side) => Some(WorkerPool::start(
                side.ring.clone(),
                Arc::clone(&side.processor),
                Arc::clone(&counters),
                config.audio_workers,
            )?),
            None => None,
        };

        let mut video_import = Importer::new(
            video_ring.clone(),
            Arc::clone(video_processor.filters()),
            control.clone(),
            config.video_import.clone(),
            !video_workers.is_empty(),
        )
        .spawn(video_input.decoder, video_input.sources)?;

        let mut source = RingSource::new(
            video_ring.clone(),
            Arc::clone(&video_processor),
            !video_workers.is_empty(),
            Arc::clone(&counters),
        );
        let mut audio_import = None;
        let mut audio_ring = None;
        let mut audio_processor = None;
        if let Some(side) = audio {
            let has_workers = audio_workers.as_ref().map_or(false, |w| !w.is_empty());
            audio_import = Some(
                Importer::new(
                    side.ring.clone(),
                    Arc::clone(side.processor.filters()),
                    control.clone(),
                    config.audio_import.clone(),
                    has_workers,
                )
                .spawn(side.input.decoder, side.input.sources)?,
            );
            source = source.with_audio(side.ring.clone(), Arc::clone(&side.processor), has_workers);
            audio_ring = Some(side.ring);
            audio_processor = Some(side.processor);
        }

        let export = ExportLoop::new(source, encoder, config.export, control.clone()).run();
        if export.is_failure() {
            control.interrupt();
        } else {
            control.stop();
        }

        let (video_status, audio_status) = cancel_imports(&mut video_import, audio_import.as_mut(), config.cooldown);
        video_workers.close();
        if let Some(workers) = audio_workers.as_mut() {
            workers.close();
        }
        video_processor.filters().stop_all();
        if let Some(processor) = &audio_processor {
            processor.filters().stop_all();
        }
        let flushed = video_ring.flush() + audio_ring.as_ref().map_or(0, |r| r.flush());
        if flushed > 0 {
            debug!(frames = flushed, "flushed unfinished frames");
        }

        let report = SessionReport {
            video_status,
            audio_status,
            export,
            counters: counters.snapshot(),
            run: control.status(),
        };
        if report.is_success() {
            info!(encoded = report.counters.encoded, "session finished");
        } else {
            warn!(
                video = %report.video_status,
                export = ?report.export,
                run = %report.run,
                "session finished abnormally"
            );
        }
        Ok(report)
    }
}

/// Stop both imports, wait one cooldown for whichever is still busy, then
/// join them.
fn cancel_imports(
    video: &mut ImportThread<VideoFrame>,
    audio: Option<&mut ImportThread<AudioFrame>>,
    cooldown: Duration,
) -> (ImportStatus, Option<ImportStatus>) {
    video.stop();
    if let Some(audio) = audio.as_deref() {
        audio.stop();
    }
    let busy = !video.is_finished() || audio.as_deref().map_or(false, |a| !a.is_finished());
    if busy && !cooldown.is_zero() {
        debug!(?cooldown, "waiting for imports to unwind");
        thread::sleep(cooldown);
    }
    (video.join(), audio.map(ImportThread::join))
}

/// Progress reader detached from the session.
#[derive(Clone)]
pub struct SessionMonitor {
    counters: Arc<FrameCounters>,
    video_ring: VideoRing,
    audio_ring: Option<AudioRing>,
}

impl SessionMonitor {
    /// Current counters and stage occupancy.
    pub fn progress(&self) -> Progress {
        Progress {
            counters: self.counters.snapshot(),
            video: self.video_ring.counters(),
            audio: self.audio_ring.as_ref().map(AudioRing::counters),
        }
    }

    /// Frames currently queued or held in the video ring.
    pub fn video_in_flight(&self) -> usize {
        self.video_ring.in_flight()
    }
}

/// Result of [`Session::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub video_status: ImportStatus,
    pub audio_status: Option<ImportStatus>,
    pub export: ExportOutcome,
    pub counters: CounterSnapshot,
    pub run: RunStatus,
}

impl SessionReport {
    /// Whether every stage ended cleanly.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.export.is_failure()
            && self.run != RunStatus::Interrupted
            && !self.video_status.is_error()
            && !self.audio_status.map_or(false, ImportStatus::is_error)
    }
}
