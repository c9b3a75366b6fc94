//! Import stage.
//!
//! One thread per media kind registers frames with increasing ids, fills
//! them through a [`Decoder`] and pushes them on to the filter stage (or
//! straight to export when the kind has no filter workers).
//!
//! A [`SourceSequence`] with several entries is imported as one continuous
//! stream: each exhausted source ends with a `SKIPPED` frame instead of an
//! end-of-stream frame, and the next source must probe identical to the
//! one before it.

use crate::error::PipelineError;
use crate::filter::{FilterRegistry, FilterStage};
use crate::module::{probe_mismatch, Decoder, ProbeInfo, SourceInfo};
use crate::runcontrol::RunControl;
use crate::Result;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use transcode_core::frame::{FrameAttributes, FrameStatus, PoolFrame};
use transcode_core::pool::FrameRing;
use transcode_core::range::FrameRanges;
use transcode_core::record_counter;

/// Audio frames get `leap_bytes` extra every this many frames.
pub const DEFAULT_LEAP_INTERVAL: u64 = 1000;

/// Grace period between stopping an import thread and joining it.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

/// Why an import thread stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// Not decided by the thread itself; see [`stop_cause`].
    Unknown,
    /// Every source was read to the end.
    Done,
    /// Stopped by an interruption.
    Interrupted,
    /// A source could not be opened or closed.
    ExternalError,
    /// The import thread itself failed.
    InternalError,
    /// A sequential source could not be probed or did not match.
    ProbeError,
}

impl ImportStatus {
    /// Whether the status reports a failure.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ImportStatus::ExternalError | ImportStatus::InternalError | ImportStatus::ProbeError
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportStatus::Unknown => "unknown",
            ImportStatus::Done => "done",
            ImportStatus::Interrupted => "interrupted",
            ImportStatus::ExternalError => "external error",
            ImportStatus::InternalError => "internal error",
            ImportStatus::ProbeError => "probe error",
        };
        f.write_str(name)
    }
}

/// Resolve an `Unknown` status from the run control.
pub fn stop_cause(status: ImportStatus, run: &RunControl) -> ImportStatus {
    match status {
        ImportStatus::Unknown if run.is_interrupted() => ImportStatus::Interrupted,
        ImportStatus::Unknown if run.is_stopped() => ImportStatus::Done,
        other => other,
    }
}

/// Import settings for one media kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportConfig {
    /// Bytes requested from the decoder per frame.
    pub frame_bytes: usize,
    /// Extra bytes requested every `leap_interval` frames.
    pub leap_bytes: usize,
    /// Frames between leap reads; 0 disables them.
    pub leap_interval: u64,
    /// Frames outside these ranges are marked out of range.
    pub ranges: Option<FrameRanges>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            frame_bytes: 0,
            leap_bytes: 0,
            leap_interval: DEFAULT_LEAP_INTERVAL,
            ranges: None,
        }
    }
}

impl ImportConfig {
    /// Settings reading `frame_bytes` per frame.
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes,
            ..Self::default()
        }
    }

    /// Add `leap_bytes` every `interval` frames.
    #[must_use]
    pub fn with_leap(mut self, leap_bytes: usize, interval: u64) -> Self {
        self.leap_bytes = leap_bytes;
        self.leap_interval = interval;
        self
    }

    /// Only process frames inside `ranges`.
    #[must_use]
    pub fn with_ranges(mut self, ranges: FrameRanges) -> Self {
        self.ranges = Some(ranges);
        self
    }

    /// Bytes to request for frame `id`.
    pub fn bytes_for(&self, id: u64) -> usize {
        if self.leap_interval > 0 && id > 0 && id % self.leap_interval == 0 {
            self.frame_bytes + self.leap_bytes
        } else {
            self.frame_bytes
        }
    }

    fn in_range(&self, id: u64) -> bool {
        self.ranges.as_ref().map_or(true, |r| r.contains(id))
    }
}

/// Ordered list of input files imported as one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSequence {
    sources: Vec<PathBuf>,
    position: usize,
}

impl SourceSequence {
    /// A single source.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self {
            sources: vec![path.into()],
            position: 0,
        }
    }

    /// Sources in the given order.
    pub fn from_paths(sources: Vec<PathBuf>) -> Result<Self> {
        if sources.is_empty() {
            return Err(PipelineError::config("empty source list"));
        }
        Ok(Self { sources, position: 0 })
    }

    /// Every file matching a glob pattern, sorted by path.
    pub fn from_glob(pattern: &str) -> Result<Self> {
        let entries = glob::glob(pattern).map_err(|e| PipelineError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let mut sources = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => sources.push(path),
                Ok(_) => {}
                Err(e) => warn!("skipping unreadable match: {}", e),
            }
        }
        if sources.is_empty() {
            return Err(PipelineError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "no files matched".into(),
            });
        }
        sources.sort();
        debug!(pattern, files = sources.len(), "source sequence expanded");
        Ok(Self { sources, position: 0 })
    }

    /// Source being imported.
    pub fn current(&self) -> SourceInfo {
        SourceInfo {
            path: self.sources[self.position].clone(),
            index: self.position,
        }
    }

    /// Whether a source follows the current one.
    pub fn has_more(&self) -> bool {
        self.position + 1 < self.sources.len()
    }

    /// Move to the next source.
    pub fn advance(&mut self) -> Option<SourceInfo> {
        if !self.has_more() {
            return None;
        }
        self.position += 1;
        Some(self.current())
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Always false; a sequence holds at least one source.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Whether sources are checked against each other.
    pub fn is_sequential(&self) -> bool {
        self.sources.len() > 1
    }
}

/// How reading one source ended.
enum SourceEnd {
    /// The decoder ran dry.
    Exhausted,
    /// The thread was deactivated or the ring interrupted.
    Stopped,
}

/// Import stage for one media kind, ready to be spawned.
pub struct Importer<F: PoolFrame> {
    ring: FrameRing<F>,
    filters: Arc<FilterRegistry<F>>,
    control: RunControl,
    config: ImportConfig,
    next_stage: FrameStatus,
    active: Arc<AtomicBool>,
}

impl<F: PoolFrame> Importer<F> {
    /// Frames go to `Wait` when the kind has filter workers, else to `Ready`.
    pub fn new(
        ring: FrameRing<F>,
        filters: Arc<FilterRegistry<F>>,
        run: RunControl,
        config: ImportConfig,
        has_workers: bool,
    ) -> Self {
        Self {
            ring,
            filters,
            control: run,
            config,
            next_stage: if has_workers { FrameStatus::Wait } else { FrameStatus::Ready },
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Start the import thread.
    pub fn spawn<D>(self, decoder: D, sources: SourceSequence) -> Result<ImportThread<F>>
    where
        D: Decoder<F> + 'static,
    {
        let ring = self.ring.clone();
        let run = self.control.clone();
        let active = Arc::clone(&self.active);
        let handle = thread::Builder::new()
            .name(format!("{}-import", F::KIND))
            .spawn(move || self.run(decoder, sources))
            .map_err(|_| PipelineError::Spawn(format!("{} import", F::KIND)))?;
        Ok(ImportThread {
            ring,
            control: run,
            active,
            handle: Some(handle),
            status: None,
        })
    }

    /// Import every source on the calling thread.
    pub fn run<D: Decoder<F>>(self, mut decoder: D, mut sources: SourceSequence) -> ImportStatus {
        let mut next_id = 0u64;
        let status = self.import_sources(&mut decoder, &mut sources, &mut next_id);
        self.active.store(false, Ordering::SeqCst);
        let status = stop_cause(status, &self.control);
        debug!(kind = %F::KIND, %status, frames = next_id, "import finished");
        status
    }

    fn import_sources<D: Decoder<F>>(
        &self,
        decoder: &mut D,
        sources: &mut SourceSequence,
        next_id: &mut u64,
    ) -> ImportStatus {
        let mut former: Option<ProbeInfo> = None;
        if sources.is_sequential() {
            let first = sources.current();
            match decoder.probe(&first.path) {
                Ok(probe) => former = Some(probe),
                Err(e) => {
                    error!(kind = %F::KIND, "cannot probe {}: {}", first.path.display(), e);
                    return self.fail(ImportStatus::ProbeError);
                }
            }
        }

        loop {
            let source = sources.current();
            if let Err(e) = decoder.open(&source) {
                error!(kind = %F::KIND, module = decoder.name(), "cannot open {}: {}", source.path.display(), e);
                return self.fail(ImportStatus::ExternalError);
            }
            info!(kind = %F::KIND, module = decoder.name(), "importing {}", source.path.display());

            let end = self.read_source(decoder, next_id, sources.has_more());

            if let Err(e) = decoder.close() {
                error!(kind = %F::KIND, module = decoder.name(), "cannot close {}: {}", source.path.display(), e);
                return self.fail(ImportStatus::ExternalError);
            }
            if matches!(end, SourceEnd::Stopped) {
                return ImportStatus::Unknown;
            }

            let Some(next) = sources.advance() else {
                return ImportStatus::Done;
            };
            let probe = match decoder.probe(&next.path) {
                Ok(probe) => probe,
                Err(e) => {
                    error!(kind = %F::KIND, "cannot probe {}: {}", next.path.display(), e);
                    return self.fail(ImportStatus::ProbeError);
                }
            };
            if let Some(prev) = &former {
                if let Some(reason) = probe_mismatch(prev, &probe, 0) {
                    error!(
                        kind = %F::KIND,
                        "source {} is not compatible with former: {}",
                        next.path.display(),
                        reason
                    );
                    return self.fail(ImportStatus::ProbeError);
                }
            }
            former = Some(probe);
        }
    }

    /// Register, fill and forward frames until the source runs dry.
    fn read_source<D: Decoder<F>>(&self, decoder: &mut D, next_id: &mut u64, more_sources: bool) -> SourceEnd {
        loop {
            if !self.active.load(Ordering::SeqCst) {
                debug!(kind = %F::KIND, "import deactivated");
                return SourceEnd::Stopped;
            }
            let id = *next_id;
            let Some(mut frame) = self.ring.register(id) else {
                debug!(kind = %F::KIND, id, "import interrupted while registering");
                return SourceEnd::Stopped;
            };
            if !self.config.in_range(id) {
                frame.attributes_mut().insert(FrameAttributes::OUT_OF_RANGE);
            }

            let bytes = self.config.bytes_for(id);
            let exhausted = match decoder.decode(&mut frame, bytes) {
                Ok(read) => {
                    trace!(kind = %F::KIND, id, bytes = read, "frame read");
                    record_counter!("pipeline.import.frames", 1u64, "kind" => F::KIND.as_str());
                    false
                }
                Err(e) => {
                    if e.is_eof() {
                        debug!(kind = %F::KIND, id, "source exhausted");
                    } else {
                        warn!(kind = %F::KIND, id, "read failed, ending source: {}", e);
                    }
                    frame.clear_payload();
                    let flag = if more_sources {
                        FrameAttributes::SKIPPED
                    } else {
                        FrameAttributes::END_OF_STREAM
                    };
                    frame.attributes_mut().insert(flag);
                    true
                }
            };

            if frame.attributes().needs_processing() {
                self.filters.process(FilterStage::PreSync, &mut frame);
            }
            self.ring.push_next(frame, self.next_stage);
            *next_id += 1;

            if exhausted {
                return SourceEnd::Exhausted;
            }
        }
    }

    /// Wake everything waiting on the ring so a failed import does not hang
    /// the other stages.
    fn fail(&self, status: ImportStatus) -> ImportStatus {
        self.ring.interrupt();
        status
    }
}

/// Handle to a running import thread.
pub struct ImportThread<F: PoolFrame> {
    ring: FrameRing<F>,
    control: RunControl,
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<ImportStatus>>,
    status: Option<ImportStatus>,
}

impl<F: PoolFrame> ImportThread<F> {
    /// Whether the thread is still importing.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Ask the thread to stop and wake it if it waits for a free frame.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.ring.interrupt_stage(FrameStatus::Null);
    }

    /// Wait for the thread and return why it stopped.
    pub fn join(&mut self) -> ImportStatus {
        if let Some(handle) = self.handle.take() {
            let status = handle.join().unwrap_or_else(|_| {
                error!(kind = %F::KIND, "import thread panicked");
                ImportStatus::InternalError
            });
            self.status = Some(stop_cause(status, &self.control));
        }
        self.status.unwrap_or(ImportStatus::Unknown)
    }

    /// Stop, give in-flight reads `cooldown` to unwind, then join.
    pub fn cancel(&mut self, cooldown: Duration) -> ImportStatus {
        self.stop();
        if !self.is_finished() && !cooldown.is_zero() {
            debug!(kind = %F::KIND, ?cooldown, "waiting for import to unwind");
            thread::sleep(cooldown);
        }
        self.join()
    }
}

impl<F: PoolFrame> Drop for ImportThread<F> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterCatalog;
    use std::collections::VecDeque;
    use transcode_core::frame::{FrameSpecs, PixelFormat, VideoFrame};
    use transcode_core::pool::VideoRing;

    struct Frames {
        remaining: VecDeque<u8>,
    }

    impl Decoder<VideoFrame> for Frames {
        fn name(&self) -> &str {
            "frames"
        }

        fn open(&mut self, _source: &SourceInfo) -> Result<()> {
            Ok(())
        }

        fn decode(&mut self, frame: &mut VideoFrame, _bytes: usize) -> Result<usize> {
            let value = self
                .remaining
                .pop_front()
                .ok_or_else(|| PipelineError::module("frames", "end of stream"))?;
            frame.buffer_mut()[0] = value;
            frame.set_size(1)?;
            Ok(1)
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn setup(capacity: usize) -> (VideoRing, Arc<FilterRegistry<VideoFrame>>) {
        let specs = FrameSpecs::new(2, 2, PixelFormat::Gray8, 100, 1, 8);
        (
            VideoRing::alloc(&specs, capacity).unwrap(),
            Arc::new(FilterRegistry::new(FilterCatalog::video())),
        )
    }

    #[test]
    fn test_stop_cause() {
        let run = RunControl::new();
        assert_eq!(stop_cause(ImportStatus::Unknown, &run), ImportStatus::Unknown);
        run.stop();
        assert_eq!(stop_cause(ImportStatus::Unknown, &run), ImportStatus::Done);
        run.interrupt();
        assert_eq!(stop_cause(ImportStatus::Unknown, &run), ImportStatus::Interrupted);
        assert_eq!(stop_cause(ImportStatus::ProbeError, &run), ImportStatus::ProbeError);
    }

    #[test]
    fn test_leap_bytes() {
        let config = ImportConfig::new(100).with_leap(4, 1000);
        assert_eq!(config.bytes_for(0), 100);
        assert_eq!(config.bytes_for(999), 100);
        assert_eq!(config.bytes_for(1000), 104);
        assert_eq!(config.bytes_for(2000), 104);
    }

    #[test]
    fn test_source_sequence() {
        let mut seq = SourceSequence::from_paths(vec!["a".into(), "b".into()]).unwrap();
        assert!(seq.is_sequential());
        assert!(seq.has_more());
        assert_eq!(seq.advance().unwrap().index, 1);
        assert!(!seq.has_more());
        assert!(seq.advance().is_none());
        assert!(SourceSequence::from_paths(Vec::new()).is_err());
    }

    #[test]
    fn test_glob_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["clip2.raw", "clip1.raw", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pattern = format!("{}/clip*.raw", dir.path().display());
        let seq = SourceSequence::from_glob(&pattern).unwrap();
        assert_eq!(seq.len(), 2);
        assert!(seq.current().path.ends_with("clip1.raw"));

        let missing = format!("{}/none*.raw", dir.path().display());
        assert!(matches!(
            SourceSequence::from_glob(&missing),
            Err(PipelineError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_import_marks_end_of_stream() {
        let (ring, filters) = setup(8);
        let run = RunControl::new();
        let importer = Importer::new(ring.clone(), filters, run, ImportConfig::new(1), false);
        let status = importer.run(
            Frames {
                remaining: VecDeque::from(vec![1, 2]),
            },
            SourceSequence::single("mem"),
        );
        assert_eq!(status, ImportStatus::Done);

        let attrs: Vec<FrameAttributes> = (0..3)
            .map(|_| {
                let frame = ring.retrieve().unwrap();
                let attrs = frame.attributes();
                ring.remove(frame);
                attrs
            })
            .collect();
        assert_eq!(
            attrs,
            vec![
                FrameAttributes::empty(),
                FrameAttributes::empty(),
                FrameAttributes::END_OF_STREAM
            ]
        );
    }

    #[test]
    fn test_import_marks_out_of_range() {
        let (ring, filters) = setup(8);
        let config = ImportConfig::new(1).with_ranges("1-2".parse().unwrap());
        let importer = Importer::new(ring.clone(), filters, RunControl::new(), config, true);
        importer.run(
            Frames {
                remaining: VecDeque::from(vec![1, 2, 3]),
            },
            SourceSequence::single("mem"),
        );
        assert_eq!(ring.counts().wait, 4);
        let flags: Vec<bool> = (0..3)
            .map(|_| {
                let frame = ring.reserve().unwrap();
                let out = frame.attributes().contains(FrameAttributes::OUT_OF_RANGE);
                ring.remove(frame);
                out
            })
            .collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn test_cancel_unblocks_full_ring() {
        let (ring, filters) = setup(2);
        let run = RunControl::new();
        let importer = Importer::new(ring.clone(), filters, run.clone(), ImportConfig::new(1), false);
        let mut thread = importer
            .spawn(
                Frames {
                    remaining: (0..100).collect(),
                },
                SourceSequence::single("mem"),
            )
            .unwrap();
        while ring.waiting(FrameStatus::Null) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        run.stop();
        assert_eq!(thread.cancel(Duration::ZERO), ImportStatus::Done);
        assert!(!thread.is_active());
    }
}
