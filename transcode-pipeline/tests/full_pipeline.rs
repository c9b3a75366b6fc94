//! Pipeline integration tests.
//!
//! Runs whole sessions with mock import and export modules and checks what
//! the encoder observes.

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use transcode_core::frame::{FrameAttributes, FrameSpecs, PixelFormat, PoolFrame, VideoFrame};
use transcode_core::pool::DEFAULT_FRAME_BUFFER;
use transcode_core::sample::AudioFrame;
use transcode_pipeline::*;

// =============================================================================
// Mock Implementations
// =============================================================================

/// Mock video decoder writing the frame number into the first payload byte.
struct MockVideoDecoder {
    frames_per_source: usize,
    remaining: usize,
    produced: usize,
    delay: Option<Duration>,
    widths: HashMap<PathBuf, u32>,
}

impl MockVideoDecoder {
    fn new(frames: usize) -> Self {
        Self {
            frames_per_source: frames,
            remaining: 0,
            produced: 0,
            delay: None,
            widths: HashMap::new(),
        }
    }

    /// Never runs dry; each read takes `delay`.
    fn endless(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(usize::MAX)
        }
    }

    fn with_width(mut self, path: &str, width: u32) -> Self {
        self.widths.insert(PathBuf::from(path), width);
        self
    }
}

impl Decoder<VideoFrame> for MockVideoDecoder {
    fn name(&self) -> &str {
        "mock-video"
    }

    fn open(&mut self, _source: &SourceInfo) -> Result<()> {
        self.remaining = self.frames_per_source;
        Ok(())
    }

    fn decode(&mut self, frame: &mut VideoFrame, _bytes: usize) -> Result<usize> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.remaining == 0 {
            return Err(PipelineError::module("mock-video", "end of stream"));
        }
        self.remaining -= 1;
        frame.buffer_mut()[0] = self.produced as u8;
        frame.set_size(1)?;
        self.produced += 1;
        Ok(1)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn probe(&mut self, path: &Path) -> Result<ProbeInfo> {
        Ok(ProbeInfo {
            width: self.widths.get(path).copied().unwrap_or(320),
            height: 240,
            codec: "raw".into(),
            ..ProbeInfo::default()
        })
    }
}

/// Mock audio decoder producing one block per video frame.
struct MockAudioDecoder {
    remaining: usize,
}

impl Decoder<AudioFrame> for MockAudioDecoder {
    fn name(&self) -> &str {
        "mock-audio"
    }

    fn open(&mut self, _source: &SourceInfo) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, frame: &mut AudioFrame, _bytes: usize) -> Result<usize> {
        if self.remaining == 0 {
            return Err(PipelineError::module("mock-audio", "end of stream"));
        }
        self.remaining -= 1;
        frame.set_size(2)?;
        Ok(2)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What the mock encoder saw for one video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Seen {
    id: u64,
    payload: u8,
    attributes: FrameAttributes,
}

#[derive(Default)]
struct Log {
    video: Vec<Seen>,
    audio: usize,
}

/// Mock encoder recording every frame it is given.
#[derive(Clone, Default)]
struct MockEncoder {
    log: Arc<Mutex<Log>>,
    fail_at: Option<usize>,
}

impl MockEncoder {
    fn ids(&self) -> Vec<u64> {
        self.log.lock().video.iter().map(|s| s.id).collect()
    }

    fn seen(&self) -> Vec<Seen> {
        self.log.lock().video.clone()
    }
}

impl Encoder for MockEncoder {
    fn name(&self) -> &str {
        "mock-encoder"
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn encode_video(&mut self, frame: &VideoFrame) -> Result<usize> {
        let mut log = self.log.lock();
        if self.fail_at == Some(log.video.len()) {
            return Err(PipelineError::Encode("device full".into()));
        }
        log.video.push(Seen {
            id: frame.id(),
            payload: frame.data()[0],
            attributes: frame.attributes(),
        });
        Ok(frame.size())
    }

    fn encode_audio(&mut self, frame: &AudioFrame) -> Result<usize> {
        self.log.lock().audio += 1;
        Ok(frame.size())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sleeps a pseudo-random few milliseconds per frame.
struct Jitter;

impl FrameTransform<VideoFrame> for Jitter {
    fn transform(&self, frame: &mut VideoFrame) -> Result<()> {
        let millis = (frame.id().wrapping_mul(7919) >> 3) % 4;
        thread::sleep(Duration::from_millis(millis));
        Ok(())
    }
}

fn config(frame_buffer: usize, video_workers: usize) -> SessionConfig {
    SessionConfig {
        frame_buffer,
        video_workers,
        cooldown: Duration::from_millis(50),
        specs: FrameSpecs::new(16, 16, PixelFormat::Gray8, 8000, 1, 16),
        ..SessionConfig::default()
    }
}

fn run(config: SessionConfig, frames: usize, filters: &[&str], encoder: &MockEncoder) -> SessionReport {
    let mut builder = Session::builder()
        .config(config)
        .video_input(MockVideoDecoder::new(frames), SourceSequence::single("video.raw"))
        .encoder(encoder.clone());
    for spec in filters {
        builder = builder.video_filter(spec).unwrap();
    }
    builder.build().unwrap().run().unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_in_order_without_workers() {
    let encoder = MockEncoder::default();
    let session = Session::builder()
        .config(config(4, 0))
        .video_input(MockVideoDecoder::new(10), SourceSequence::single("video.raw"))
        .encoder(encoder.clone())
        .build()
        .unwrap();
    let monitor = session.monitor();
    let report = session.run().unwrap();

    assert!(report.is_success());
    assert_eq!(encoder.ids(), (0..10).collect::<Vec<_>>());
    assert_eq!(monitor.video_in_flight(), 0);
}

#[test]
fn test_skipped_frame_never_exported() {
    let encoder = MockEncoder::default();
    let report = run(config(4, 0), 10, &["skip=5"], &encoder);

    assert_eq!(encoder.ids(), vec![0, 1, 2, 3, 4, 6, 7, 8, 9]);
    assert_eq!(report.counters.skipped, 1);
    assert_eq!(report.counters.encoded, 9);
}

#[test]
fn test_cloned_frame_exported_twice() {
    for workers in [0, 2] {
        let encoder = MockEncoder::default();
        let report = run(config(4, workers), 10, &["clone=3"], &encoder);

        let seen = encoder.seen();
        assert_eq!(seen.len(), 11, "workers = {}", workers);
        let copies: Vec<&Seen> = seen.iter().filter(|s| s.payload == 3).collect();
        assert_eq!(copies.len(), 2);
        let clones = copies
            .iter()
            .filter(|s| s.attributes.contains(FrameAttributes::WAS_CLONED))
            .count();
        assert_eq!(clones, 1);
        assert_eq!(report.counters.cloned, 1);
    }
}

#[test]
fn test_cloning_every_frame_completes() {
    for (frame_buffer, workers) in [(1, 1), (DEFAULT_FRAME_BUFFER, 2), (4, 4)] {
        let encoder = MockEncoder::default();
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let encoder = encoder.clone();
            thread::spawn(move || {
                let report = run(config(frame_buffer, workers), 20, &["clone=0-100"], &encoder);
                let _ = tx.send(report);
            });
        }
        let report = rx
            .recv_timeout(Duration::from_secs(20))
            .unwrap_or_else(|_| panic!("stalled with frame_buffer={} workers={}", frame_buffer, workers));

        assert!(report.is_success());
        assert_eq!(report.counters.encoded, 40);
        assert_eq!(report.counters.cloned, 20);
        let ids = encoder.ids();
        let expected: Vec<u64> = (0..20).flat_map(|id| [id, id]).collect();
        assert_eq!(ids, expected, "frame_buffer={} workers={}", frame_buffer, workers);
    }
}

#[test]
fn test_interrupt_with_idle_workers() {
    let encoder = MockEncoder::default();
    let session = Session::builder()
        .config(config(4, 3))
        .video_input(MockVideoDecoder::endless(Duration::from_millis(20)), SourceSequence::single("video.raw"))
        .encoder(encoder.clone())
        .build()
        .unwrap();
    let control = session.run_control();
    let handle = thread::spawn(move || session.run());

    thread::sleep(Duration::from_millis(100));
    control.interrupt();
    let report = handle.join().unwrap().unwrap();

    assert_eq!(report.run, RunStatus::Interrupted);
    assert_eq!(report.export, ExportOutcome::Interrupted);
    assert_eq!(report.video_status, ImportStatus::Interrupted);
    assert!(!report.is_success());
}

#[test]
fn test_order_under_jittered_workers() {
    let encoder = MockEncoder::default();
    let report = Session::builder()
        .config(config(8, 2))
        .video_input(MockVideoDecoder::new(100), SourceSequence::single("video.raw"))
        .video_transform(Jitter)
        .encoder(encoder.clone())
        .build()
        .unwrap()
        .run()
        .unwrap();

    assert!(report.is_success());
    assert_eq!(encoder.ids(), (0..100).collect::<Vec<_>>());
}

// =============================================================================
// Ordering, Skip and Clone Properties
// =============================================================================

#[test]
fn test_ascending_order_for_any_worker_count() {
    for workers in [0, 1, 4] {
        let encoder = MockEncoder::default();
        run(config(6, workers), 30, &[], &encoder);
        assert_eq!(encoder.ids(), (0..30).collect::<Vec<_>>(), "workers = {}", workers);
    }
}

#[test]
fn test_skipped_range_with_workers() {
    let encoder = MockEncoder::default();
    let report = run(config(4, 3), 12, &["skip=2-5"], &encoder);

    let ids = encoder.ids();
    assert!(ids.iter().all(|id| !(2..5).contains(id)));
    assert_eq!(ids.len(), 9);
    assert_eq!(report.counters.skipped, 3);
}

#[test]
fn test_clone_and_skip_leave_ring_empty() {
    let encoder = MockEncoder::default();
    let session = Session::builder()
        .config(config(4, 2))
        .video_input(MockVideoDecoder::new(20), SourceSequence::single("video.raw"))
        .video_filter("clone=4-8/2")
        .unwrap()
        .video_filter("skip=10")
        .unwrap()
        .encoder(encoder.clone())
        .build()
        .unwrap();
    let monitor = session.monitor();
    let report = session.run().unwrap();

    // 4 and 6 doubled, 10 gone
    assert_eq!(report.counters.encoded, 21);
    assert_eq!(monitor.video_in_flight(), 0);
}

// =============================================================================
// Export Range, Audio and Failures
// =============================================================================

#[test]
fn test_export_range_and_interval() {
    let encoder = MockEncoder::default();
    let mut cfg = config(4, 0);
    cfg.export = ExportConfig {
        first: 3,
        last: Some(9),
        frame_interval: 2,
    };
    let report = run(cfg, 20, &[], &encoder);

    assert_eq!(report.export, ExportOutcome::Completed);
    assert_eq!(encoder.ids(), vec![3, 5, 7]);
}

#[test]
fn test_import_ranges_mark_out_of_range() {
    let encoder = MockEncoder::default();
    let mut cfg = config(4, 2);
    cfg.video_import = ImportConfig::default().with_ranges("0-5".parse().unwrap());
    let report = run(cfg, 10, &[], &encoder);

    assert_eq!(encoder.ids(), (0..5).collect::<Vec<_>>());
    assert_eq!(report.counters.dropped, 5);
}

#[test]
fn test_audio_paired_with_video() {
    let encoder = MockEncoder::default();
    let report = Session::builder()
        .config(config(4, 1))
        .video_input(MockVideoDecoder::new(15), SourceSequence::single("video.raw"))
        .audio_input(MockAudioDecoder { remaining: 15 }, SourceSequence::single("audio.raw"))
        .encoder(encoder.clone())
        .build()
        .unwrap()
        .run()
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.audio_status, Some(ImportStatus::Done));
    assert_eq!(encoder.log.lock().audio, 15);
    assert_eq!(encoder.ids().len(), 15);
}

#[test]
fn test_sequential_sources_form_one_stream() {
    let encoder = MockEncoder::default();
    let sources = SourceSequence::from_paths(vec!["a.raw".into(), "b.raw".into(), "c.raw".into()]).unwrap();
    let report = Session::builder()
        .config(config(4, 2))
        .video_input(MockVideoDecoder::new(5), sources)
        .encoder(encoder.clone())
        .build()
        .unwrap()
        .run()
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.counters.encoded, 15);
    // one separator frame between each pair of sources
    assert_eq!(report.counters.skipped, 2);
    let payloads: Vec<u8> = encoder.seen().iter().map(|s| s.payload).collect();
    assert_eq!(payloads, (0..15).collect::<Vec<u8>>());
}

#[test]
fn test_incompatible_source_stops_import() {
    let encoder = MockEncoder::default();
    let sources = SourceSequence::from_paths(vec!["a.raw".into(), "b.raw".into()]).unwrap();
    let report = Session::builder()
        .config(config(4, 0))
        .video_input(MockVideoDecoder::new(3).with_width("b.raw", 640), sources)
        .encoder(encoder.clone())
        .build()
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.video_status, ImportStatus::ProbeError);
    assert!(!report.is_success());
}

#[test]
fn test_encoder_failure_interrupts_session() {
    let encoder = MockEncoder {
        fail_at: Some(3),
        ..MockEncoder::default()
    };
    let report = run(config(4, 2), 50, &[], &encoder);

    assert!(report.export.is_failure());
    assert_eq!(report.run, RunStatus::Interrupted);
    assert_eq!(encoder.ids(), vec![0, 1, 2]);
}

#[test]
fn test_report_serializes() {
    let encoder = MockEncoder::default();
    let report = run(config(4, 0), 3, &[], &encoder);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["video_status"], "done");
    assert_eq!(json["counters"]["encoded"], 3);
}
