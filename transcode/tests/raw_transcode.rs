//! End-to-end transcodes of raw files.

use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use transcode::prelude::*;
use transcode::ImportStatus;

const WIDTH: u32 = 8;
const HEIGHT: u32 = 4;
const FRAME: usize = (WIDTH * HEIGHT) as usize;

/// Write `frames` gray frames, frame `i` filled with byte `first + i`.
fn write_clip(path: &Path, first: u8, frames: u8) {
    let data: Vec<u8> = (0..frames).flat_map(|i| vec![first + i; FRAME]).collect();
    std::fs::write(path, data).unwrap();
}

fn options(dir: &TempDir) -> TranscodeOptions {
    TranscodeOptions::new()
        .output(dir.path().join("out.gray"))
        .video_config(transcode::VideoConfig {
            width: WIDTH,
            height: HEIGHT,
            format: PixelFormat::Gray8,
            fps: 25.0,
        })
        .frame_buffer(4)
        .cooldown(std::time::Duration::from_millis(50))
}

/// First byte of every frame in the output.
fn frame_markers(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap().chunks(FRAME).map(|f| f[0]).collect()
}

#[test]
fn test_copy_preserves_frames() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.gray");
    write_clip(&input, 0, 12);

    let stats = Transcoder::new(options(&dir).input(&input).threads(3))
        .unwrap()
        .run()
        .unwrap();

    assert!(stats.is_success());
    assert_eq!(stats.frames_encoded, 12);
    assert_eq!(
        std::fs::read(dir.path().join("out.gray")).unwrap(),
        std::fs::read(&input).unwrap()
    );
}

#[test]
fn test_skip_and_clone_filters() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.gray");
    write_clip(&input, 0, 8);

    let stats = Transcoder::new(options(&dir).input(&input).threads(2).filter("skip=2").filter("clone=5"))
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(stats.frames_skipped, 1);
    assert_eq!(stats.frames_cloned, 1);
    assert_eq!(frame_markers(&dir.path().join("out.gray")), vec![0, 1, 3, 4, 5, 5, 6, 7]);
}

#[test]
fn test_invert_filter_over_range() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.gray");
    write_clip(&input, 10, 4);

    Transcoder::new(options(&dir).input(&input).filter("invert=range=1-3"))
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(frame_markers(&dir.path().join("out.gray")), vec![10, 255 - 11, 255 - 12, 13]);
}

#[test]
fn test_sequential_inputs() {
    let dir = tempfile::tempdir().unwrap();
    write_clip(&dir.path().join("part1.gray"), 0, 3);
    write_clip(&dir.path().join("part2.gray"), 3, 3);

    let stats = Transcoder::new(options(&dir).input_sequence(dir.path().join("part*.gray")).threads(2))
        .unwrap()
        .run()
        .unwrap();

    assert!(stats.is_success());
    assert_eq!(frame_markers(&dir.path().join("out.gray")), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_truncated_sequence_member_fails_probe() {
    let dir = tempfile::tempdir().unwrap();
    write_clip(&dir.path().join("part1.gray"), 0, 2);
    std::fs::write(dir.path().join("part2.gray"), [0u8; FRAME + 1]).unwrap();

    let stats = Transcoder::new(options(&dir).input_sequence(dir.path().join("part*.gray")))
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(stats.report.video_status, ImportStatus::ProbeError);
    assert!(!stats.is_success());
}

#[test]
fn test_audio_written_alongside() {
    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("in.gray");
    let audio = dir.path().join("in.pcm");
    write_clip(&video, 0, 5);
    // 8000 Hz mono 8-bit at 25 fps is 320 bytes per frame
    std::fs::write(&audio, vec![7u8; 320 * 5]).unwrap();

    let mut opts = options(&dir).input(&video).audio_input(&audio);
    opts.audio = transcode::AudioConfig {
        sample_rate: 8000,
        channels: 1,
        bits: 8,
    };
    opts.output = Some(transcode::OutputConfig::new(dir.path().join("out.gray")).audio(dir.path().join("out.pcm")));

    let stats = Transcoder::new(opts).unwrap().run().unwrap();
    assert!(stats.is_success());
    assert_eq!(std::fs::read(dir.path().join("out.pcm")).unwrap().len(), 320 * 5);
}

#[test]
fn test_progress_callback_runs() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.gray");
    write_clip(&input, 0, 20);
    let calls = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&calls);
    Transcoder::new(options(&dir).input(&input))
        .unwrap()
        .progress_interval(std::time::Duration::from_millis(1))
        .on_progress(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        })
        .run()
        .unwrap();

    assert!(calls.load(Ordering::Relaxed) >= 1);
}

#[test]
fn test_existing_output_needs_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.gray");
    write_clip(&input, 0, 2);
    std::fs::write(dir.path().join("out.gray"), b"keep").unwrap();

    let stats = Transcoder::new(options(&dir).input(&input)).unwrap().run().unwrap();
    assert!(stats.report.export.is_failure());
    assert_eq!(std::fs::read(dir.path().join("out.gray")).unwrap(), b"keep");

    let stats = Transcoder::new(options(&dir).input(&input).overwrite(true))
        .unwrap()
        .run()
        .unwrap();
    assert!(stats.is_success());
}
