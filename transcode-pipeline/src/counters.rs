//! Session-wide frame counters.
//!
//! Monotonic atomics shared by the stages. Reads are relaxed and only
//! meant for progress reporting and the final report.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use transcode_core::pool::StageCounters;
use transcode_core::record_counter;

/// Frame counters for one session.
#[derive(Debug, Default)]
pub struct FrameCounters {
    encoded: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    cloned: AtomicU64,
}

impl FrameCounters {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame pair was handed to the encoder.
    pub fn add_encoded(&self, n: u64) {
        self.encoded.fetch_add(n, Ordering::Relaxed);
        record_counter!("pipeline.frames.encoded", n);
    }

    /// A skipped video frame was removed before export.
    pub fn add_skipped(&self, n: u64) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
        record_counter!("pipeline.frames.skipped", n);
    }

    /// Export acquired a frame pair but did not encode it.
    pub fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
        record_counter!("pipeline.frames.dropped", n);
    }

    /// A cloned video frame reached export.
    pub fn add_cloned(&self, n: u64) {
        self.cloned.fetch_add(n, Ordering::Relaxed);
        record_counter!("pipeline.frames.cloned", n);
    }

    pub fn encoded(&self) -> u64 {
        self.encoded.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn cloned(&self) -> u64 {
        self.cloned.load(Ordering::Relaxed)
    }

    /// Net shift between import ids and output frame numbers.
    pub fn skipped_cloned(&self) -> i64 {
        self.cloned() as i64 - self.skipped() as i64
    }

    /// Output frame number for the video frame with import id `id`.
    pub fn output_id(&self, id: u64) -> u64 {
        (id as i64 + self.skipped_cloned()).max(0) as u64
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            encoded: self.encoded(),
            skipped: self.skipped(),
            dropped: self.dropped(),
            cloned: self.cloned(),
        }
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub encoded: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub cloned: u64,
}

/// Progress of a running session, for a progress meter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub counters: CounterSnapshot,
    pub video: StageCounters,
    pub audio: Option<StageCounters>,
}
