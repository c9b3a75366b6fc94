//! Staged frame scheduling for the Transcode toolkit.
//!
//! Import threads fill frames from decoder modules, an optional pool of
//! filter workers processes them, and the export loop hands them to an
//! encoder module in frame order. All stages share one bounded
//! [`FrameRing`](transcode_core::FrameRing) per media kind.

mod counters;
mod error;
mod export;
mod filter;
mod import;
mod module;
mod pipeline;
mod runcontrol;
mod workers;

pub use counters::{CounterSnapshot, FrameCounters, Progress};
pub use error::{PipelineError, Result};
pub use export::{ExportConfig, ExportLoop, ExportOutcome, RingSource};
pub use filter::{
    option_value, split_filter_spec, CloneFilter, FilterCatalog, FilterCtor, FilterId, FilterInfo, FilterRegistry,
    FilterStage, FrameFilter, InvertFilter, NullFilter, SkipFilter,
};
pub use import::{
    stop_cause, ImportConfig, ImportStatus, ImportThread, Importer, SourceSequence, DEFAULT_COOLDOWN,
    DEFAULT_LEAP_INTERVAL,
};
pub use module::{probe_matches, probe_mismatch, Decoder, Encoder, ProbeInfo, SourceInfo, TrackInfo};
pub use pipeline::{Session, SessionBuilder, SessionConfig, SessionMonitor, SessionReport};
pub use runcontrol::{Interruptible, RunControl, RunStatus, PAUSE_POLL};
pub use workers::{FrameProcessor, FrameTransform, WorkerPool, MAX_WORKERS};
