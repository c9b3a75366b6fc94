//! Filter worker pool.
//!
//! Workers drain the `Wait` stage of a ring, run the multi-threaded filter
//! stages and the internal transform, and push frames on to `Ready`. The
//! ring hands `Ready` frames to export in id order, so workers may finish
//! in any order.
//!
//! With zero workers nothing is spawned and export runs the same steps
//! itself; see [`crate::export::RingSource`].

use crate::counters::FrameCounters;
use crate::error::PipelineError;
use crate::filter::{FilterRegistry, FilterStage};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};
use transcode_core::frame::{FrameAttributes, FrameStatus, MediaKind, PoolFrame};
use transcode_core::pool::{FrameRing, RingFrame};

/// Upper bound on worker threads per media kind.
pub const MAX_WORKERS: usize = 32;

/// Built-in per-frame processing run between the two multi-threaded
/// filter stages.
pub trait FrameTransform<F>: Send + Sync {
    fn transform(&self, frame: &mut F) -> Result<()>;
}

/// Filters plus internal transform for one media kind.
pub struct FrameProcessor<F> {
    filters: Arc<FilterRegistry<F>>,
    transform: Option<Arc<dyn FrameTransform<F>>>,
}

impl<F: PoolFrame> FrameProcessor<F> {
    pub fn new(filters: Arc<FilterRegistry<F>>) -> Self {
        Self {
            filters,
            transform: None,
        }
    }

    /// Set the internal transform.
    #[must_use]
    pub fn with_transform(mut self, transform: Arc<dyn FrameTransform<F>>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// The filter registry.
    pub fn filters(&self) -> &Arc<FilterRegistry<F>> {
        &self.filters
    }

    /// Run the filters registered for this kind at `stage`.
    pub fn run_filters(&self, stage: FilterStage, frame: &mut F) {
        self.filters.process(stage, frame);
    }

    /// Run the internal transform. A failure marks the frame broken.
    pub fn internal(&self, frame: &mut F) {
        if let Some(transform) = &self.transform {
            if let Err(e) = transform.transform(frame) {
                warn!(kind = %F::KIND, id = frame.id(), "internal processing failed: {}", e);
                frame.attributes_mut().insert(FrameAttributes::BROKEN);
            }
        }
    }
}

/// Remove a skipped frame, counting it when it is video.
pub(crate) fn discard<F: PoolFrame>(ring: &FrameRing<F>, frame: RingFrame<F>, counters: &FrameCounters) {
    trace!(kind = %F::KIND, id = frame.id(), "dropping skipped frame");
    if F::KIND == MediaKind::Video {
        counters.add_skipped(1);
    }
    ring.remove(frame);
}

fn is_skipped<F: PoolFrame>(frame: &F) -> bool {
    frame.attributes().contains(FrameAttributes::SKIPPED)
}

/// Threads running the filter stage for one media kind.
pub struct WorkerPool<F: PoolFrame> {
    ring: FrameRing<F>,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl<F: PoolFrame> WorkerPool<F> {
    /// Spawn `workers` threads, capped at [`MAX_WORKERS`].
    pub fn start(
        ring: FrameRing<F>,
        processor: Arc<FrameProcessor<F>>,
        counters: Arc<FrameCounters>,
        workers: usize,
    ) -> Result<Self> {
        let count = if workers > MAX_WORKERS {
            warn!(kind = %F::KIND, requested = workers, "too many filter workers, using {}", MAX_WORKERS);
            MAX_WORKERS
        } else {
            workers
        };

        let mut pool = Self {
            ring,
            running: Arc::new(AtomicBool::new(true)),
            handles: Vec::with_capacity(count),
        };
        for index in 0..count {
            let worker = Worker {
                index,
                ring: pool.ring.clone(),
                processor: Arc::clone(&processor),
                counters: Arc::clone(&counters),
                running: Arc::clone(&pool.running),
            };
            let handle = thread::Builder::new()
                .name(format!("{}-filter-{}", F::KIND, index))
                .spawn(move || worker.run())
                .map_err(|e| {
                    warn!(kind = %F::KIND, "cannot spawn filter worker: {}", e);
                    PipelineError::Spawn(format!("{} filter", F::KIND))
                });
            match handle {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    pool.close();
                    return Err(e);
                }
            }
        }
        if count > 0 {
            debug!(kind = %F::KIND, workers = count, "filter workers started");
        }
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool runs no threads.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop and join every worker.
    pub fn close(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.ring.interrupt_stage(FrameStatus::Wait);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!(kind = %F::KIND, "filter worker panicked");
            }
        }
        debug!(kind = %F::KIND, "filter workers joined");
    }
}

impl<F: PoolFrame> Drop for WorkerPool<F> {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker<F: PoolFrame> {
    index: usize,
    ring: FrameRing<F>,
    processor: Arc<FrameProcessor<F>>,
    counters: Arc<FrameCounters>,
    running: Arc<AtomicBool>,
}

impl<F: PoolFrame> Worker<F> {
    fn run(self) {
        trace!(kind = %F::KIND, worker = self.index, "filter worker running");
        loop {
            // after end of stream, finish whatever is still queued
            if !self.running.load(Ordering::SeqCst) && self.ring.counts().wait == 0 {
                break;
            }
            let Some(mut frame) = self.ring.reserve() else {
                debug!(kind = %F::KIND, worker = self.index, "filter worker interrupted");
                break;
            };

            if frame.attributes().contains(FrameAttributes::END_OF_STREAM) {
                debug!(kind = %F::KIND, worker = self.index, id = frame.id(), "end of stream reached");
                self.running.store(false, Ordering::SeqCst);
                self.ring.push_next(frame, FrameStatus::Ready);
                continue;
            }
            if is_skipped(&*frame) {
                discard(&self.ring, frame, &self.counters);
                continue;
            }

            if frame.attributes().needs_processing() {
                self.processor.run_filters(FilterStage::PreMulti, &mut frame);
                if is_skipped(&*frame) {
                    discard(&self.ring, frame, &self.counters);
                    continue;
                }
                if frame.attributes().contains(FrameAttributes::IS_CLONED) {
                    self.clone_frame(&mut frame);
                }
                self.processor.internal(&mut frame);
                self.processor.run_filters(FilterStage::PostMulti, &mut frame);
                // a pending clone still has to reach export to be settled
                if is_skipped(&*frame) && !frame.attributes().contains(FrameAttributes::IS_CLONED) {
                    discard(&self.ring, frame, &self.counters);
                    continue;
                }
            }
            self.ring.push_next(frame, FrameStatus::Ready);
        }
        trace!(kind = %F::KIND, worker = self.index, "filter worker done");
    }

    /// Queue an independent copy of `frame` for its own pass through the filters.
    ///
    /// Without a free buffer the frame keeps `IS_CLONED` and export repeats
    /// it on dispose, so a worker never waits on the free stage.
    fn clone_frame(&self, frame: &mut RingFrame<F>) {
        match self.ring.try_dup(&**frame) {
            Ok(Some(mut clone)) => {
                frame.attributes_mut().remove(FrameAttributes::IS_CLONED);
                clone.attributes_mut().settle_clone();
                trace!(kind = %F::KIND, id = clone.id(), bufid = clone.header().bufid(), "frame cloned");
                self.ring.push_next(clone, FrameStatus::Wait);
            }
            Ok(None) => trace!(kind = %F::KIND, id = frame.id(), "ring full, clone left to export"),
            Err(e) => {
                frame.attributes_mut().remove(FrameAttributes::IS_CLONED);
                warn!(kind = %F::KIND, id = frame.id(), "cannot clone frame: {}", e);
            }
        }
    }
}
