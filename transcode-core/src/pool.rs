//! Staged frame rings.
//!
//! A [`FrameRing`] preallocates a fixed number of frame buffers and moves
//! them through the pipeline stages `Null -> Empty -> Wait -> Ready -> Null`.
//! Each stage has a queue and a condition variable; the blocking operations
//! ([`register`], [`reserve`], [`retrieve`], [`dup`]) park on the stage they
//! take from and return `None` once that stage is interrupted.
//!
//! A frame taken out of a queue is owned by exactly one [`RingFrame`] handle
//! until it is handed back with [`push_next`], [`remove`] or [`reinject`].
//! Dropping a handle returns its buffer to the free stage.
//!
//! The `Ready` stage is ordered by frame id. [`retrieve`] serves the lowest
//! ready id, and only once no lower id is still upstream (being filled,
//! waiting for a filter worker, or held by one), so export observes ids in
//! ascending order however the workers interleave.
//!
//! [`register`]: FrameRing::register
//! [`reserve`]: FrameRing::reserve
//! [`retrieve`]: FrameRing::retrieve
//! [`dup`]: FrameRing::dup
//! [`push_next`]: FrameRing::push_next
//! [`remove`]: FrameRing::remove
//! [`reinject`]: FrameRing::reinject

use crate::error::{Error, Result};
use crate::frame::{CopyMode, FrameSpecs, FrameStatus, MediaKind, PoolFrame, VideoFrame};
use crate::sample::AudioFrame;
use crate::{record_counter, record_gauge};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Default number of buffers per ring.
pub const DEFAULT_FRAME_BUFFER: usize = 10;

const STAGES: usize = FrameStatus::ALL.len();

/// Ring of video frames.
pub type VideoRing = FrameRing<VideoFrame>;
/// Ring of audio frames.
pub type AudioRing = FrameRing<AudioFrame>;

/// Exact occupancy of a ring, taken under its lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RingCounts {
    /// Free buffers.
    pub null: usize,
    /// Queued in `Empty`.
    pub empty: usize,
    /// Queued in `Wait`.
    pub wait: usize,
    /// Queued in `Ready`.
    pub ready: usize,
    /// Checked out by some thread.
    pub locked: usize,
}

impl RingCounts {
    /// Sum over every stage; always equals the ring capacity.
    pub fn total(&self) -> usize {
        self.null + self.empty + self.wait + self.ready + self.locked
    }
}

/// Frames owned by each pipeline stage, queued or held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounters {
    /// Frames registered by import and not yet pushed on.
    pub import: usize,
    /// Frames awaiting or undergoing filtering.
    pub filter: usize,
    /// Frames awaiting or undergoing export.
    pub export: usize,
}

struct Ranked<F> {
    id: u64,
    order: i64,
    frame: Box<F>,
}

impl<F> PartialEq for Ranked<F> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.order == other.order
    }
}

impl<F> Eq for Ranked<F> {}

impl<F> PartialOrd for Ranked<F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<F> Ord for Ranked<F> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.id, self.order).cmp(&(other.id, other.order))
    }
}

enum StageQueue<F> {
    Fifo(VecDeque<Box<F>>),
    Ordered(BinaryHeap<Reverse<Ranked<F>>>),
}

impl<F: PoolFrame> StageQueue<F> {
    fn for_status(status: FrameStatus, capacity: usize) -> Self {
        match status {
            FrameStatus::Ready => StageQueue::Ordered(BinaryHeap::with_capacity(capacity)),
            _ => StageQueue::Fifo(VecDeque::with_capacity(capacity)),
        }
    }

    fn len(&self) -> usize {
        match self {
            StageQueue::Fifo(q) => q.len(),
            StageQueue::Ordered(h) => h.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put(&mut self, frame: Box<F>, order: i64, front: bool) {
        match self {
            StageQueue::Fifo(q) if front => q.push_front(frame),
            StageQueue::Fifo(q) => q.push_back(frame),
            StageQueue::Ordered(h) => h.push(Reverse(Ranked {
                id: frame.id(),
                order,
                frame,
            })),
        }
    }

    fn get(&mut self) -> Option<Box<F>> {
        match self {
            StageQueue::Fifo(q) => q.pop_front(),
            StageQueue::Ordered(h) => h.pop().map(|Reverse(r)| r.frame),
        }
    }

    fn peek_id(&self) -> Option<u64> {
        match self {
            StageQueue::Fifo(q) => q.front().map(|f| f.id()),
            StageQueue::Ordered(h) => h.peek().map(|Reverse(r)| r.id),
        }
    }
}

struct RingState<F> {
    queues: [StageQueue<F>; STAGES],
    waiting: [usize; STAGES],
    interrupted: [bool; STAGES],
    held: [usize; STAGES],
    // ids registered but not yet handed to export, with multiplicity
    upstream: BTreeMap<u64, usize>,
    arrivals: i64,
    reinjections: i64,
}

impl<F: PoolFrame> RingState<F> {
    fn queue(&mut self, status: FrameStatus) -> &mut StageQueue<F> {
        &mut self.queues[status.index()]
    }

    fn track(&mut self, id: u64) {
        *self.upstream.entry(id).or_insert(0) += 1;
    }

    fn untrack(&mut self, id: u64) {
        if let Some(count) = self.upstream.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.upstream.remove(&id);
            }
        }
    }

    /// Returns true when the lowest upstream id may have changed.
    fn move_upstream(&mut self, id: u64, from: FrameStatus, to: FrameStatus) -> bool {
        match (from.is_upstream(), to.is_upstream()) {
            (true, false) => {
                self.untrack(id);
                true
            }
            (false, true) => {
                self.track(id);
                false
            }
            _ => false,
        }
    }

    fn ready_is_servable(&self) -> bool {
        match self.queues[FrameStatus::Ready.index()].peek_id() {
            Some(id) => self.upstream.keys().next().map_or(true, |low| id <= *low),
            None => false,
        }
    }

    fn next_order(&mut self, front: bool) -> i64 {
        if front {
            self.reinjections += 1;
            -self.reinjections
        } else {
            self.arrivals += 1;
            self.arrivals
        }
    }

    fn counts(&self) -> RingCounts {
        RingCounts {
            null: self.queues[FrameStatus::Null.index()].len(),
            empty: self.queues[FrameStatus::Empty.index()].len(),
            wait: self.queues[FrameStatus::Wait.index()].len(),
            ready: self.queues[FrameStatus::Ready.index()].len(),
            locked: self.held.iter().sum(),
        }
    }
}

struct Shared<F> {
    kind: MediaKind,
    capacity: usize,
    state: Mutex<RingState<F>>,
    signals: [Condvar; STAGES],
}

impl<F: PoolFrame> Shared<F> {
    fn wake(&self, status: FrameStatus) {
        // several workers may be eligible for the same wait queue
        if status == FrameStatus::Wait {
            self.signals[status.index()].notify_all();
        } else {
            self.signals[status.index()].notify_one();
        }
    }

    /// Block until `status` can serve a frame; `None` on interruption.
    fn take(&self, state: &mut MutexGuard<'_, RingState<F>>, status: FrameStatus) -> Option<Box<F>> {
        let idx = status.index();
        state.waiting[idx] += 1;
        loop {
            if state.interrupted[idx] {
                break;
            }
            let servable = if status == FrameStatus::Ready {
                state.ready_is_servable()
            } else {
                !state.queues[idx].is_empty()
            };
            if servable {
                break;
            }
            trace!(kind = %self.kind, stage = %status, "blocking, no frames available");
            self.signals[idx].wait(state);
        }
        state.waiting[idx] -= 1;

        if state.interrupted[idx] {
            debug!(kind = %self.kind, stage = %status, "wait interrupted");
            // pass the wakeup on to the next waiter
            self.signals[idx].notify_all();
            return None;
        }
        state.queue(status).get()
    }

    fn checkout(&self, state: &mut RingState<F>, frame: &F) {
        state.held[frame.header().status().index()] += 1;
    }

    /// Put a held frame into the queue for `status`.
    fn put(&self, mut frame: Box<F>, status: FrameStatus, front: bool) {
        let from = frame.header().status();
        let id = frame.id();
        let mut state = self.state.lock();
        state.held[from.index()] -= 1;
        let upstream_changed = state.move_upstream(id, from, status);
        frame.header_mut().set_status(status);
        let order = state.next_order(front);
        trace!(
            kind = %self.kind,
            id,
            bufid = frame.header().bufid(),
            "{} -> {}",
            from,
            status
        );
        state.queue(status).put(frame, order, front);
        self.wake(status);
        if upstream_changed && status != FrameStatus::Ready {
            self.wake(FrameStatus::Ready);
        }
        let in_flight = self.capacity - state.counts().null;
        drop(state);
        record_gauge!("ring.in_flight", in_flight as f64, "kind" => self.kind.as_str());
    }
}

/// A fixed-capacity ring of frame buffers moving through pipeline stages.
pub struct FrameRing<F: PoolFrame> {
    shared: Arc<Shared<F>>,
}

impl<F: PoolFrame> FrameRing<F> {
    /// Allocate `capacity` buffers sized from `specs`.
    ///
    /// At least one buffer is always allocated. Not safe to call while other
    /// threads use a ring for the same media kind.
    pub fn alloc(specs: &FrameSpecs, capacity: usize) -> Result<Self> {
        specs.validate()?;
        let capacity = capacity.max(1);
        let mut queues: [StageQueue<F>; STAGES] =
            std::array::from_fn(|i| StageQueue::for_status(FrameStatus::ALL[i], capacity));

        for bufid in 0..capacity {
            let mut frame = Box::new(F::alloc(specs).map_err(|e| {
                Error::ResourceExhausted(format!("{} frame #{}: {}", F::KIND, bufid, e))
            })?);
            frame.header_mut().set_bufid(bufid);
            frame.header_mut().set_status(FrameStatus::Null);
            queues[FrameStatus::Null.index()].put(frame, 0, false);
        }
        debug!(kind = %F::KIND, capacity, "frame ring allocated");

        Ok(Self {
            shared: Arc::new(Shared {
                kind: F::KIND,
                capacity,
                state: Mutex::new(RingState {
                    queues,
                    waiting: [0; STAGES],
                    interrupted: [false; STAGES],
                    held: [0; STAGES],
                    upstream: BTreeMap::new(),
                    arrivals: 0,
                    reinjections: 0,
                }),
                signals: std::array::from_fn(|_| Condvar::new()),
            }),
        })
    }

    /// Media kind served by this ring.
    pub fn kind(&self) -> MediaKind {
        self.shared.kind
    }

    /// Number of buffers in the ring.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Claim a free buffer for a new frame with the given id.
    ///
    /// The frame comes back in `Empty` status with cleared attributes.
    /// Blocks while the ring is full; `None` once the `Null` stage is
    /// interrupted.
    pub fn register(&self, id: u64) -> Option<RingFrame<F>> {
        self.register_as(id, FrameStatus::Empty)
    }

    fn register_as(&self, id: u64, status: FrameStatus) -> Option<RingFrame<F>> {
        let mut state = self.shared.state.lock();
        let mut frame = self.shared.take(&mut state, FrameStatus::Null)?;
        let header = frame.header_mut();
        header.id = id;
        header.attributes = Default::default();
        header.set_status(status);
        self.shared.checkout(&mut state, &frame);
        if status.is_upstream() {
            state.track(id);
        }
        drop(state);
        trace!(kind = %self.shared.kind, id, bufid = frame.header().bufid(), "registered as {}", status);
        Some(RingFrame::new(frame, &self.shared))
    }

    /// Take the lowest-id frame awaiting the filter stage.
    pub fn reserve(&self) -> Option<RingFrame<F>> {
        self.take(FrameStatus::Wait)
    }

    /// Take the next frame for export, in ascending id order.
    pub fn retrieve(&self) -> Option<RingFrame<F>> {
        self.take(FrameStatus::Ready)
    }

    fn take(&self, status: FrameStatus) -> Option<RingFrame<F>> {
        let mut state = self.shared.state.lock();
        let frame = self.shared.take(&mut state, status)?;
        self.shared.checkout(&mut state, &frame);
        drop(state);
        Some(RingFrame::new(frame, &self.shared))
    }

    /// Move a held frame to `status` and wake whoever waits there.
    pub fn push_next(&self, mut frame: RingFrame<F>, status: FrameStatus) {
        if status == FrameStatus::Locked {
            warn!(kind = %self.shared.kind, id = frame.id(), "refusing to queue a frame as locked, freeing it");
            self.remove(frame);
            return;
        }
        if let Some((boxed, shared)) = frame.release() {
            shared.put(boxed, status, false);
        }
    }

    /// Return a held frame to the free stage.
    pub fn remove(&self, mut frame: RingFrame<F>) {
        if let Some((boxed, shared)) = frame.release() {
            shared.put(boxed, FrameStatus::Null, false);
            record_counter!("ring.removed", 1u64, "kind" => shared.kind.as_str());
        }
    }

    /// Put a held frame back at the head of the stage it was taken from.
    pub fn reinject(&self, mut frame: RingFrame<F>) {
        if let Some((boxed, shared)) = frame.release() {
            let status = boxed.header().status();
            shared.put(boxed, status, true);
        }
    }

    /// Claim a free buffer and fill it with a deep copy of `src`.
    ///
    /// The copy is returned held, in `Wait` status, ready to be pushed back
    /// for filtering. Blocks while the ring is full. While blocked, `src` no
    /// longer holds back export ordering. Callers that themselves keep
    /// buffers from being freed should use [`FrameRing::try_dup`].
    pub fn dup(&self, src: &F) -> Result<Option<RingFrame<F>>> {
        let parked = src.header().status().is_upstream();
        let mut state = self.shared.state.lock();
        if parked {
            state.untrack(src.id());
            self.shared.wake(FrameStatus::Ready);
        }
        let taken = self.shared.take(&mut state, FrameStatus::Null);
        if parked {
            state.track(src.id());
        }
        match taken {
            Some(frame) => self.fill_copy(state, frame, src).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`FrameRing::dup`], but `None` at once when no buffer is free.
    pub fn try_dup(&self, src: &F) -> Result<Option<RingFrame<F>>> {
        let mut state = self.shared.state.lock();
        match state.queue(FrameStatus::Null).get() {
            Some(frame) => self.fill_copy(state, frame, src).map(Some),
            None => {
                trace!(kind = %self.shared.kind, id = src.id(), "no free buffer to duplicate into");
                Ok(None)
            }
        }
    }

    fn fill_copy(&self, mut state: MutexGuard<'_, RingState<F>>, mut frame: Box<F>, src: &F) -> Result<RingFrame<F>> {
        frame.header_mut().set_status(FrameStatus::Wait);
        self.shared.checkout(&mut state, &frame);
        state.track(src.id());
        drop(state);

        frame.header_mut().id = src.id();
        let mut handle = RingFrame::new(frame, &self.shared);
        if let Err(e) = handle.copy_from(src, CopyMode::Deep) {
            self.remove(handle);
            return Err(e);
        }
        trace!(kind = %self.shared.kind, id = src.id(), bufid = handle.header().bufid(), "duplicated");
        Ok(handle)
    }

    /// Copy `src` into `dst`; payload bytes only for [`CopyMode::Deep`].
    pub fn copy(dst: &mut F, src: &F, mode: CopyMode) -> Result<()> {
        dst.copy_from(src, mode)
    }

    /// Wake every blocked thread in every stage and make them return `None`.
    ///
    /// Irreversible for this ring.
    pub fn interrupt(&self) {
        for status in FrameStatus::ALL {
            self.interrupt_stage(status);
        }
    }

    /// Wake threads blocked on `status` and make them return `None`.
    pub fn interrupt_stage(&self, status: FrameStatus) {
        let mut state = self.shared.state.lock();
        state.interrupted[status.index()] = true;
        debug!(
            kind = %self.shared.kind,
            stage = %status,
            waiting = state.waiting[status.index()],
            "interrupting stage"
        );
        self.shared.signals[status.index()].notify_all();
    }

    /// Whether `status` has been interrupted.
    pub fn is_interrupted(&self, status: FrameStatus) -> bool {
        self.shared.state.lock().interrupted[status.index()]
    }

    /// Return every queued, non-free frame to the free stage.
    ///
    /// Frames currently held by a thread are left alone. Meant for use once
    /// producers and consumers have stopped; returns how many were flushed.
    pub fn flush(&self) -> usize {
        let mut state = self.shared.state.lock();
        let mut flushed = 0;
        for status in [FrameStatus::Empty, FrameStatus::Wait, FrameStatus::Ready] {
            while let Some(mut frame) = state.queue(status).get() {
                state.move_upstream(frame.id(), status, FrameStatus::Null);
                debug!(kind = %self.shared.kind, bufid = frame.header().bufid(), "flushing frame in [{}] status", status);
                frame.header_mut().set_status(FrameStatus::Null);
                state.queue(FrameStatus::Null).put(frame, 0, false);
                flushed += 1;
            }
        }
        let held = state.counts().locked;
        if held > 0 {
            debug!(kind = %self.shared.kind, held, "frames still held, not flushed");
        }
        self.shared.signals[FrameStatus::Null.index()].notify_all();
        flushed
    }

    /// Exact per-stage occupancy.
    pub fn counts(&self) -> RingCounts {
        self.shared.state.lock().counts()
    }

    /// Frames owned by import, filter and export, for progress reporting.
    pub fn counters(&self) -> StageCounters {
        let state = self.shared.state.lock();
        let owned = |status: FrameStatus| state.queues[status.index()].len() + state.held[status.index()];
        StageCounters {
            import: owned(FrameStatus::Empty),
            filter: owned(FrameStatus::Wait),
            export: owned(FrameStatus::Ready),
        }
    }

    /// Number of threads blocked on `status`.
    pub fn waiting(&self, status: FrameStatus) -> usize {
        self.shared.state.lock().waiting[status.index()]
    }

    /// Frames currently outside the free stage.
    pub fn in_flight(&self) -> usize {
        let counts = self.counts();
        counts.total() - counts.null
    }

    /// Whether any frame is still travelling through the pipeline.
    pub fn have_more(&self) -> bool {
        self.in_flight() > 0
    }
}

impl<F: PoolFrame> Clone for FrameRing<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: PoolFrame> fmt::Debug for FrameRing<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRing")
            .field("kind", &self.shared.kind)
            .field("capacity", &self.shared.capacity)
            .field("counts", &self.counts())
            .finish()
    }
}

/// Exclusive handle to a frame checked out of a [`FrameRing`].
///
/// Dereferences to the frame. Hand it back through the ring; a handle that
/// is simply dropped frees its buffer.
pub struct RingFrame<F: PoolFrame> {
    frame: Option<Box<F>>,
    shared: Arc<Shared<F>>,
}

impl<F: PoolFrame> RingFrame<F> {
    fn new(frame: Box<F>, shared: &Arc<Shared<F>>) -> Self {
        Self {
            frame: Some(frame),
            shared: Arc::clone(shared),
        }
    }

    fn release(&mut self) -> Option<(Box<F>, Arc<Shared<F>>)> {
        self.frame.take().map(|frame| (frame, Arc::clone(&self.shared)))
    }
}

impl<F: PoolFrame> Deref for RingFrame<F> {
    type Target = F;

    fn deref(&self) -> &F {
        match &self.frame {
            Some(frame) => frame,
            None => unreachable!("ring frame accessed after release"),
        }
    }
}

impl<F: PoolFrame> DerefMut for RingFrame<F> {
    fn deref_mut(&mut self) -> &mut F {
        match &mut self.frame {
            Some(frame) => frame,
            None => unreachable!("ring frame accessed after release"),
        }
    }
}

impl<F: PoolFrame> Drop for RingFrame<F> {
    fn drop(&mut self) {
        if let Some((frame, shared)) = self.release() {
            warn!(
                kind = %shared.kind,
                id = frame.id(),
                bufid = frame.header().bufid(),
                "frame dropped while held, returning it to the pool"
            );
            shared.put(frame, FrameStatus::Null, false);
        }
    }
}

impl<F: PoolFrame + fmt::Debug> fmt::Debug for RingFrame<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.frame {
            Some(frame) => frame.fmt(f),
            None => f.write_str("RingFrame(released)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameAttributes, PixelFormat};
    use std::thread;
    use std::time::Duration;

    fn specs() -> FrameSpecs {
        FrameSpecs::new(4, 4, PixelFormat::Gray8, 100, 1, 8)
    }

    fn ring(capacity: usize) -> VideoRing {
        VideoRing::alloc(&specs(), capacity).unwrap()
    }

    fn wait_for_waiters(ring: &VideoRing, status: FrameStatus, n: usize) {
        for _ in 0..500 {
            if ring.waiting(status) >= n {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("waiters never blocked on {}", status);
    }

    #[test]
    fn test_alloc_at_least_one() {
        let ring = ring(0);
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.counts().null, 1);
    }

    #[test]
    fn test_alloc_assigns_bufids() {
        let ring = ring(3);
        let mut seen: Vec<usize> = (0..3)
            .map(|i| {
                let frame = ring.register(i).unwrap();
                let bufid = frame.header().bufid();
                ring.push_next(frame, FrameStatus::Ready);
                bufid
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_register_resets_header() {
        let ring = ring(1);
        let mut frame = ring.register(1).unwrap();
        frame.attributes_mut().insert(FrameAttributes::SKIPPED);
        ring.remove(frame);

        let frame = ring.register(2).unwrap();
        assert_eq!(frame.id(), 2);
        assert_eq!(frame.attributes(), FrameAttributes::empty());
        assert_eq!(frame.header().status(), FrameStatus::Empty);
        ring.remove(frame);
    }

    #[test]
    fn test_round_trip_restores_free_count() {
        let ring = ring(2);
        let frame = ring.register(0).unwrap();
        assert_eq!(ring.counts().locked, 1);
        ring.push_next(frame, FrameStatus::Wait);
        let frame = ring.reserve().unwrap();
        ring.push_next(frame, FrameStatus::Ready);
        let frame = ring.retrieve().unwrap();
        ring.remove(frame);
        assert_eq!(ring.counts(), RingCounts { null: 2, ..Default::default() });
    }

    #[test]
    fn test_ready_served_by_ascending_id() {
        let ring = ring(4);
        let frames: Vec<_> = (0..3).map(|i| ring.register(i).unwrap()).collect();
        for frame in frames.into_iter().rev() {
            ring.push_next(frame, FrameStatus::Ready);
        }
        let ids: Vec<u64> = (0..3)
            .map(|_| {
                let frame = ring.retrieve().unwrap();
                let id = frame.id();
                ring.remove(frame);
                id
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_retrieve_waits_for_lower_upstream_id() {
        let ring = ring(4);
        let low = ring.register(0).unwrap();
        let high = ring.register(1).unwrap();
        ring.push_next(high, FrameStatus::Ready);

        let consumer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let frame = ring.retrieve().unwrap();
                let id = frame.id();
                ring.remove(frame);
                id
            })
        };
        wait_for_waiters(&ring, FrameStatus::Ready, 1);
        ring.push_next(low, FrameStatus::Ready);
        assert_eq!(consumer.join().unwrap(), 0);
    }

    #[test]
    fn test_reinject_goes_first() {
        let ring = ring(3);
        let a = ring.register(5).unwrap();
        let b = ring.register(5).unwrap();
        let a_buf = a.header().bufid();
        ring.push_next(a, FrameStatus::Ready);
        ring.push_next(b, FrameStatus::Ready);

        let first = ring.retrieve().unwrap();
        assert_eq!(first.header().bufid(), a_buf);
        ring.reinject(first);
        let again = ring.retrieve().unwrap();
        assert_eq!(again.header().bufid(), a_buf);
        assert_eq!(again.header().status(), FrameStatus::Ready);
        ring.remove(again);
    }

    #[test]
    fn test_dup_copies_payload() {
        let ring = ring(2);
        let mut frame = ring.register(3).unwrap();
        frame.buffer_mut()[..2].copy_from_slice(&[7, 8]);
        frame.set_size(2).unwrap();
        frame.attributes_mut().insert(FrameAttributes::IS_CLONED);
        ring.push_next(frame, FrameStatus::Wait);

        let frame = ring.reserve().unwrap();
        let clone = ring.dup(&frame).unwrap().unwrap();
        assert_eq!(clone.id(), 3);
        assert_eq!(clone.data(), &[7, 8]);
        assert_eq!(clone.header().status(), FrameStatus::Wait);
        assert_ne!(clone.header().bufid(), frame.header().bufid());
        assert_eq!(ring.counts().locked, 2);
        ring.remove(clone);
        ring.remove(frame);
        assert_eq!(ring.counts().null, 2);
    }

    #[test]
    fn test_try_dup_does_not_block_on_full_ring() {
        let ring = ring(2);
        let frame = ring.register(0).unwrap();
        let copy = ring.try_dup(&frame).unwrap().unwrap();
        assert_eq!(copy.id(), 0);
        assert_eq!(ring.counts().null, 0);

        assert!(ring.try_dup(&frame).unwrap().is_none());
        assert_eq!(ring.counts().total(), 2);
        ring.remove(copy);
        ring.remove(frame);
        assert_eq!(ring.counts().null, 2);
    }

    #[test]
    fn test_interrupt_wakes_register() {
        let ring = ring(1);
        let held = ring.register(0).unwrap();
        let blocked = {
            let ring = ring.clone();
            thread::spawn(move || ring.register(1).is_none())
        };
        wait_for_waiters(&ring, FrameStatus::Null, 1);
        ring.interrupt_stage(FrameStatus::Null);
        assert!(blocked.join().unwrap());
        assert!(ring.register(2).is_none());
        ring.remove(held);
    }

    #[test]
    fn test_interrupt_ignores_queue_contents() {
        let ring = ring(2);
        let frame = ring.register(0).unwrap();
        ring.push_next(frame, FrameStatus::Ready);
        ring.interrupt();
        assert!(ring.retrieve().is_none());
    }

    #[test]
    fn test_dropped_handle_returns_to_pool() {
        let ring = ring(2);
        {
            let _frame = ring.register(0).unwrap();
            assert_eq!(ring.counts().null, 1);
        }
        assert_eq!(ring.counts().null, 2);
    }

    #[test]
    fn test_flush_returns_queued_frames() {
        let ring = ring(3);
        let a = ring.register(0).unwrap();
        let b = ring.register(1).unwrap();
        let held = ring.register(2).unwrap();
        ring.push_next(a, FrameStatus::Wait);
        ring.push_next(b, FrameStatus::Ready);
        assert_eq!(ring.flush(), 2);
        assert_eq!(ring.counts(), RingCounts { null: 2, locked: 1, ..Default::default() });
        ring.remove(held);
    }

    #[test]
    fn test_counters_follow_stages() {
        let ring = ring(4);
        let importing = ring.register(0).unwrap();
        let waiting = ring.register(1).unwrap();
        ring.push_next(waiting, FrameStatus::Wait);
        let ready = ring.register(2).unwrap();
        ring.push_next(ready, FrameStatus::Ready);

        assert_eq!(ring.counters(), StageCounters { import: 1, filter: 1, export: 1 });
        assert!(ring.have_more());
        ring.remove(importing);
        ring.flush();
        assert!(!ring.have_more());
    }
}
