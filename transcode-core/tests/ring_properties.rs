//! Property and stress tests for the staged frame ring.
//!
//! Single-threaded operation sequences are generated with proptest; the
//! concurrent properties run real threads against one ring.

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use transcode_core::frame::{FrameSpecs, FrameStatus, PixelFormat, PoolFrame, VideoFrame};
use transcode_core::pool::{RingFrame, VideoRing};

fn ring(capacity: usize) -> VideoRing {
    VideoRing::alloc(&FrameSpecs::new(4, 4, PixelFormat::Gray8, 100, 1, 8), capacity).unwrap()
}

fn wait_for_waiters(ring: &VideoRing, status: FrameStatus, n: usize) {
    for _ in 0..1000 {
        if ring.waiting(status) >= n {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("waiters never blocked on {}", status);
}

// =============================================================================
// Capacity Invariant
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Op {
    Register,
    PushWait,
    Reserve,
    PushReady,
    Retrieve,
    Remove,
    Dup,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Register),
        Just(Op::PushWait),
        Just(Op::Reserve),
        Just(Op::PushReady),
        Just(Op::Retrieve),
        Just(Op::Remove),
        Just(Op::Dup),
    ]
}

/// Frames checked out by the test, by the stage that took them.
#[derive(Default)]
struct Held {
    importing: Vec<RingFrame<VideoFrame>>,
    filtering: Vec<RingFrame<VideoFrame>>,
    exporting: Vec<RingFrame<VideoFrame>>,
}

impl Held {
    fn len(&self) -> usize {
        self.importing.len() + self.filtering.len() + self.exporting.len()
    }
}

/// Apply `op` if it cannot block on a single thread.
fn apply(ring: &VideoRing, held: &mut Held, next_id: &mut u64, op: Op) {
    let counts = ring.counts();
    match op {
        Op::Register if counts.null > 0 => {
            held.importing.push(ring.register(*next_id).unwrap());
            *next_id += 1;
        }
        Op::PushWait => {
            if let Some(frame) = held.importing.pop() {
                ring.push_next(frame, FrameStatus::Wait);
            }
        }
        Op::Reserve if counts.wait > 0 => held.filtering.push(ring.reserve().unwrap()),
        Op::PushReady => {
            if let Some(frame) = held.filtering.pop() {
                ring.push_next(frame, FrameStatus::Ready);
            }
        }
        // with nothing upstream the head of Ready is always servable
        Op::Retrieve
            if counts.ready > 0 && counts.wait == 0 && held.importing.is_empty() && held.filtering.is_empty() =>
        {
            held.exporting.push(ring.retrieve().unwrap());
        }
        Op::Remove => {
            if let Some(frame) = held.exporting.pop() {
                ring.remove(frame);
            }
        }
        Op::Dup if counts.null > 0 && !held.filtering.is_empty() => {
            let copy = ring.dup(&held.filtering[0]).unwrap().unwrap();
            ring.push_next(copy, FrameStatus::Wait);
        }
        _ => {}
    }
}

proptest! {
    /// Every frame is in exactly one stage whatever the operation order.
    #[test]
    fn capacity_invariant_holds(capacity in 1usize..8, ops in proptest::collection::vec(op(), 1..200)) {
        let ring = ring(capacity);
        let mut held = Held::default();
        let mut next_id = 0;

        for op in ops {
            apply(&ring, &mut held, &mut next_id, op);
            let counts = ring.counts();
            prop_assert_eq!(counts.total(), capacity);
            prop_assert_eq!(ring.in_flight(), counts.total() - counts.null);
            prop_assert!(held.len() <= ring.in_flight());
        }

        for frame in held.importing.drain(..).chain(held.filtering.drain(..)).chain(held.exporting.drain(..)) {
            ring.remove(frame);
        }
        ring.flush();
        prop_assert_eq!(ring.counts().null, capacity);
    }

    /// A full stage cycle leaves the ring as it found it.
    #[test]
    fn round_trip_restores_free_count(capacity in 1usize..8, cycles in 1usize..20) {
        let ring = ring(capacity);
        let before = ring.counts();
        for id in 0..cycles as u64 {
            let frame = ring.register(id).unwrap();
            ring.push_next(frame, FrameStatus::Wait);
            let frame = ring.reserve().unwrap();
            ring.push_next(frame, FrameStatus::Ready);
            let frame = ring.retrieve().unwrap();
            prop_assert_eq!(frame.id(), id);
            ring.remove(frame);
        }
        prop_assert_eq!(ring.counts(), before);
    }
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_no_double_checkout_under_stress() {
    const FRAMES: u64 = 300;
    let ring = ring(6);
    let held: Arc<Mutex<HashSet<usize>>> = Arc::default();

    let import = {
        let ring = ring.clone();
        thread::spawn(move || {
            for id in 0..FRAMES {
                let frame = ring.register(id).unwrap();
                ring.push_next(frame, FrameStatus::Wait);
            }
        })
    };

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let ring = ring.clone();
            let held = Arc::clone(&held);
            thread::spawn(move || {
                while let Some(frame) = ring.reserve() {
                    let bufid = frame.header().bufid();
                    assert!(held.lock().insert(bufid), "buffer {} checked out twice", bufid);
                    thread::yield_now();
                    assert!(held.lock().remove(&bufid));
                    ring.push_next(frame, FrameStatus::Ready);
                }
            })
        })
        .collect();

    let mut ids = Vec::new();
    for _ in 0..FRAMES {
        let frame = ring.retrieve().unwrap();
        ids.push(frame.id());
        ring.remove(frame);
    }

    import.join().unwrap();
    ring.interrupt_stage(FrameStatus::Wait);
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(ids, (0..FRAMES).collect::<Vec<_>>());
    assert_eq!(ring.counts().null, 6);
}

#[test]
fn test_interrupt_releases_every_waiter() {
    let ring = ring(2);
    // hold both frames so registering blocks
    let first = ring.register(0).unwrap();
    let second = ring.register(1).unwrap();

    let mut handles = Vec::new();
    for status in [FrameStatus::Null, FrameStatus::Wait, FrameStatus::Ready] {
        for _ in 0..2 {
            let ring = ring.clone();
            handles.push(thread::spawn(move || match status {
                FrameStatus::Null => ring.register(9).map(|f| f.id()),
                FrameStatus::Wait => ring.reserve().map(|f| f.id()),
                _ => ring.retrieve().map(|f| f.id()),
            }));
        }
    }
    wait_for_waiters(&ring, FrameStatus::Null, 2);
    wait_for_waiters(&ring, FrameStatus::Wait, 2);
    wait_for_waiters(&ring, FrameStatus::Ready, 2);

    ring.interrupt();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), None);
    }

    ring.remove(first);
    ring.remove(second);
    assert_eq!(ring.counts().null, 2);
}
