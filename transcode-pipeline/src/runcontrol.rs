//! Run status shared by every stage of a session.
//!
//! A [`RunControl`] starts out running. Export stops it on a graceful end;
//! a signal handler or a fatal error interrupts it. Interruption always wins
//! and also interrupts every ring registered with the control, so threads
//! parked in a ring wait wake up and return.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use transcode_core::frame::PoolFrame;
use transcode_core::pool::FrameRing;

/// Interval between pause checks.
pub const PAUSE_POLL: Duration = Duration::from_millis(10);

/// Run status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Stages are running.
    Running,
    /// Graceful completion was requested.
    Stopped,
    /// A stop was forced by a signal or a fatal error.
    Interrupted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Stopped => write!(f, "stopped"),
            RunStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Something that can be woken out of its blocking waits for good.
pub trait Interruptible: Send + Sync {
    /// Wake every waiter and make further waits return immediately.
    fn interrupt(&self);
}

impl<F: PoolFrame> Interruptible for FrameRing<F> {
    fn interrupt(&self) {
        FrameRing::interrupt(self);
    }
}

struct Inner {
    status: Mutex<RunStatus>,
    paused: AtomicBool,
    hooks: Mutex<Vec<Box<dyn Interruptible>>>,
}

/// Cheap-clone handle to the run status of a session.
#[derive(Clone)]
pub struct RunControl {
    inner: Arc<Inner>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    /// Create a control in the running state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                status: Mutex::new(RunStatus::Running),
                paused: AtomicBool::new(false),
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current status.
    pub fn status(&self) -> RunStatus {
        *self.inner.status.lock()
    }

    /// Whether stages should keep going.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == RunStatus::Running
    }

    /// Whether a graceful stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.status() == RunStatus::Stopped
    }

    /// Whether the run was interrupted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.status() == RunStatus::Interrupted
    }

    /// Request a graceful stop. Only effective while running.
    pub fn stop(&self) -> bool {
        let mut status = self.inner.status.lock();
        if *status == RunStatus::Running {
            *status = RunStatus::Stopped;
            debug!("run control stopped");
            true
        } else {
            false
        }
    }

    /// Force a stop and interrupt every registered ring.
    pub fn interrupt(&self) {
        {
            let mut status = self.inner.status.lock();
            if *status != RunStatus::Interrupted {
                info!("interrupting run (was {})", *status);
            }
            *status = RunStatus::Interrupted;
        }
        // unpause so a paused export loop can observe the interruption
        self.inner.paused.store(false, Ordering::SeqCst);
        for hook in self.inner.hooks.lock().iter() {
            hook.interrupt();
        }
    }

    /// Interrupt `target` together with the run.
    ///
    /// Registering after the run was interrupted interrupts `target` at once.
    pub fn register(&self, target: impl Interruptible + 'static) {
        if self.is_interrupted() {
            target.interrupt();
        }
        self.inner.hooks.lock().push(Box::new(target));
    }

    /// Flip the pause flag; returns the new state.
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.inner.paused.fetch_xor(true, Ordering::SeqCst);
        debug!(paused, "pause toggled");
        paused
    }

    /// Whether the run is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Block while paused, unless interrupted.
    pub fn pause_point(&self) {
        while self.is_paused() && !self.is_interrupted() {
            std::thread::sleep(PAUSE_POLL);
        }
    }
}

impl fmt::Debug for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("status", &self.status())
            .field("paused", &self.is_paused())
            .finish()
    }
}
