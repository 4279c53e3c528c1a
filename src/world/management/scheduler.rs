//! Deferred residency checks.
//!
//! Chunks do not get saved or evicted the moment they become dirty or
//! unused; a check is scheduled for `now + timeout` instead and a single
//! scheduler thread runs it when the time comes. The pending checks form a
//! FIFO: per cause the wait duration is constant, so insertion order is
//! already execution order and a time-keyed heap would buy nothing.
//!
//! A check carries only a chunk position, never a chunk reference. The chunk
//! may be long gone when the check fires, which the residency lookup in
//! `check_chunk` tolerates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::world::core::ChunkPos;

/// Why a check was scheduled; selects which volume timeout applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckCause {
    /// The chunk's reference count dropped to zero.
    Unused,
    /// The chunk transitioned from clean to modified.
    Modified,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ScheduledCheck {
    pub fire_at: Instant,
    pub pos: ChunkPos,
}

/// Don't bother sleeping for less than this.
const NO_WAIT_EPSILON: Duration = Duration::from_millis(100);

pub(crate) struct CheckScheduler {
    checks: Mutex<VecDeque<ScheduledCheck>>,
    /// Signaled on new checks and on shutdown; wakes the scheduler thread
    /// out of both its empty-queue wait and its per-check timed wait.
    reevaluate: Condvar,
    stop: AtomicBool,
}

impl CheckScheduler {
    pub(crate) fn new() -> Self {
        Self {
            checks: Mutex::new(VecDeque::new()),
            reevaluate: Condvar::new(),
            stop: AtomicBool::new(false),
        }
    }

    /// Append a check firing after `timeout_secs`. Negative timeouts disable
    /// the behavior entirely; zero means an immediate check. No-op after
    /// shutdown.
    pub(crate) fn schedule_in(&self, pos: ChunkPos, timeout_secs: i64) {
        if timeout_secs < 0 || self.stop.load(Ordering::Relaxed) {
            return;
        }
        let check = ScheduledCheck {
            fire_at: Instant::now() + Duration::from_secs(timeout_secs as u64),
            pos,
        };
        self.checks.lock().push_back(check);
        self.reevaluate.notify_one();
    }

    pub(crate) fn pending(&self) -> usize {
        self.checks.lock().len()
    }

    /// Blocking pop of the next check. Returns `None` once shut down and
    /// drained.
    pub(crate) fn next(&self) -> Option<ScheduledCheck> {
        let mut checks = self.checks.lock();
        loop {
            if let Some(check) = checks.pop_front() {
                return Some(check);
            }
            if self.stop.load(Ordering::Relaxed) {
                return None;
            }
            self.reevaluate.wait(&mut checks);
        }
    }

    /// Sleep until the check is due. One-shot: a re-evaluate signal (new
    /// check or shutdown) cuts the wait short and the check simply runs
    /// early. During shutdown there is no wait at all, so the remaining
    /// queue drains promptly.
    pub(crate) fn wait_until(&self, fire_at: Instant) {
        if self.stop.load(Ordering::Relaxed) {
            return;
        }
        if fire_at <= Instant::now() + NO_WAIT_EPSILON {
            return;
        }
        let mut checks = self.checks.lock();
        let _ = self.reevaluate.wait_until(&mut checks, fire_at);
    }

    pub(crate) fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.reevaluate.notify_all();
    }
}
