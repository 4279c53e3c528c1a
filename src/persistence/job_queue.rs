//! Pending load/save work, ordered by priority.
//!
//! The queue is a short list sorted by descending priority with insertion
//! order preserved among equal priorities; scans are linear because the
//! dedup rule needs one anyway. Each queued entry accounts for one logical
//! reference on its chunk; the volume takes that reference before pushing
//! and releases it according to the [`PushOutcome`], and again when the
//! entry leaves the queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::world::storage::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    Load,
    Save,
}

pub(crate) struct JobEntry {
    pub priority: i32,
    pub kind: JobKind,
    pub chunk: Arc<Chunk>,
}

/// What [`JobQueue::push`] did with the entry. Chunks handed back carry a
/// logical reference the caller must release.
pub(crate) enum PushOutcome {
    /// Entry inserted; the queue now owns the reference the caller took.
    Queued,
    /// Entry inserted, displacing a lower-priority entry of the same kind.
    Replaced(Arc<Chunk>),
    /// Entry not inserted (an equal-or-higher-priority duplicate exists, or
    /// the queue is shut down).
    Discarded(Arc<Chunk>),
}

struct QueueState {
    jobs: VecDeque<JobEntry>,
    /// Workers currently executing a job of each kind; drives the fairness
    /// rule in [`QueueState::select`].
    active_loads: u32,
    active_saves: u32,
}

impl QueueState {
    /// Pick the next job: favor the kind opposite to whichever has more
    /// active workers (ties favor saves); fall back to the head.
    fn select(&mut self) -> Option<JobEntry> {
        let favored = if self.active_saves > self.active_loads {
            JobKind::Load
        } else {
            JobKind::Save
        };
        let index = self
            .jobs
            .iter()
            .position(|job| job.kind == favored)
            .unwrap_or(0);
        let job = self.jobs.remove(index)?;
        match job.kind {
            JobKind::Load => self.active_loads += 1,
            JobKind::Save => self.active_saves += 1,
        }
        Some(job)
    }
}

pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    new_job: Condvar,
    stop: AtomicBool,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                active_loads: 0,
                active_saves: 0,
            }),
            new_job: Condvar::new(),
            stop: AtomicBool::new(false),
        }
    }

    /// Insert an entry, applying the dedup rule: an existing job for the
    /// same chunk and kind wins unless the new priority is strictly higher;
    /// a job of the opposite kind coexists (list order then runs the earlier
    /// one first).
    pub(crate) fn push(&self, entry: JobEntry) -> PushOutcome {
        if self.stop.load(Ordering::Relaxed) {
            log::debug!(
                "discarding {:?} job for chunk {}: queue is shut down",
                entry.kind,
                entry.chunk.pos()
            );
            return PushOutcome::Discarded(entry.chunk);
        }

        let mut state = self.state.lock();

        // An entry of the opposite kind for the same chunk is deliberately
        // left alone: insertion order makes the earlier one run first.
        let mut displaced = None;
        if let Some(index) = state
            .jobs
            .iter()
            .position(|job| Arc::ptr_eq(&job.chunk, &entry.chunk) && job.kind == entry.kind)
        {
            if entry.priority > state.jobs[index].priority {
                displaced = state.jobs.remove(index).map(|job| job.chunk);
            } else {
                return PushOutcome::Discarded(entry.chunk);
            }
        }

        let at = state
            .jobs
            .iter()
            .position(|job| entry.priority > job.priority)
            .unwrap_or(state.jobs.len());
        state.jobs.insert(at, entry);
        drop(state);

        self.new_job.notify_one();
        match displaced {
            Some(chunk) => PushOutcome::Replaced(chunk),
            None => PushOutcome::Queued,
        }
    }

    /// Blocking pull. Returns `None` once the queue is shut down *and*
    /// drained, so pending work (notably the destructor's save flush) always
    /// completes before the workers exit.
    pub(crate) fn next_job(&self) -> Option<JobEntry> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = state.select() {
                return Some(job);
            }
            if self.stop.load(Ordering::Relaxed) {
                return None;
            }
            self.new_job.wait(&mut state);
        }
    }

    /// Balance the active-worker counter bumped by [`JobQueue::next_job`].
    pub(crate) fn job_finished(&self, kind: JobKind) {
        let mut state = self.state.lock();
        match kind {
            JobKind::Load => state.active_loads -= 1,
            JobKind::Save => state.active_saves -= 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub(crate) fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.new_job.notify_all();
    }

    /// Remove every queued entry without running it, handing back the chunks
    /// whose references the caller must release.
    pub(crate) fn drain(&self) -> Vec<Arc<Chunk>> {
        let mut state = self.state.lock();
        state.jobs.drain(..).map(|job| job.chunk).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::core::ChunkPos;

    fn chunk(x: i32) -> Arc<Chunk> {
        Arc::new(Chunk::new(ChunkPos::new(x, 0, 0), 1))
    }

    fn entry(chunk: &Arc<Chunk>, kind: JobKind, priority: i32) -> JobEntry {
        JobEntry {
            priority,
            kind,
            chunk: Arc::clone(chunk),
        }
    }

    fn queued_kinds(queue: &JobQueue) -> Vec<(JobKind, i32)> {
        queue
            .state
            .lock()
            .jobs
            .iter()
            .map(|job| (job.kind, job.priority))
            .collect()
    }

    #[test]
    fn orders_by_descending_priority_insertion_stable() {
        let queue = JobQueue::new();
        let (a, b, c) = (chunk(1), chunk(2), chunk(3));
        assert!(matches!(
            queue.push(entry(&a, JobKind::Load, 1)),
            PushOutcome::Queued
        ));
        assert!(matches!(
            queue.push(entry(&b, JobKind::Load, 5)),
            PushOutcome::Queued
        ));
        // equal priority: inserted after the existing one
        assert!(matches!(
            queue.push(entry(&c, JobKind::Load, 5)),
            PushOutcome::Queued
        ));

        let first = queue.next_job().expect("job");
        let second = queue.next_job().expect("job");
        let third = queue.next_job().expect("job");
        assert!(Arc::ptr_eq(&first.chunk, &b));
        assert!(Arc::ptr_eq(&second.chunk, &c));
        assert!(Arc::ptr_eq(&third.chunk, &a));
    }

    #[test]
    fn duplicate_same_kind_keeps_higher_priority() {
        let queue = JobQueue::new();
        let a = chunk(1);

        queue.push(entry(&a, JobKind::Save, 3));
        // lower priority duplicate dropped
        assert!(matches!(
            queue.push(entry(&a, JobKind::Save, 1)),
            PushOutcome::Discarded(_)
        ));
        // equal priority duplicate dropped too
        assert!(matches!(
            queue.push(entry(&a, JobKind::Save, 3)),
            PushOutcome::Discarded(_)
        ));
        assert_eq!(queue.len(), 1);

        // higher priority replaces
        assert!(matches!(
            queue.push(entry(&a, JobKind::Save, 9)),
            PushOutcome::Replaced(_)
        ));
        assert_eq!(queue.len(), 1);
        assert_eq!(queued_kinds(&queue), vec![(JobKind::Save, 9)]);
    }

    #[test]
    fn opposite_kinds_coexist_in_insertion_order() {
        let queue = JobQueue::new();
        let a = chunk(1);

        queue.push(entry(&a, JobKind::Load, 2));
        assert!(matches!(
            queue.push(entry(&a, JobKind::Save, 2)),
            PushOutcome::Queued
        ));
        assert_eq!(
            queued_kinds(&queue),
            vec![(JobKind::Load, 2), (JobKind::Save, 2)]
        );
    }

    #[test]
    fn selection_favors_underrepresented_kind() {
        let queue = JobQueue::new();
        let (a, b, c) = (chunk(1), chunk(2), chunk(3));
        queue.push(entry(&a, JobKind::Load, 1));
        queue.push(entry(&b, JobKind::Save, 1));
        queue.push(entry(&c, JobKind::Load, 1));

        // no active workers: ties favor saves
        let first = queue.next_job().expect("job");
        assert_eq!(first.kind, JobKind::Save);

        // one active save: loads are favored now
        let second = queue.next_job().expect("job");
        assert_eq!(second.kind, JobKind::Load);
        assert!(Arc::ptr_eq(&second.chunk, &a));

        queue.job_finished(JobKind::Save);
        queue.job_finished(JobKind::Load);
    }

    #[test]
    fn falls_back_to_head_when_favored_kind_missing() {
        let queue = JobQueue::new();
        let a = chunk(1);
        queue.push(entry(&a, JobKind::Load, 1));
        // saves are favored but none is queued
        let job = queue.next_job().expect("job");
        assert_eq!(job.kind, JobKind::Load);
    }

    #[test]
    fn shutdown_drains_before_stopping() {
        let queue = JobQueue::new();
        let a = chunk(1);
        queue.push(entry(&a, JobKind::Save, 0));
        queue.shutdown();

        // queued work still comes out, then the stop is observed
        assert!(queue.next_job().is_some());
        assert!(queue.next_job().is_none());

        // pushes after shutdown are rejected
        assert!(matches!(
            queue.push(entry(&a, JobKind::Save, 0)),
            PushOutcome::Discarded(_)
        ));
    }

    #[test]
    fn at_most_one_job_per_kind_per_chunk() {
        let queue = JobQueue::new();
        let a = chunk(1);
        for priority in [0, 2, 1, 2, 5, 4] {
            queue.push(entry(&a, JobKind::Save, priority));
            queue.push(entry(&a, JobKind::Load, priority));
        }
        let kinds = queued_kinds(&queue);
        assert_eq!(
            kinds.iter().filter(|(k, _)| *k == JobKind::Save).count(),
            1
        );
        assert_eq!(
            kinds.iter().filter(|(k, _)| *k == JobKind::Load).count(),
            1
        );
    }
}
