//! The I/O worker pool.
//!
//! A fixed set of named OS threads pulls jobs off the [`JobQueue`] and runs
//! them with the chunk lock held. After a completed job the worker calls
//! `check_chunk` (taking the volume lock only once the chunk lock is
//! released) so a freshly saved but unused chunk is evicted right away
//! instead of waiting for another timeout round.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::world::management::{VolumeError, VolumeInner};

use super::job_queue::{JobEntry, JobKind};

pub(crate) fn spawn(
    inner: &Arc<VolumeInner>,
    count: usize,
) -> Result<Vec<JoinHandle<()>>, VolumeError> {
    let mut workers = Vec::with_capacity(count);
    for index in 0..count {
        let inner = Arc::clone(inner);
        let handle = std::thread::Builder::new()
            .name(format!("chunk-io-{index}"))
            .spawn(move || worker_loop(inner))
            .map_err(|source| VolumeError::ThreadSpawn {
                role: "i/o worker",
                source,
            })?;
        workers.push(handle);
    }
    Ok(workers)
}

fn worker_loop(inner: Arc<VolumeInner>) {
    while let Some(job) = inner.jobs.next_job() {
        let kind = job.kind;
        let pos = job.chunk.pos();
        let success = process_job(&inner, &job);
        inner.jobs.job_finished(kind);

        // Release the queue's reference before the follow-up check so an
        // otherwise unused chunk is evictable by that very check.
        let JobEntry { chunk, .. } = job;
        inner.release_chunk(&chunk);
        drop(chunk);

        if success {
            inner.check_chunk(pos);
        }
        std::thread::yield_now();
    }
    log::debug!("i/o worker exiting");
}

/// Run one job under the chunk lock. The returned flag gates the follow-up
/// residency check.
fn process_job(inner: &VolumeInner, job: &JobEntry) -> bool {
    let chunk = &job.chunk;
    let mut state = chunk.lock_state();
    match job.kind {
        JobKind::Load => {
            if chunk.is_unused() {
                log::warn!(
                    "skipping load of chunk {}: unused, it would be evicted immediately",
                    chunk.pos()
                );
                true
            } else if chunk.is_modified() {
                // The caller wrote into the chunk before the load ran;
                // clobbering those writes with file contents would lose data.
                log::warn!(
                    "skipping load of chunk {}: already modified in memory",
                    chunk.pos()
                );
                true
            } else {
                inner.load_chunk(chunk, &mut state)
            }
        }
        JobKind::Save => inner.save_chunk(chunk, &mut state),
    }
}
