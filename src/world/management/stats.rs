//! Optional per-volume counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counter block, allocated only when statistics are enabled.
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub chunk_get_hits: AtomicU64,
    pub chunk_get_misses: AtomicU64,
    pub chunk_load_ops: AtomicU64,
    pub chunk_save_ops: AtomicU64,
    pub chunk_unload_ops: AtomicU64,
    pub max_loaded_chunks: AtomicU64,
    pub max_enqueued_jobs: AtomicU64,
    pub max_scheduled_checks: AtomicU64,
}

impl StatCounters {
    pub(crate) fn snapshot(&self) -> VolumeStats {
        VolumeStats {
            chunk_get_hits: self.chunk_get_hits.load(Ordering::Relaxed),
            chunk_get_misses: self.chunk_get_misses.load(Ordering::Relaxed),
            chunk_load_ops: self.chunk_load_ops.load(Ordering::Relaxed),
            chunk_save_ops: self.chunk_save_ops.load(Ordering::Relaxed),
            chunk_unload_ops: self.chunk_unload_ops.load(Ordering::Relaxed),
            max_loaded_chunks: self.max_loaded_chunks.load(Ordering::Relaxed),
            max_enqueued_jobs: self.max_enqueued_jobs.load(Ordering::Relaxed),
            max_scheduled_checks: self.max_scheduled_checks.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn track_max(counter: &AtomicU64, value: u64) {
    counter.fetch_max(value, Ordering::Relaxed);
}

/// Snapshot of a volume's statistics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeStats {
    /// Region grabs that found the chunk already resident.
    pub chunk_get_hits: u64,
    /// Region grabs that had to create the chunk.
    pub chunk_get_misses: u64,
    /// Load jobs executed (successful or not).
    pub chunk_load_ops: u64,
    /// Save jobs executed (successful or not).
    pub chunk_save_ops: u64,
    /// Chunks evicted from the residency map.
    pub chunk_unload_ops: u64,
    /// High-water mark of resident chunks.
    pub max_loaded_chunks: u64,
    /// High-water mark of the job queue length.
    pub max_enqueued_jobs: u64,
    /// High-water mark of the deferred-check list length.
    pub max_scheduled_checks: u64,
}
