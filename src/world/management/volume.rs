//! The volume: residency map, lifecycle decisions and background threads.
//!
//! A [`Volume`] owns every chunk it has resident, one scheduler thread and a
//! pool of I/O workers. Callers never hold chunks directly; they hold
//! [`ChunkHandle`]s whose reference count gates eviction without ever
//! performing it. The single place a chunk leaves the residency map is
//! [`VolumeInner::check_chunk`], running under the volume lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use thiserror::Error;

use crate::persistence::chunk_file;
use crate::persistence::job_queue::{JobEntry, JobKind, JobQueue, PushOutcome};
use crate::persistence::worker_pool;
use crate::world::core::{ChunkPos, LayerDesc, Region};
use crate::world::interfaces::Access;
use crate::world::management::scheduler::{CheckCause, CheckScheduler};
use crate::world::management::stats::{bump, track_max, StatCounters, VolumeStats};
use crate::world::storage::{Chunk, ChunkState};

/// Configuration error raised by [`Volume::new`].
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("at least one layer must be registered")]
    NoLayers,

    #[error("layer {index} has an empty name")]
    EmptyLayerName { index: usize },

    #[error("layer {index} name {name:?} exceeds the 31-byte limit")]
    LayerNameTooLong { index: usize, name: String },

    #[error("layer {index} ({name}) has zero voxel size")]
    ZeroVoxelSize { index: usize, name: String },

    #[error("layer {index} ({name}) has zero revision")]
    ZeroRevision { index: usize, name: String },

    #[error("duplicate layer name {name:?}")]
    DuplicateLayerName { name: String },

    #[error("chunk edge length must be positive")]
    InvalidEdgeLength,

    #[error("a volume with a base directory needs at least one worker thread")]
    NoWorkerThreads,

    #[error("failed to spawn {role} thread")]
    ThreadSpawn {
        role: &'static str,
        source: std::io::Error,
    },
}

/// Construction parameters of a [`Volume`].
#[derive(Debug, Clone)]
pub struct VolumeConfig {
    /// Fixed layer registry for the volume's lifetime.
    pub layers: Vec<LayerDesc>,
    /// Edge of the chunk cube, immutable after creation.
    pub chunk_edge_length: u32,
    /// Chunk storage root. `None` disables persistence entirely: chunks are
    /// never loaded or saved and the I/O workers are not started.
    pub base_dir: Option<PathBuf>,
    /// Size of the I/O worker pool.
    pub worker_threads: usize,
    /// Seconds before an unreferenced chunk is evicted; negative disables.
    pub unused_chunk_timeout: i64,
    /// Seconds before a modified chunk is written back; negative disables,
    /// zero means write-through.
    pub modified_chunk_timeout: i64,
    /// Allocate the statistics counters.
    pub enable_statistics: bool,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            chunk_edge_length: 32,
            base_dir: None,
            worker_threads: 4,
            unused_chunk_timeout: 4,
            modified_chunk_timeout: 3,
            enable_statistics: false,
        }
    }
}

/// A caller-held reference to a resident chunk. Dropping the handle releases
/// the reference; the last release schedules the deferred UNUSED check that
/// eventually evicts the chunk.
pub(crate) struct ChunkHandle {
    chunk: Arc<Chunk>,
    inner: Arc<VolumeInner>,
}

impl ChunkHandle {
    pub(crate) fn chunk(&self) -> &Chunk {
        &self.chunk
    }
}

impl Drop for ChunkHandle {
    fn drop(&mut self) {
        self.inner.release_chunk(&self.chunk);
    }
}

/// Registry of live volumes for [`panic_flush`].
static PANIC_REGISTRY: Mutex<Vec<Weak<VolumeInner>>> = Mutex::new(Vec::new());

/// Best-effort flush of every live volume, for abnormal process exits (for
/// example from a signal handler thread): writes all modified chunks to disk
/// synchronously and stops the background threads. The affected volumes must
/// not be used afterwards.
pub fn panic_flush() {
    let volumes: Vec<_> = PANIC_REGISTRY
        .lock()
        .drain(..)
        .filter_map(|weak| weak.upgrade())
        .collect();
    for inner in volumes {
        inner.panic_flush();
    }
}

pub(crate) struct VolumeInner {
    layers: Vec<LayerDesc>,
    edge: u32,
    voxels_per_chunk: usize,
    max_layer_voxel_size: u32,
    base_dir: Option<PathBuf>,
    unused_timeout: AtomicI64,
    modified_timeout: AtomicI64,
    /// The residency map; this mutex is the volume lock. Held briefly only
    /// and never across disk I/O.
    chunks: Mutex<HashMap<u64, Arc<Chunk>>>,
    pub(crate) scheduler: CheckScheduler,
    pub(crate) jobs: JobQueue,
    shutting_down: AtomicBool,
    /// Shared all-zero buffer handed out for reads of absent layers.
    default_voxel: Box<[u8]>,
    stats: Option<StatCounters>,
}

/// An out-of-core sparse voxel grid.
///
/// See the crate docs for the lifecycle model. All methods are callable from
/// any thread; voxel data itself is reached through [`Volume::access`].
pub struct Volume {
    inner: Arc<VolumeInner>,
    workers: Vec<JoinHandle<()>>,
    scheduler_thread: Option<JoinHandle<()>>,
}

impl Volume {
    pub fn new(config: VolumeConfig) -> Result<Self, VolumeError> {
        if config.chunk_edge_length == 0 {
            return Err(VolumeError::InvalidEdgeLength);
        }
        if config.layers.is_empty() {
            return Err(VolumeError::NoLayers);
        }
        let mut max_layer_voxel_size = 0;
        for (index, layer) in config.layers.iter().enumerate() {
            layer.validate(index)?;
            if config.layers[..index].iter().any(|l| l.name == layer.name) {
                return Err(VolumeError::DuplicateLayerName {
                    name: layer.name.clone(),
                });
            }
            max_layer_voxel_size = max_layer_voxel_size.max(layer.voxel_size);
        }
        if config.base_dir.is_some() && config.worker_threads == 0 {
            return Err(VolumeError::NoWorkerThreads);
        }

        let edge = config.chunk_edge_length;
        let inner = Arc::new(VolumeInner {
            layers: config.layers,
            edge,
            voxels_per_chunk: (edge as usize).pow(3),
            max_layer_voxel_size,
            base_dir: config.base_dir,
            unused_timeout: AtomicI64::new(config.unused_chunk_timeout.max(-1)),
            modified_timeout: AtomicI64::new(config.modified_chunk_timeout.max(-1)),
            chunks: Mutex::new(HashMap::new()),
            scheduler: CheckScheduler::new(),
            jobs: JobQueue::new(),
            shutting_down: AtomicBool::new(false),
            default_voxel: vec![0u8; max_layer_voxel_size as usize].into_boxed_slice(),
            stats: config.enable_statistics.then(StatCounters::default),
        });

        let scheduler_thread = {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("chunk-scheduler".into())
                .spawn(move || scheduler_loop(inner))
                .map_err(|source| VolumeError::ThreadSpawn {
                    role: "scheduler",
                    source,
                })?
        };

        let workers = if inner.base_dir.is_some() {
            match worker_pool::spawn(&inner, config.worker_threads) {
                Ok(workers) => workers,
                Err(err) => {
                    // let the threads that did start exit on their own
                    inner.scheduler.shutdown();
                    inner.jobs.shutdown();
                    return Err(err);
                }
            }
        } else {
            Vec::new()
        };

        PANIC_REGISTRY.lock().push(Arc::downgrade(&inner));

        Ok(Self {
            inner,
            workers,
            scheduler_thread: Some(scheduler_thread),
        })
    }

    pub fn layer_count(&self) -> usize {
        self.inner.layers.len()
    }

    pub fn layer(&self, index: usize) -> Option<&LayerDesc> {
        self.inner.layers.get(index)
    }

    pub fn layer_index_by_name(&self, name: &str) -> Option<usize> {
        self.inner.layers.iter().position(|l| l.name == name)
    }

    pub fn chunk_edge_length(&self) -> u32 {
        self.inner.edge
    }

    pub fn voxels_per_chunk(&self) -> usize {
        self.inner.voxels_per_chunk
    }

    pub fn max_layer_voxel_size(&self) -> u32 {
        self.inner.max_layer_voxel_size
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.inner.base_dir.as_deref()
    }

    /// Seconds before an unreferenced chunk is evicted, `-1` when disabled.
    pub fn unused_chunk_timeout(&self) -> i64 {
        self.inner.unused_timeout.load(Ordering::Relaxed)
    }

    pub fn set_unused_chunk_timeout(&self, seconds: i64) {
        self.inner
            .unused_timeout
            .store(seconds.max(-1), Ordering::Relaxed);
    }

    /// Seconds before a modified chunk is written back, `-1` when disabled.
    pub fn modified_chunk_timeout(&self) -> i64 {
        self.inner.modified_timeout.load(Ordering::Relaxed)
    }

    pub fn set_modified_chunk_timeout(&self, seconds: i64) {
        self.inner
            .modified_timeout
            .store(seconds.max(-1), Ordering::Relaxed);
    }

    /// A new access with no selection. The access borrows the volume, so all
    /// accesses must be gone before the volume can be dropped.
    pub fn access(&self) -> Access<'_> {
        Access::new(self)
    }

    /// Queue a save for every currently modified chunk. No-op without a base
    /// directory.
    pub fn save_modified_chunks(&self) {
        self.inner.save_modified_chunks();
    }

    /// Number of chunks currently resident.
    pub fn loaded_chunk_count(&self) -> usize {
        self.inner.chunks.lock().len()
    }

    /// Counter snapshot, `None` unless statistics were enabled.
    pub fn statistics(&self) -> Option<VolumeStats> {
        self.inner.stats.as_ref().map(StatCounters::snapshot)
    }

    pub(crate) fn inner(&self) -> &Arc<VolumeInner> {
        &self.inner
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        self.inner.shutting_down.store(true, Ordering::Relaxed);

        // The scheduler drains its remaining checks without waiting; dirty
        // chunks it encounters become save jobs because we are shutting down.
        self.inner.scheduler.shutdown();
        if let Some(handle) = self.scheduler_thread.take() {
            let _ = handle.join();
        }

        // Everything still dirty gets one more save attempt, then the
        // workers drain the queue and exit.
        self.inner.save_modified_chunks();
        self.inner.jobs.shutdown();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }

        let remaining = self.inner.chunks.lock().len();
        if remaining > 0 {
            log::debug!("dropping volume with {remaining} resident chunks");
        }

        let weak = Arc::downgrade(&self.inner);
        PANIC_REGISTRY.lock().retain(|w| !w.ptr_eq(&weak));
    }
}

fn scheduler_loop(inner: Arc<VolumeInner>) {
    while let Some(check) = inner.scheduler.next() {
        inner.scheduler.wait_until(check.fire_at);
        inner.check_chunk(check.pos);
    }
    log::debug!("scheduler thread exiting");
}

impl VolumeInner {
    pub(crate) fn layers(&self) -> &[LayerDesc] {
        &self.layers
    }

    pub(crate) fn edge(&self) -> u32 {
        self.edge
    }

    pub(crate) fn voxels_per_chunk(&self) -> usize {
        self.voxels_per_chunk
    }

    pub(crate) fn default_voxel(&self) -> &[u8] {
        &self.default_voxel
    }

    /// Grab every chunk of a chunk-space region, creating absentees. The
    /// returned chunks are in region scan order and each carries one
    /// reference taken for the caller; references are added inside the same
    /// volume-lock critical section that creates or finds the chunks, so a
    /// concurrent `check_chunk` can never evict a chunk between lookup and
    /// reference.
    pub(crate) fn grab_region(
        inner: &Arc<VolumeInner>,
        chunk_region: Region,
        priority: i32,
    ) -> Vec<ChunkHandle> {
        let mut map = inner.chunks.lock();
        let mut grabbed = Vec::with_capacity(chunk_region.cell_count());
        for pos in chunk_region.chunk_positions() {
            let chunk = inner.get_or_create(&mut map, pos, priority);
            chunk.add_reference();
            grabbed.push(ChunkHandle {
                chunk,
                inner: Arc::clone(inner),
            });
        }
        grabbed
    }

    fn get_or_create(
        &self,
        map: &mut HashMap<u64, Arc<Chunk>>,
        pos: ChunkPos,
        priority: i32,
    ) -> Arc<Chunk> {
        if let Some(chunk) = map.get(&pos.pack()) {
            if let Some(stats) = &self.stats {
                bump(&stats.chunk_get_hits);
            }
            return Arc::clone(chunk);
        }

        if let Some(stats) = &self.stats {
            bump(&stats.chunk_get_misses);
        }
        let chunk = Arc::new(Chunk::new(pos, self.layers.len()));
        if self.chunk_file_exists(pos) {
            log::debug!("queueing load of chunk {pos}");
            self.add_job(JobKind::Load, priority, Arc::clone(&chunk));
        }
        map.insert(pos.pack(), Arc::clone(&chunk));
        if let Some(stats) = &self.stats {
            track_max(&stats.max_loaded_chunks, map.len() as u64);
        }
        chunk
    }

    /// Release one reference; dropping to zero schedules the UNUSED check.
    pub(crate) fn release_chunk(&self, chunk: &Chunk) {
        if chunk.release_reference() {
            self.schedule_check(CheckCause::Unused, chunk.pos());
        }
    }

    pub(crate) fn schedule_check(&self, cause: CheckCause, pos: ChunkPos) {
        let timeout = match cause {
            CheckCause::Unused => self.unused_timeout.load(Ordering::Relaxed),
            CheckCause::Modified => self.modified_timeout.load(Ordering::Relaxed),
        };
        self.scheduler.schedule_in(pos, timeout);
        if let Some(stats) = &self.stats {
            track_max(&stats.max_scheduled_checks, self.scheduler.pending() as u64);
        }
    }

    /// Enqueue a load or save. Takes the queue's chunk reference and settles
    /// it against the dedup outcome.
    pub(crate) fn add_job(&self, kind: JobKind, priority: i32, chunk: Arc<Chunk>) {
        debug_assert!(
            self.base_dir.is_some(),
            "i/o jobs require a base directory"
        );
        chunk.add_reference();
        match self.jobs.push(JobEntry {
            priority,
            kind,
            chunk,
        }) {
            PushOutcome::Queued => {}
            PushOutcome::Replaced(displaced) => self.release_chunk(&displaced),
            PushOutcome::Discarded(rejected) => self.release_chunk(&rejected),
        }
        if let Some(stats) = &self.stats {
            track_max(&stats.max_enqueued_jobs, self.jobs.len() as u64);
        }
    }

    /// Decide the fate of one chunk: queue a save, evict it, or leave it
    /// alone. The only writer of the residency map besides grab misses, and
    /// the only path that evicts. Returns `true` when the chunk was evicted.
    pub(crate) fn check_chunk(&self, pos: ChunkPos) -> bool {
        let mut map = self.chunks.lock();
        let Some(chunk) = map.get(&pos.pack()).map(Arc::clone) else {
            return false;
        };
        let state = chunk.lock_state();

        let unload = chunk.is_unused();
        let mut save = false;
        if chunk.is_modified() && self.base_dir.is_some() {
            let timeout = self.modified_timeout.load(Ordering::Relaxed);
            if timeout < 0 {
                // Automatic write-back disabled; the destructor flush still
                // saves these chunks.
            } else if timeout == 0 || self.shutting_down.load(Ordering::Relaxed) {
                save = true;
            } else {
                save = state
                    .first_modified_at
                    .map(|at| at.elapsed().as_secs() as i64 >= timeout)
                    .unwrap_or(true);
            }
        }

        if save {
            self.add_job(JobKind::Save, 0, Arc::clone(&chunk));
            false
        } else if unload && !chunk.is_modified() {
            log::debug!("unloading chunk {pos}");
            if let Some(stats) = &self.stats {
                bump(&stats.chunk_unload_ops);
            }
            map.remove(&pos.pack());
            true
        } else {
            false
        }
    }

    pub(crate) fn save_modified_chunks(&self) {
        if self.base_dir.is_none() {
            return;
        }
        let map = self.chunks.lock();
        for chunk in map.values() {
            let _state = chunk.lock_state();
            if chunk.is_modified() {
                self.add_job(JobKind::Save, 0, Arc::clone(chunk));
            }
        }
    }

    /// Populate the chunk from its file. Runs with the chunk lock held; on
    /// any failure the chunk is left clean and empty.
    pub(crate) fn load_chunk(&self, chunk: &Chunk, state: &mut ChunkState) -> bool {
        if let Some(stats) = &self.stats {
            bump(&stats.chunk_load_ops);
        }
        let Some(base_dir) = &self.base_dir else {
            debug_assert!(false, "load without a base directory");
            return false;
        };
        let path = chunk_file::chunk_file_name(base_dir, chunk.pos());
        log::debug!("loading chunk {} from {}", chunk.pos(), path.display());
        match chunk_file::read_chunk(&path, &self.layers, self.edge, self.voxels_per_chunk) {
            Ok(layers) => {
                debug_assert!(!chunk.is_modified(), "loading into a dirty chunk");
                state.layers = layers;
                true
            }
            Err(err) => {
                log::error!("{}: {err}", path.display());
                chunk.clear_layers(state, true);
                false
            }
        }
    }

    /// Write the chunk to its file. Runs with the chunk lock held; success
    /// clears the modified flag, failure leaves it set so a later check
    /// retries.
    pub(crate) fn save_chunk(&self, chunk: &Chunk, state: &mut ChunkState) -> bool {
        if let Some(stats) = &self.stats {
            bump(&stats.chunk_save_ops);
        }
        let Some(base_dir) = &self.base_dir else {
            debug_assert!(false, "save without a base directory");
            return false;
        };
        let path = chunk_file::chunk_file_name(base_dir, chunk.pos());
        log::debug!("saving chunk {} to {}", chunk.pos(), path.display());
        match chunk_file::write_chunk(
            &path,
            &self.layers,
            self.edge,
            self.voxels_per_chunk,
            &state.layers,
        ) {
            Ok(()) => {
                chunk.unset_modified(state);
                true
            }
            Err(err) => {
                log::error!("{}: {err}", path.display());
                false
            }
        }
    }

    fn chunk_file_exists(&self, pos: ChunkPos) -> bool {
        match &self.base_dir {
            Some(base_dir) => chunk_file::chunk_file_name(base_dir, pos).is_file(),
            None => false,
        }
    }

    /// Synchronous best-effort flush for abnormal exits.
    fn panic_flush(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.scheduler.shutdown();
        if self.base_dir.is_some() {
            let chunks: Vec<Arc<Chunk>> = self.chunks.lock().values().cloned().collect();
            for chunk in chunks {
                if chunk.is_modified() {
                    let mut state = chunk.lock_state();
                    if chunk.is_modified() {
                        let _ = self.save_chunk(&chunk, &mut state);
                    }
                }
            }
        }
        self.jobs.shutdown();
        for chunk in self.jobs.drain() {
            self.release_chunk(&chunk);
        }
    }
}
