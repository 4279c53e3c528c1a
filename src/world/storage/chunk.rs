//! The chunk record: the unit of residency and I/O.
//!
//! A chunk owns one buffer slot per registered layer. An absent slot means
//! "all voxels hold the default zero value" and costs no memory. The layer
//! buffers, the modified flag timestamp and everything else inside
//! [`ChunkState`] are guarded by the per-chunk lock; the reference count and
//! the modified flag itself are atomics so residency decisions can read them
//! without taking the lock.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use crate::world::core::ChunkPos;

/// Lock-guarded interior of a [`Chunk`].
pub(crate) struct ChunkState {
    /// One slot per registered layer; `None` means the layer is absent from
    /// this chunk. A present buffer is never reallocated for the lifetime of
    /// the chunk, so its address is stable while the chunk lock is held.
    pub(crate) layers: Vec<Option<Box<[u8]>>>,
    /// Stamped when the modified flag transitions false to true; cleared by
    /// a successful save.
    pub(crate) first_modified_at: Option<Instant>,
}

pub(crate) struct Chunk {
    pos: ChunkPos,
    state: Mutex<ChunkState>,
    modified: AtomicBool,
    /// Grabs, access handles and queued jobs each hold one count. The count
    /// gates eviction decisions taken under the volume lock; it does not
    /// control deallocation (the `Arc` wrapping the chunk does).
    refs: AtomicI32,
}

impl Chunk {
    pub(crate) fn new(pos: ChunkPos, layer_count: usize) -> Self {
        Self {
            pos,
            state: Mutex::new(ChunkState {
                layers: vec![None; layer_count],
                first_modified_at: None,
            }),
            modified: AtomicBool::new(false),
            refs: AtomicI32::new(0),
        }
    }

    pub(crate) fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ChunkState> {
        self.state.lock()
    }

    pub(crate) fn try_lock_state(&self) -> Option<MutexGuard<'_, ChunkState>> {
        self.state.try_lock()
    }

    /// Mark the chunk modified. Returns `true` on the false-to-true
    /// transition; the caller must then schedule a MODIFIED check.
    pub(crate) fn touch(&self, state: &mut ChunkState) -> bool {
        if !self.modified.swap(true, Ordering::Relaxed) {
            state.first_modified_at = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Invoked only by a successful save.
    pub(crate) fn unset_modified(&self, state: &mut ChunkState) {
        self.modified.store(false, Ordering::Relaxed);
        state.first_modified_at = None;
    }

    /// Writable buffer of layer `index`, allocating it zero-filled if absent.
    /// Semantically a write: the chunk is marked modified either way. The
    /// second return value reports the modified transition (see
    /// [`Chunk::touch`]). Out-of-range indices are a caller bug.
    pub(crate) fn layer_mut<'a>(
        &self,
        state: &'a mut ChunkState,
        index: usize,
        len: usize,
    ) -> (&'a mut [u8], bool) {
        let transitioned = self.touch(state);
        let buf = state.layers[index].get_or_insert_with(|| vec![0u8; len].into_boxed_slice());
        (&mut buf[..], transitioned)
    }

    /// Drop every layer buffer. Unless `silent`, dropping at least one
    /// present buffer counts as a modification. Returns the modified
    /// transition, as [`Chunk::touch`] does.
    pub(crate) fn clear_layers(&self, state: &mut ChunkState, silent: bool) -> bool {
        let mut any = false;
        for slot in &mut state.layers {
            any |= slot.take().is_some();
        }
        if any && !silent {
            self.touch(state)
        } else {
            false
        }
    }

    pub(crate) fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Relaxed)
    }

    pub(crate) fn add_reference(&self) {
        self.refs.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns `true` when this release dropped the count to zero; the
    /// caller must then schedule an UNUSED check.
    pub(crate) fn release_reference(&self) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "reference underflow on chunk {}", self.pos);
        prev == 1
    }

    pub(crate) fn is_unused(&self) -> bool {
        self.refs.load(Ordering::Acquire) == 0
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        debug_assert!(
            self.is_unused(),
            "chunk {} dropped while referenced",
            self.pos
        );
    }
}

impl ChunkState {
    /// Read-only view of layer `index`, `None` when absent. Never allocates.
    pub(crate) fn layer(&self, index: usize) -> Option<&[u8]> {
        self.layers.get(index)?.as_deref()
    }
}
