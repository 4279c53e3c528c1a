//! Region access: the caller-facing read/write surface.
//!
//! An [`Access`] owns references to every chunk overlapping its selected
//! region and serializes voxel reads and writes through the per-chunk locks.
//! Locking yields a [`LockedRegion`] guard; voxel slices borrowed from the
//! guard stay valid exactly as long as the guard lives, which is the Rust
//! rendering of "the pointer is valid only while the access remains locked".

use parking_lot::MutexGuard;

use crate::world::core::{Region, VoxelPos};
use crate::world::management::scheduler::CheckCause;
use crate::world::management::{ChunkHandle, Volume, VolumeInner};
use crate::world::storage::ChunkState;

/// How a region is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Shared intent: only [`LockedRegion::voxel`] is permitted.
    Read,
    /// Full access through [`LockedRegion::voxel_mut`] as well.
    ReadWrite,
}

/// A caller's window into a volume.
///
/// Created through [`Volume::access`]. Selecting a region grabs (and pins)
/// the overlapped chunks; dropping the access, or selecting elsewhere,
/// releases them again.
pub struct Access<'v> {
    volume: &'v Volume,
    selection: Option<Region>,
    chunk_region: Region,
    chunks: Vec<ChunkHandle>,
    priority: i32,
}

impl<'v> Access<'v> {
    pub(crate) fn new(volume: &'v Volume) -> Self {
        Self {
            volume,
            selection: None,
            chunk_region: Region::new(0, 0, 0, 0, 0, 0),
            chunks: Vec::new(),
            priority: 0,
        }
    }

    /// Priority used for load jobs triggered by subsequent selects.
    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    /// Replace the selected voxel region. Chunks of the previous selection
    /// are released; chunks of the new one are grabbed and, where a chunk
    /// file exists, queued for loading. `None` clears the selection.
    pub fn select(&mut self, region: Option<Region>) {
        self.chunks.clear();
        self.selection = None;

        if let Some(region) = region {
            let chunk_region = region.to_chunk_region(self.volume.chunk_edge_length());
            self.chunks =
                VolumeInner::grab_region(self.volume.inner(), chunk_region, self.priority);
            self.selection = Some(region);
            self.chunk_region = chunk_region;
        }
    }

    pub fn selection(&self) -> Option<Region> {
        self.selection
    }

    /// Lock every chunk of the selection, in region scan order. Blocks while
    /// any of them is held elsewhere, including by an I/O worker that is
    /// still loading or saving it.
    pub fn lock(&mut self, mode: AccessMode) -> LockedRegion<'_> {
        // The &mut receiver makes a second lock while a guard is alive a
        // compile error; the body only needs shared access.
        let this = &*self;
        let guards = this
            .chunks
            .iter()
            .map(|handle| handle.chunk().lock_state())
            .collect();
        this.locked_region(mode, guards)
    }

    /// All-or-nothing variant of [`Access::lock`]: on the first chunk that
    /// cannot be locked immediately, every lock taken so far is released and
    /// `None` is returned.
    pub fn try_lock(&mut self, mode: AccessMode) -> Option<LockedRegion<'_>> {
        let this = &*self;
        let mut guards = Vec::with_capacity(this.chunks.len());
        for handle in &this.chunks {
            match handle.chunk().try_lock_state() {
                Some(guard) => guards.push(guard),
                None => return None,
            }
        }
        Some(this.locked_region(mode, guards))
    }

    fn locked_region<'a>(
        &'a self,
        mode: AccessMode,
        guards: Vec<MutexGuard<'a, ChunkState>>,
    ) -> LockedRegion<'a> {
        LockedRegion {
            inner: self.volume.inner().as_ref(),
            selection: self.selection,
            chunk_region: self.chunk_region,
            chunks: &self.chunks,
            guards,
            mode,
        }
    }
}

/// A locked selection. Dropping the guard unlocks every chunk.
pub struct LockedRegion<'a> {
    inner: &'a VolumeInner,
    selection: Option<Region>,
    chunk_region: Region,
    chunks: &'a [ChunkHandle],
    guards: Vec<MutexGuard<'a, ChunkState>>,
    mode: AccessMode,
}

impl<'a> LockedRegion<'a> {
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Map a voxel onto (chunk index, byte offset, voxel size), rejecting
    /// anything outside the selection. These rejections are the façade's
    /// observable failures.
    fn locate(&self, pos: VoxelPos, layer: usize) -> Option<(usize, usize, usize)> {
        let selection = match self.selection {
            Some(selection) => selection,
            None => {
                log::error!("voxel {pos} requested without a selected region");
                return None;
            }
        };
        if !selection.contains(pos) {
            log::error!("voxel {pos} lies outside the selected region {selection:?}");
            return None;
        }
        let Some(desc) = self.inner.layers().get(layer) else {
            log::error!("layer index {layer} out of range");
            return None;
        };
        let chunk_pos = pos.to_chunk_pos(self.inner.edge());
        debug_assert!(self.chunk_region.contains_chunk(chunk_pos));
        let index = self.chunk_region.chunk_index(chunk_pos);
        let voxel_size = desc.voxel_size as usize;
        let offset = pos.to_local_index(self.inner.edge()) * voxel_size;
        Some((index, offset, voxel_size))
    }

    /// Read-only bytes of one voxel in one layer. A layer absent from the
    /// chunk reads as the default zero voxel. Returns `None` outside the
    /// selection.
    pub fn voxel(&self, pos: VoxelPos, layer: usize) -> Option<&[u8]> {
        let (index, offset, len) = self.locate(pos, layer)?;
        match self.guards[index].layer(layer) {
            Some(buf) => Some(&buf[offset..offset + len]),
            None => Some(&self.inner.default_voxel()[..len]),
        }
    }

    /// Writable bytes of one voxel in one layer, allocating the chunk's
    /// layer buffer on first touch and marking the chunk modified. Returns
    /// `None` outside the selection or when the region is locked read-only.
    pub fn voxel_mut(&mut self, pos: VoxelPos, layer: usize) -> Option<&mut [u8]> {
        if self.mode != AccessMode::ReadWrite {
            log::error!("write to voxel {pos} denied: region is locked read-only");
            return None;
        }
        let (index, offset, len) = self.locate(pos, layer)?;
        let chunk = self.chunks[index].chunk();
        let buf_len = self.inner.voxels_per_chunk() * len;
        let state = &mut *self.guards[index];
        let (buf, transitioned) = chunk.layer_mut(state, layer, buf_len);
        if transitioned {
            self.inner.schedule_check(CheckCause::Modified, chunk.pos());
        }
        Some(&mut buf[offset..offset + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::core::LayerDesc;
    use crate::world::management::VolumeConfig;

    fn volume() -> Volume {
        Volume::new(VolumeConfig {
            layers: vec![
                LayerDesc::new("Material", 1, 1),
                LayerDesc::new("Pressure", 2, 1),
            ],
            chunk_edge_length: 8,
            ..VolumeConfig::default()
        })
        .expect("volume")
    }

    #[test]
    fn written_voxel_reads_back() {
        let volume = volume();
        let mut access = volume.access();
        access.select(Some(Region::new(-20, -20, -20, 40, 40, 40)));

        {
            let mut locked = access.lock(AccessMode::ReadWrite);
            locked
                .voxel_mut(VoxelPos::new(0, 0, 0), 0)
                .expect("writable voxel")[0] = b'X';
        }

        let locked = access.lock(AccessMode::Read);
        assert_eq!(
            locked.voxel(VoxelPos::new(0, 0, 0), 0),
            Some(&b"X"[..])
        );
    }

    #[test]
    fn absent_layer_reads_as_zero() {
        let volume = volume();
        let mut access = volume.access();
        access.select(Some(Region::new(0, 0, 0, 8, 8, 8)));

        let locked = access.lock(AccessMode::Read);
        assert_eq!(locked.voxel(VoxelPos::new(3, 4, 5), 0), Some(&[0u8][..]));
        assert_eq!(
            locked.voxel(VoxelPos::new(3, 4, 5), 1),
            Some(&[0u8, 0u8][..])
        );
    }

    #[test]
    fn read_only_lock_rejects_writes() {
        let volume = volume();
        let mut access = volume.access();
        access.select(Some(Region::new(0, 0, 0, 8, 8, 8)));

        let mut locked = access.lock(AccessMode::Read);
        assert!(locked.voxel_mut(VoxelPos::new(0, 0, 0), 0).is_none());
    }

    #[test]
    fn out_of_region_voxel_is_rejected() {
        let volume = volume();
        let mut access = volume.access();
        access.select(Some(Region::new(0, 0, 0, 8, 8, 8)));

        let locked = access.lock(AccessMode::Read);
        assert!(locked.voxel(VoxelPos::new(8, 0, 0), 0).is_none());
        assert!(locked.voxel(VoxelPos::new(-1, 0, 0), 0).is_none());
    }

    #[test]
    fn out_of_range_layer_is_rejected() {
        let volume = volume();
        let mut access = volume.access();
        access.select(Some(Region::new(0, 0, 0, 4, 4, 4)));

        let locked = access.lock(AccessMode::Read);
        assert!(locked.voxel(VoxelPos::new(0, 0, 0), 7).is_none());
    }

    #[test]
    fn unselected_access_rejects_everything() {
        let volume = volume();
        let mut access = volume.access();
        let locked = access.lock(AccessMode::Read);
        assert!(locked.voxel(VoxelPos::new(0, 0, 0), 0).is_none());
    }

    #[test]
    fn overlapping_accesses_share_chunk_identity() {
        let volume = volume();
        let mut one = volume.access();
        let mut two = volume.access();
        one.select(Some(Region::new(0, 0, 0, 8, 8, 8)));
        two.select(Some(Region::new(4, 4, 4, 8, 8, 8)));

        {
            let mut locked = one.lock(AccessMode::ReadWrite);
            locked
                .voxel_mut(VoxelPos::new(5, 5, 5), 0)
                .expect("writable voxel")[0] = 77;
        }

        let locked = two.lock(AccessMode::Read);
        assert_eq!(locked.voxel(VoxelPos::new(5, 5, 5), 0), Some(&[77u8][..]));
    }

    #[test]
    fn try_lock_backs_off_on_contention() {
        let volume = volume();
        let mut one = volume.access();
        let mut two = volume.access();
        one.select(Some(Region::new(0, 0, 0, 8, 8, 8)));
        two.select(Some(Region::new(0, 0, 0, 16, 8, 8)));

        let _held = one.lock(AccessMode::ReadWrite);
        assert!(two.try_lock(AccessMode::Read).is_none());

        // the backed-off attempt must not leave stray locks behind
        drop(_held);
        assert!(two.try_lock(AccessMode::Read).is_some());
    }

    #[test]
    fn reselect_releases_previous_chunks() {
        let volume = volume();
        let mut access = volume.access();
        access.select(Some(Region::new(0, 0, 0, 16, 8, 8)));
        assert_eq!(volume.loaded_chunk_count(), 2);

        access.select(None);
        // chunks may only disappear through the deferred check, never
        // synchronously on release
        assert_eq!(volume.loaded_chunk_count(), 2);
    }
}
