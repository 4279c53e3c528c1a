//! Concurrent out-of-core voxel storage.
//!
//! A [`Volume`] is a sparse 3D grid of fixed-size cubic chunks, each made of
//! parallel byte-array "layers". Callers select rectangular regions through
//! an [`Access`], lock them for reading or writing, and mutate voxels in
//! place:
//!
//! ```no_run
//! use voxelstore::{AccessMode, LayerDesc, Region, Volume, VolumeConfig, VoxelPos};
//!
//! let volume = Volume::new(VolumeConfig {
//!     layers: vec![LayerDesc::new("Material", 1, 1)],
//!     chunk_edge_length: 8,
//!     base_dir: Some("world_data".into()),
//!     ..VolumeConfig::default()
//! })?;
//!
//! let mut access = volume.access();
//! access.select(Some(Region::new(-20, -20, -20, 40, 40, 40)));
//! let mut locked = access.lock(AccessMode::ReadWrite);
//! locked.voxel_mut(VoxelPos::new(0, 0, 0), 0).expect("in region")[0] = b'X';
//! # Ok::<(), voxelstore::VolumeError>(())
//! ```
//!
//! Between accesses, chunks stay resident in an in-memory map. A pool of
//! background workers pages them to and from the base directory, and a
//! scheduler thread evicts chunks that have been unused (and saves chunks
//! that have been dirty) longer than the configured timeouts. Volumes
//! without a base directory live purely in memory: modified chunks are
//! simply never evicted.
//!
//! Logging goes through the [`log`] facade; install any logger to see it.

pub mod persistence;
pub mod world;

pub use persistence::PersistenceError;
pub use world::core::{
    identity_codec, ChunkPos, LayerDesc, Region, VoxelCodecFn, VoxelPos, MAX_LAYER_NAME_LEN,
};
pub use world::interfaces::{Access, AccessMode, LockedRegion};
pub use world::management::{panic_flush, Volume, VolumeConfig, VolumeError, VolumeStats};
