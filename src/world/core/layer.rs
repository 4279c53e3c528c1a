//! Layer registry entries.
//!
//! A layer is one parallel attribute dimension of the voxel grid. The set of
//! layers is fixed for the lifetime of a volume; the index position in the
//! registry is the in-memory identifier, the name identifies the layer in
//! chunk files.

use crate::world::management::VolumeError;

/// Longest allowed layer name, in bytes. Chunk files reserve a 32-byte
/// NUL-padded field per layer, so one byte stays for the terminator.
pub const MAX_LAYER_NAME_LEN: usize = 31;

/// Copies voxel payloads between their in-memory and portable (little-endian)
/// representation. `voxel_count` voxels are converted; `src` and `dst` are
/// both `voxel_count * voxel_size` bytes long.
pub type VoxelCodecFn = fn(src: &[u8], dst: &mut [u8], voxel_count: usize);

/// The default codec: a plain byte copy. Correct for single-byte voxels and
/// for hosts that store voxels in little-endian form already.
pub fn identity_codec(src: &[u8], dst: &mut [u8], _voxel_count: usize) {
    dst.copy_from_slice(src);
}

/// Immutable description of one voxel layer.
#[derive(Debug, Clone)]
pub struct LayerDesc {
    /// Identifies the layer in chunk files; 1 to 31 bytes.
    pub name: String,
    /// Bytes a single voxel of this layer occupies.
    pub voxel_size: u32,
    /// Bumped by the host whenever the voxel encoding changes; file layers
    /// with a different revision are not loaded.
    pub revision: u32,
    /// Converts voxels into their portable form when saving.
    pub serialize: VoxelCodecFn,
    /// Converts voxels from their portable form when loading.
    pub deserialize: VoxelCodecFn,
}

impl LayerDesc {
    /// A layer with the identity codec in both directions.
    pub fn new(name: impl Into<String>, voxel_size: u32, revision: u32) -> Self {
        Self {
            name: name.into(),
            voxel_size,
            revision,
            serialize: identity_codec,
            deserialize: identity_codec,
        }
    }

    /// Replace both codec callbacks.
    pub fn with_codec(mut self, serialize: VoxelCodecFn, deserialize: VoxelCodecFn) -> Self {
        self.serialize = serialize;
        self.deserialize = deserialize;
        self
    }

    pub(crate) fn validate(&self, index: usize) -> Result<(), VolumeError> {
        if self.name.is_empty() {
            return Err(VolumeError::EmptyLayerName { index });
        }
        if self.name.len() > MAX_LAYER_NAME_LEN {
            return Err(VolumeError::LayerNameTooLong {
                index,
                name: self.name.clone(),
            });
        }
        if self.voxel_size == 0 {
            return Err(VolumeError::ZeroVoxelSize {
                index,
                name: self.name.clone(),
            });
        }
        if self.revision == 0 {
            return Err(VolumeError::ZeroRevision {
                index,
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_layer_passes() {
        assert!(LayerDesc::new("Material", 1, 1).validate(0).is_ok());
        assert!(LayerDesc::new("a".repeat(31), 4, 2).validate(0).is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        assert!(matches!(
            LayerDesc::new("", 1, 1).validate(0),
            Err(VolumeError::EmptyLayerName { index: 0 })
        ));
    }

    #[test]
    fn overlong_name_rejected() {
        assert!(matches!(
            LayerDesc::new("a".repeat(32), 1, 1).validate(3),
            Err(VolumeError::LayerNameTooLong { index: 3, .. })
        ));
    }

    #[test]
    fn zero_voxel_size_rejected() {
        assert!(matches!(
            LayerDesc::new("Material", 0, 1).validate(0),
            Err(VolumeError::ZeroVoxelSize { .. })
        ));
    }

    #[test]
    fn zero_revision_rejected() {
        assert!(matches!(
            LayerDesc::new("Material", 1, 0).validate(0),
            Err(VolumeError::ZeroRevision { .. })
        ));
    }

    #[test]
    fn identity_codec_copies() {
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        identity_codec(&src, &mut dst, 4);
        assert_eq!(src, dst);
    }
}
