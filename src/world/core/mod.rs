//! Coordinate types and the layer registry.

mod layer;
mod position;

pub use layer::{identity_codec, LayerDesc, VoxelCodecFn, MAX_LAYER_NAME_LEN};
pub use position::{ChunkPos, Region, VoxelPos};
