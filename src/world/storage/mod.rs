//! In-memory chunk storage.

mod chunk;

pub(crate) use chunk::{Chunk, ChunkState};
