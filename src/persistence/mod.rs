//! Paging chunks to and from the volume's base directory.
//!
//! `chunk_file` is the byte-exact on-disk codec, `job_queue` holds pending
//! load/save work, and `worker_pool` runs it on background threads. I/O and
//! parse failures never escape this module to callers of the volume API:
//! workers log them and leave the chunk either clean-empty (failed load) or
//! modified (failed save, retried by the next check).

pub mod chunk_file;
pub(crate) mod job_queue;
pub(crate) mod worker_pool;

use thiserror::Error;

/// Failure while encoding or decoding a chunk file.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated chunk file ({0})")]
    Truncated(&'static str),

    #[error("unsupported chunk file version {found}")]
    VersionMismatch { found: u32 },

    #[error("chunk file edge length {found} does not match volume edge length {expected}")]
    EdgeLengthMismatch { found: u32, expected: u32 },

    #[error("layer directory entry {index} has no name terminator")]
    BadLayerName { index: usize },

    #[error("layer payload at offset {offset} ({len} bytes) lies outside the file")]
    PayloadOutOfBounds { offset: u32, len: usize },
}
