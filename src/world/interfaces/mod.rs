//! Caller-facing interfaces.

mod access;

pub use access::{Access, AccessMode, LockedRegion};
