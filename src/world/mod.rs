//! The voxel grid: coordinates and layers, chunk records, residency
//! management and the caller-facing access surface.

pub mod core;
pub mod interfaces;
pub mod management;
pub mod storage;
