//! Offline comparison of predicted and ground-truth voxel grids.
pub mod align;
pub mod dataset;
pub mod metrics;
pub mod scenario;
